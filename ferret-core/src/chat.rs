//! Chat backend contracts.
//!
//! The executor consumes exactly one streaming operation from a chat
//! backend. Two adapter families exist (remote with native function-call
//! parts, local text-only); both normalize to [`ChatChunk`] and the executor
//! selects its call strategy once at construction.

use crate::definition::{ModelConfig, SamplingParams, ToolDeclaration};
use crate::error::AgentError;
use crate::types::{Part, ToolInvocation, TurnMessage};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// One normalized part of a streamed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkPart {
    /// Committed model text.
    Text { text: String },
    /// Advisory reasoning content; surfaced as thought activity, never
    /// committed to history by the executor.
    Thought { text: String },
    /// A native function call (remote backend only).
    FunctionCall { call: ToolInvocation },
}

/// Why the stream finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Cancelled,
}

/// One chunk event from the model stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChunk {
    pub parts: Vec<ChunkPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish: Option<FinishReason>,
}

impl ChatChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ChunkPart::Text { text: text.into() }],
            finish: None,
        }
    }

    pub fn thought(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ChunkPart::Thought { text: text.into() }],
            finish: None,
        }
    }

    pub fn function_call(call: ToolInvocation) -> Self {
        Self {
            parts: vec![ChunkPart::FunctionCall { call }],
            finish: None,
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            parts: Vec::new(),
            finish: Some(reason),
        }
    }
}

/// Stream of chunk events for one model call.
pub type ChatStream<'a> = BoxStream<'a, Result<ChatChunk, AgentError>>;

/// Outcome of a pre-turn history-compression attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressionStatus {
    Compressed,
    CompressionFailedInflatedTokenCount,
    #[serde(rename = "NONE")]
    Noop,
}

/// Opaque chat-compression service (remote backend only).
///
/// Returns the compressed history when compression helped; the caller swaps
/// it in. An inflated-token-count failure tells the executor to stop
/// retrying for the rest of the run.
#[async_trait]
pub trait ChatCompression: Send + Sync {
    async fn compress(
        &self,
        history: &[TurnMessage],
        previous_attempt_inflated: bool,
    ) -> Result<(Option<Vec<TurnMessage>>, CompressionStatus), AgentError>;
}

/// An active chat session owned by one executor.
///
/// History is the session's responsibility: the executor only hands over the
/// next user message parts and consumes the resulting stream.
#[async_trait]
pub trait ChatSession: Send {
    /// Send one user message and stream the model's response.
    async fn send_message_stream(
        &mut self,
        parts: Vec<Part>,
        prompt_id: &str,
    ) -> Result<ChatStream<'_>, AgentError>;

    /// Attempt history compression before a turn. Default: no-op.
    async fn compress_history(
        &mut self,
        previous_attempt_inflated: bool,
    ) -> Result<CompressionStatus, AgentError> {
        let _ = previous_attempt_inflated;
        Ok(CompressionStatus::Noop)
    }
}

/// Per-run session setup handed to the chat factory.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Fully assembled system prompt for this run.
    pub system_instruction: String,
    /// Pre-seeded conversation turns.
    pub initial_messages: Vec<TurnMessage>,
    /// Declaration set sent with every model call.
    pub tools: Vec<ToolDeclaration>,
    pub params: SamplingParams,
    /// Appended to each outgoing user message on the local path, never
    /// persisted to history.
    pub reminder: Option<String>,
}

/// Creates chat sessions for a given model configuration.
///
/// The system instruction is assembled per run (it interpolates run inputs),
/// so sessions are created inside `run()`, not at executor construction.
pub trait ChatFactory: Send + Sync {
    fn create_session(
        &self,
        model: &ModelConfig,
        options: SessionOptions,
    ) -> Result<Box<dyn ChatSession>, AgentError>;
}
