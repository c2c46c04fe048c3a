//! Remote chat adapter.
//!
//! Thin streaming wrapper over the first-party model API. The transport
//! already emits native function-call and thought parts, so this adapter
//! only keeps history and consults the optional compression service before
//! each turn.

use crate::types::{RemoteRequest, RemoteTransport};
use async_trait::async_trait;
use ferret_core::chat::{
    ChatChunk, ChatCompression, ChatSession, ChatStream, ChunkPart, CompressionStatus,
    SessionOptions,
};
use ferret_core::definition::{SamplingParams, ToolDeclaration};
use ferret_core::error::AgentError;
use ferret_core::types::{Part, ToolInvocation, TurnMessage};
use futures::StreamExt;
use std::sync::{Arc, Mutex};

/// Chat session over a [`RemoteTransport`].
pub struct RemoteChat {
    transport: Arc<dyn RemoteTransport>,
    compression: Option<Arc<dyn ChatCompression>>,
    model: String,
    system: String,
    tools: Vec<ToolDeclaration>,
    params: SamplingParams,
    history: Arc<Mutex<Vec<TurnMessage>>>,
}

impl RemoteChat {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        model: impl Into<String>,
        options: SessionOptions,
    ) -> Self {
        Self {
            transport,
            compression: None,
            model: model.into(),
            system: options.system_instruction,
            tools: options.tools,
            params: options.params,
            history: Arc::new(Mutex::new(options.initial_messages)),
        }
    }

    pub fn with_compression(mut self, compression: Arc<dyn ChatCompression>) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Snapshot of the session history (model parts are appended as each
    /// stream completes).
    pub fn history(&self) -> Vec<TurnMessage> {
        self.history.lock().expect("history poisoned").clone()
    }
}

#[async_trait]
impl ChatSession for RemoteChat {
    async fn send_message_stream(
        &mut self,
        parts: Vec<Part>,
        _prompt_id: &str,
    ) -> Result<ChatStream<'_>, AgentError> {
        let request = {
            let mut history = self.history.lock().expect("history poisoned");
            history.push(TurnMessage::user(parts));
            RemoteRequest {
                model: self.model.clone(),
                system: self.system.clone(),
                history: history.clone(),
                tools: self.tools.clone(),
                params: self.params.clone(),
            }
        };

        let transport = Arc::clone(&self.transport);
        let history = Arc::clone(&self.history);

        let stream = async_stream::stream! {
            let mut model_parts: Vec<Part> = Vec::new();
            let mut inner = transport.stream(&request);
            while let Some(item) = inner.next().await {
                match item {
                    Ok(chunk) => {
                        record_model_parts(&chunk, &mut model_parts);
                        yield Ok(chunk);
                    }
                    Err(err) => {
                        yield Err(err.into());
                        return;
                    }
                }
            }
            drop(inner);
            if !model_parts.is_empty() {
                history
                    .lock()
                    .expect("history poisoned")
                    .push(TurnMessage::model(model_parts));
            }
        };
        Ok(Box::pin(stream))
    }

    async fn compress_history(
        &mut self,
        previous_attempt_inflated: bool,
    ) -> Result<CompressionStatus, AgentError> {
        let Some(compression) = &self.compression else {
            return Ok(CompressionStatus::Noop);
        };
        let snapshot = self.history.lock().expect("history poisoned").clone();
        let (replacement, status) = compression
            .compress(&snapshot, previous_attempt_inflated)
            .await?;
        if let (CompressionStatus::Compressed, Some(new_history)) = (status, replacement) {
            tracing::debug!(
                from = snapshot.len(),
                to = new_history.len(),
                "swapped in compressed chat history"
            );
            *self.history.lock().expect("history poisoned") = new_history;
        }
        Ok(status)
    }
}

/// Committed parts of a chunk (text and calls; thoughts are advisory only).
fn record_model_parts(chunk: &ChatChunk, out: &mut Vec<Part>) {
    for part in &chunk.parts {
        match part {
            ChunkPart::Text { text } => out.push(Part::text(text.clone())),
            ChunkPart::FunctionCall { call } => out.push(Part::FunctionCall {
                call: ToolInvocation::new(
                    call.call_id.clone(),
                    call.name.clone(),
                    call.args.clone(),
                ),
            }),
            ChunkPart::Thought { .. } => {}
        }
    }
}
