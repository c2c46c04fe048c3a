//! Core types for Ferret
//!
//! Turn messages, tool invocations/responses, and the identifier formats
//! shared between the executor and the chat adapters.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Name of the synthetic completion tool.
///
/// Invoking this tool is the only way for an agent loop to exit with a
/// "goal reached" status. It is injected into every schema set sent to the
/// model, exactly once.
pub const COMPLETE_TASK_TOOL: &str = "complete_task";

/// Alphabet for agent-id suffixes (lowercase alphanumeric).
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_SUFFIX_LEN: usize = 6;

/// Unique identifier for one agent invocation.
///
/// Format: `{parent_prefix}{name}-{6 lowercase alphanumeric}`. Nested agents
/// chain their parent's id as a prefix, so the full id encodes the delegation
/// path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    /// Mint a fresh id for an agent named `name`, optionally nested under a
    /// parent invocation.
    pub fn new(parent: Option<&AgentId>, name: &str) -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..ID_SUFFIX_LEN)
            .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
            .collect();
        match parent {
            Some(p) => Self(format!("{}{}-{}", p.0, name, suffix)),
            None => Self(format!("{name}-{suffix}")),
        }
    }

    /// The prompt-id for a given turn of this agent: `{agent_id}#{turn}`.
    pub fn prompt_id(&self, turn: u32) -> String {
        format!("{}#{}", self.0, turn)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive a call-id for the `index`-th invocation of a prompt.
///
/// Used when the provider did not supply one natively.
pub fn call_id_for(prompt_id: &str, index: usize) -> String {
    format!("{prompt_id}-{index}")
}

/// Who authored a turn message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
}

/// One content part of a turn message.
///
/// A single message never mixes `FunctionCall` and `FunctionResponse` parts;
/// [`TurnMessage::mixes_calls_and_responses`] checks that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Plain text.
    Text { text: String },
    /// A tool invocation requested by the model.
    FunctionCall { call: ToolInvocation },
    /// The outcome of a tool invocation, echoed back to the model.
    FunctionResponse { response: ToolResponse },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A message in the user→model alternation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl TurnMessage {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![Part::text(text)])
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Model,
            parts,
        }
    }

    /// Concatenated text content of this message.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// True when the message violates the call/response exclusivity
    /// invariant.
    pub fn mixes_calls_and_responses(&self) -> bool {
        let has_calls = self
            .parts
            .iter()
            .any(|p| matches!(p, Part::FunctionCall { .. }));
        let has_responses = self
            .parts
            .iter()
            .any(|p| matches!(p, Part::FunctionResponse { .. }));
        has_calls && has_responses
    }
}

/// A tool invocation extracted from a model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Stable within the turn; either provider-supplied or derived from the
    /// prompt-id.
    pub call_id: String,
    pub name: String,
    pub args: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            args,
        }
    }

    pub fn is_completion(&self) -> bool {
        self.name == COMPLETE_TASK_TOOL
    }
}

/// Success or failure payload of a tool response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolResponsePayload {
    Success {
        /// Content handed back to the model.
        content: Value,
        /// Human-readable surrogate for UI rendering.
        #[serde(skip_serializing_if = "Option::is_none")]
        display: Option<String>,
    },
    Error { message: String },
}

/// The outcome of one tool invocation.
///
/// Exactly one response exists per invocation in the next-turn user message,
/// in invocation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub call_id: String,
    pub name: String,
    #[serde(flatten)]
    pub payload: ToolResponsePayload,
}

impl ToolResponse {
    pub fn success(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: Value,
        display: Option<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            payload: ToolResponsePayload::Success { content, display },
        }
    }

    pub fn error(
        call_id: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            payload: ToolResponsePayload::Error {
                message: message.into(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ToolResponsePayload::Error { .. })
    }

    /// Replace the success content, keeping display and call identity.
    /// No-op on error responses.
    pub fn with_content(mut self, new_content: Value) -> Self {
        if let ToolResponsePayload::Success { content, .. } = &mut self.payload {
            *content = new_content;
        }
        self
    }
}

/// Why an agent run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    /// The model called `complete_task` with acceptable output.
    Goal,
    /// The configured turn limit was reached.
    MaxTurns,
    /// The per-run wall timer elapsed.
    Timeout,
    /// The model stream ended with no tool calls at all.
    NoCompletionCall,
    /// Hard interrupt by the operator.
    Aborted,
    /// Unclassified failure.
    Error,
}

impl TerminationReason {
    /// Reasons that earn one recovery turn before surfacing.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MaxTurns | Self::Timeout | Self::NoCompletionCall)
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Goal => "GOAL",
            Self::MaxTurns => "MAX_TURNS",
            Self::Timeout => "TIMEOUT",
            Self::NoCompletionCall => "ERROR_NO_COMPLETE_TASK_CALL",
            Self::Aborted => "ABORTED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// What a finished run hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    /// Best available result string: validated output, or an explanatory
    /// failure line.
    pub result: String,
    pub reason: TerminationReason,
}
