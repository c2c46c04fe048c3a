//! Transport contracts and errors for the chat adapters.
//!
//! Each transport normalizes its streaming response to the core
//! [`ChatChunk`] type (remote) or raw text deltas (local), hiding
//! provider-specific quirks from the adapters.

use async_trait::async_trait;
use ferret_core::chat::ChatChunk;
use ferret_core::definition::{SamplingParams, ToolDeclaration};
use ferret_core::error::AgentError;
use ferret_core::types::TurnMessage;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Transport-level failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl ChatError {
    /// Whether a retry may succeed: rate limits, server errors, and network
    /// hiccups qualify; decode failures and cancellations do not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Network(_) => true,
            Self::Decode(_) | Self::Cancelled => false,
        }
    }
}

impl From<ChatError> for AgentError {
    fn from(err: ChatError) -> Self {
        if err.is_recoverable() {
            AgentError::chat_recoverable(err.to_string())
        } else {
            AgentError::chat(err.to_string())
        }
    }
}

/// One model call on the remote transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub model: String,
    pub system: String,
    pub history: Vec<TurnMessage>,
    pub tools: Vec<ToolDeclaration>,
    pub params: SamplingParams,
}

/// First-party streaming RPC with native function-call and thought parts.
///
/// Supplied by the host; the remote adapter only consumes this interface.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    fn stream<'a>(
        &'a self,
        request: &'a RemoteRequest,
    ) -> BoxStream<'a, Result<ChatChunk, ChatError>>;

    fn provider(&self) -> &'static str;
}

/// A message on the local wire: plain role + text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub text: String,
}

impl WireMessage {
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            text: text.into(),
        }
    }
}

/// One model call on the local transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalRequest {
    pub model: String,
    pub endpoint: String,
    pub messages: Vec<WireMessage>,
    pub params: SamplingParams,
}

/// Local streaming RPC that returns only text deltas.
#[async_trait]
pub trait LocalTransport: Send + Sync {
    fn stream_text<'a>(
        &'a self,
        request: &'a LocalRequest,
    ) -> BoxStream<'a, Result<String, ChatError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(ChatError::Http {
            status: 429,
            message: "rate limited".into()
        }
        .is_recoverable());
        assert!(ChatError::Http {
            status: 503,
            message: "overloaded".into()
        }
        .is_recoverable());
        assert!(!ChatError::Http {
            status: 400,
            message: "bad request".into()
        }
        .is_recoverable());
        assert!(ChatError::Network("reset".into()).is_recoverable());
        assert!(!ChatError::Decode("bad json".into()).is_recoverable());
    }

    #[test]
    fn conversion_preserves_recoverability() {
        let err: AgentError = ChatError::Network("reset".to_string()).into();
        assert!(err.is_recoverable());
        let err: AgentError = ChatError::Decode("bad".to_string()).into();
        assert!(!err.is_recoverable());
    }
}
