//! Error taxonomy for the execution engine.

use crate::types::TerminationReason;

/// Error returned by tool execution.
///
/// Tool-level failures are recovered locally: they become structured
/// tool-response parts in the next user message so the model can react.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    /// The requested tool was not found in the host registry.
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    /// The model invoked a tool outside this agent's filtered registry.
    #[error("Unauthorized tool call: {name}")]
    Unauthorized { name: String },

    /// Arguments failed schema validation; the tool never ran.
    #[error("Invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    /// The tool ran and reported failure.
    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    /// The invocation was cancelled mid-flight.
    #[error("Tool execution cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "tool_not_found",
            Self::Unauthorized { .. } => "unauthorized",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn unauthorized(name: impl Into<String>) -> Self {
        Self::Unauthorized { name: name.into() }
    }

    pub fn invalid_arguments(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }
}

/// Errors surfaced by agent construction and execution.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Definition or host wiring is invalid; fails construction.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The model stream produced no tool calls and no completion.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// `complete_task` arguments failed the output schema.
    #[error("Output validation failed: {0}")]
    Validation(String),

    /// Chat transport failure (stream establishment or mid-stream).
    #[error("Chat error: {message}")]
    Chat { message: String, recoverable: bool },

    /// The per-run wall timer elapsed.
    #[error("Agent timed out after {minutes} minutes")]
    Timeout { minutes: f64 },

    /// Hard interrupt by the operator.
    #[error("Agent execution was aborted")]
    Aborted,

    /// The grace-window turn did not yield a valid completion.
    #[error("Recovery failed, original reason: {original}")]
    RecoveryFailed { original: TerminationReason },

    /// Nesting beyond the supported depth.
    #[error("Agent nesting depth {depth} exceeds the limit of {max}")]
    DepthLimitExceeded { depth: u32, max: u32 },

    /// Invalid turn state transition; indicates a driver bug.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// A capability the configured backend does not provide.
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl AgentError {
    /// Whether a retry of the failing operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Chat { recoverable: true, .. })
    }

    pub fn chat(message: impl Into<String>) -> Self {
        Self::Chat {
            message: message.into(),
            recoverable: false,
        }
    }

    pub fn chat_recoverable(message: impl Into<String>) -> Self {
        Self::Chat {
            message: message.into(),
            recoverable: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_codes() {
        assert_eq!(ToolError::not_found("x").error_code(), "tool_not_found");
        assert_eq!(ToolError::unauthorized("x").error_code(), "unauthorized");
        assert_eq!(ToolError::Cancelled.error_code(), "cancelled");
    }

    #[test]
    fn unauthorized_display() {
        let err = ToolError::unauthorized("shell");
        assert_eq!(err.to_string(), "Unauthorized tool call: shell");
    }

    #[test]
    fn recoverable_classification() {
        assert!(AgentError::chat_recoverable("rate limited").is_recoverable());
        assert!(!AgentError::chat("bad request").is_recoverable());
        assert!(!AgentError::Aborted.is_recoverable());
    }

    #[test]
    fn timeout_display_keeps_fractional_minutes() {
        let err = AgentError::Timeout { minutes: 0.05 };
        assert!(err.to_string().contains("0.05 minutes"));
    }
}
