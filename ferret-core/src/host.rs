//! Contracts the host supplies to the execution engine.
//!
//! Tools, environment context, telemetry, and tool-output summarization are
//! all consumed through these seams; the engine never reaches past them.

use crate::definition::ToolDeclaration;
use crate::error::{AgentError, ToolError};
use crate::types::{AgentId, TerminationReason, ToolInvocation};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Callback invoked with each partial-output chunk a tool produces.
pub type OutputChunkHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Result of one tool execution.
#[derive(Debug, Clone)]
pub struct ToolExecOutcome {
    /// Content handed to the model in the next user message.
    pub content: Value,
    /// Human-readable surrogate for UI rendering.
    pub display: Option<String>,
    /// Structured error; presence marks the invocation as failed.
    pub error: Option<ToolExecError>,
}

/// Structured error attached to a failed execution.
#[derive(Debug, Clone)]
pub struct ToolExecError {
    pub message: String,
    pub kind: String,
}

impl ToolExecOutcome {
    pub fn success(content: Value, display: Option<String>) -> Self {
        Self {
            content,
            display,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>, kind: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            content: Value::String(message.clone()),
            display: None,
            error: Some(ToolExecError {
                message,
                kind: kind.into(),
            }),
        }
    }
}

/// A single executable tool registered with the host.
#[async_trait]
pub trait RegisteredTool: Send + Sync {
    fn declaration(&self) -> ToolDeclaration;

    async fn invoke(
        &self,
        args: &Map<String, Value>,
        cancel: CancellationToken,
        on_chunk: Option<OutputChunkHandler>,
    ) -> Result<ToolExecOutcome, ToolError>;
}

/// The host's tool registry, as seen by an executor.
///
/// Each agent gets an isolated view; mutations in a child never leak to the
/// parent.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    /// All declarations this registry can produce.
    fn declarations(&self) -> Vec<ToolDeclaration>;

    /// Declarations restricted to the given names, in registry order.
    fn declarations_filtered(&self, names: &[String]) -> Vec<ToolDeclaration> {
        self.declarations()
            .into_iter()
            .filter(|d| names.iter().any(|n| n == &d.name))
            .collect()
    }

    fn contains(&self, name: &str) -> bool;

    /// Execute one invocation. Arguments are validated against the tool's
    /// declared schema before the tool runs.
    async fn execute(
        &self,
        invocation: &ToolInvocation,
        cancel: CancellationToken,
        on_chunk: Option<OutputChunkHandler>,
    ) -> Result<ToolExecOutcome, ToolError>;
}

/// Produces the "Environment Context" block appended to system prompts.
pub trait EnvironmentContext: Send + Sync {
    fn context_block(&self, model: &str) -> String;
}

/// Environment context built from the process working directory.
pub struct DirectoryContext;

impl EnvironmentContext for DirectoryContext {
    fn context_block(&self, _model: &str) -> String {
        let cwd = std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf());
        let mut listing: Vec<String> = std::fs::read_dir(&cwd)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        listing.sort();
        format!(
            "# Environment Context\nWorking directory: {}\nFolder contents: {}",
            cwd.display(),
            listing.join(", ")
        )
    }
}

/// Telemetry records emitted around agent runs.
#[derive(Debug, Clone)]
pub enum TelemetryRecord {
    AgentStart {
        agent_id: AgentId,
        name: String,
    },
    AgentFinish {
        agent_id: AgentId,
        name: String,
        elapsed_ms: u64,
        turns: u32,
        reason: TerminationReason,
    },
    RecoveryAttempt {
        reason: TerminationReason,
        elapsed_ms: u64,
        success: bool,
        turns: u32,
    },
}

/// Fire-and-forget telemetry sink.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: TelemetryRecord);
}

/// Telemetry sink that drops everything.
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _record: TelemetryRecord) {}
}

/// Post-processes one successful tool response into a compact surrogate.
#[async_trait]
pub trait ToolOutputSummarizer: Send + Sync {
    /// Summarize raw tool output into a short bulleted string.
    async fn summarize(&self, tool_name: &str, content: &str) -> Result<String, AgentError>;
}
