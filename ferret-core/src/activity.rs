//! Activity events streamed from the executor to the host UI.
//!
//! The stream is typed, one-way, and fire-and-forget: events are delivered in
//! emission order per agent and the channel carries no back-pressure contract
//! beyond that.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// One progress event from a running agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Constant `true`; hosts use it to route sub-agent activity away from
    /// the primary transcript.
    #[serde(rename = "isSubagentActivity")]
    pub is_subagent_activity: bool,
    pub agent_name: String,
    #[serde(flatten)]
    pub kind: ActivityKind,
}

impl ActivityEvent {
    pub fn new(agent_name: impl Into<String>, kind: ActivityKind) -> Self {
        Self {
            is_subagent_activity: true,
            agent_name: agent_name.into(),
            kind,
        }
    }
}

/// Payload of an activity event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ActivityKind {
    /// A reasoning fragment surfaced while the model streams.
    ThoughtChunk { subject: String, text: String },

    /// A tool invocation is about to execute.
    ToolCallStart {
        call_id: String,
        name: String,
        args: Value,
    },

    /// A tool invocation finished successfully.
    ToolCallEnd {
        call_id: String,
        name: String,
        result_display: String,
        duration_ms: u64,
    },

    /// Streaming partial output from a running tool.
    ///
    /// `name` may be empty when the chunk arrived with no preceding
    /// `ToolCallStart`; consumers render it as a synthetic response.
    ToolOutputChunk {
        call_id: String,
        name: String,
        chunk: String,
    },

    /// A per-call or per-turn failure the run survived (or the terminal
    /// failure line).
    Error { message: String },

    /// The operator interrupted the agent.
    Interrupted { hard: bool },

    /// The user message driving the next turn.
    UserMessage { text: String },
}

/// Canonical serialized discriminator for an activity kind.
pub fn activity_kind_type(kind: &ActivityKind) -> &'static str {
    match kind {
        ActivityKind::ThoughtChunk { .. } => "thought_chunk",
        ActivityKind::ToolCallStart { .. } => "tool_call_start",
        ActivityKind::ToolCallEnd { .. } => "tool_call_end",
        ActivityKind::ToolOutputChunk { .. } => "tool_output_chunk",
        ActivityKind::Error { .. } => "error",
        ActivityKind::Interrupted { .. } => "interrupted",
        ActivityKind::UserMessage { .. } => "user_message",
    }
}

/// Write side of the activity stream.
pub type ActivitySink = mpsc::Sender<ActivityEvent>;

/// Emit an event when a sink is attached. Delivery failures are ignored:
/// a departed UI must not stall the driver.
pub async fn emit(sink: Option<&ActivitySink>, agent_name: &str, kind: ActivityKind) {
    if let Some(tx) = sink {
        let _ = tx.send(ActivityEvent::new(agent_name, kind)).await;
    }
}

/// Split a raw thought fragment into a short subject line and the remaining
/// description.
///
/// Models mark the subject with a leading `**...**` span; when absent the
/// first line stands in, truncated to keep the UI line short.
pub fn extract_thought(raw: &str) -> (String, String) {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("**") {
        if let Some(end) = rest.find("**") {
            let subject = rest[..end].trim().to_string();
            let description = rest[end + 2..].trim().to_string();
            return (subject, description);
        }
    }
    let first_line = trimmed.lines().next().unwrap_or("").trim();
    let subject: String = first_line.chars().take(100).collect();
    (subject, trimmed.to_string())
}
