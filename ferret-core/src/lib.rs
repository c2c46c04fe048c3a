//! Ferret core: the sub-agent execution engine.
//!
//! A sub-agent is a bounded, non-interactive, tool-using model loop
//! delegated from a parent context. This crate provides the driver
//! ([`AgentExecutor`]), the turn state machine, the nested interrupt
//! subsystem, the tool-call protocol (including the synthetic
//! `complete_task` completion tool), response parsing for text-only
//! backends, and the recovery policy on limit exhaustion.
//!
//! Model transports, tools, and the UI are consumed through the traits in
//! [`chat`] and [`host`]; the engine never reaches past those seams.

pub mod activity;
pub mod allowlist;
pub mod boundary;
pub mod chat;
pub mod definition;
pub mod error;
pub mod executor;
pub mod host;
pub mod interrupt;
pub mod parser;
pub mod prompt;
pub mod retry;
pub mod state;
pub mod types;

pub use activity::{ActivityEvent, ActivityKind, ActivitySink};
pub use allowlist::{is_allow_listed, NON_INTERACTIVE_TOOLS};
pub use boundary::{forward_activity, invoke_sub_agent, SteeringSlot, SubAgentScope};
pub use chat::{
    ChatChunk, ChatCompression, ChatFactory, ChatSession, ChatStream, ChunkPart,
    CompressionStatus, FinishReason, SessionOptions,
};
pub use definition::{
    AgentDefinition, AgentDefinitionBuilder, AgentInputs, InputSpec, ModelConfig, OutputSpec,
    PromptConfig, RunConfig, SamplingParams, ToolDeclaration, ToolRef,
};
pub use error::{AgentError, ToolError};
pub use executor::{AgentExecutor, HostContext, MAX_NESTING_DEPTH};
pub use host::{
    DirectoryContext, EnvironmentContext, NoopTelemetry, OutputChunkHandler, RegisteredTool,
    TelemetryRecord, TelemetrySink, ToolDispatch, ToolExecError, ToolExecOutcome,
    ToolOutputSummarizer,
};
pub use interrupt::{operator_interrupt, InterruptManager};
pub use parser::ToolCallParser;
pub use retry::RetryPolicy;
pub use state::TurnPhase;
pub use types::{
    AgentId, AgentOutcome, Part, Role, TerminationReason, ToolInvocation, ToolResponse,
    ToolResponsePayload, TurnMessage, COMPLETE_TASK_TOOL,
};
