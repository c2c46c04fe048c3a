//! Ferret: non-interactive sub-agents for conversational developer tools.
//!
//! A sub-agent is a bounded, tool-using model loop delegated from a parent
//! context: given a textual objective and a declared tool set, it alternates
//! between model calls and tool execution until the model calls
//! `complete_task`, limits are exceeded, or the operator interrupts.
//!
//! This crate re-exports the public API of the workspace:
//!
//! - [`ferret_core`] — the execution engine (executor, interrupts,
//!   boundary, activity events, definitions).
//! - [`ferret_client`] — the remote and local chat adapters.
//! - [`ferret_tools`] — the tool registry and built-in declarations.

pub use ferret_core::*;

pub use ferret_client::{
    ChatError, LocalChat, LocalRequest, LocalSummarizer, LocalTransport, RemoteChat,
    RemoteRequest, RemoteTransport, SummarizerStyle, TestChat, TestChatFactory,
    TransportChatFactory, WireMessage,
};

pub use ferret_tools::{builtin, FnTool, ToolRegistry};
