//! Chat adapters for the ferret sub-agent engine.
//!
//! Two adapter families over the core [`ChatSession`] seam:
//!
//! - [`RemoteChat`]: thin wrapper over a first-party streaming RPC that
//!   natively emits function-call and thought parts.
//! - [`LocalChat`]: wrapper over a local text-only model; owns history,
//!   injects system and reminder texts on the wire, streams cumulative
//!   thoughts.
//!
//! Also provides the local tool-output summarizer and a scripted
//! [`TestChat`] for deterministic tests.
//!
//! [`ChatSession`]: ferret_core::chat::ChatSession

pub mod factory;
pub mod local;
pub mod remote;
pub mod summarizer;
pub mod test_chat;
pub mod types;

pub use factory::TransportChatFactory;
pub use local::LocalChat;
pub use remote::RemoteChat;
pub use summarizer::{LocalSummarizer, SummarizerStyle};
pub use test_chat::{TestChat, TestChatFactory};
pub use types::{
    ChatError, LocalRequest, LocalTransport, RemoteRequest, RemoteTransport, WireMessage,
};
