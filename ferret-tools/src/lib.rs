//! Tool registry and built-in declarations for the ferret sub-agent engine.
//!
//! The registry implements the [`ToolDispatch`] contract consumed by the
//! executor, validating arguments against each tool's JSON schema before
//! dispatch. The [`builtin`] module carries the declaration set for the
//! non-interactive tools agents may be granted.
//!
//! [`ToolDispatch`]: ferret_core::host::ToolDispatch

pub mod builtin;
pub mod registry;

pub use ferret_core::allowlist::{is_allow_listed, NON_INTERACTIVE_TOOLS};
pub use registry::{FnTool, ToolRegistry};
