//! Allow-list of tools safe for non-interactive execution.
//!
//! Sub-agents run with no operator in the loop, so any tool that asks for
//! interactive confirmation (or defaults to destructive behavior) is banned.
//! Executor construction rejects definitions referencing anything outside
//! this set.

/// Tools cleared for non-interactive use.
pub const NON_INTERACTIVE_TOOLS: &[&str] = &[
    "ls",
    "read_file",
    "grep",
    "glob",
    "read_many_files",
    "memory",
    "shell",
    "web_search",
];

/// Whether a tool name is cleared for sub-agent use.
pub fn is_allow_listed(name: &str) -> bool {
    NON_INTERACTIVE_TOOLS.contains(&name)
}
