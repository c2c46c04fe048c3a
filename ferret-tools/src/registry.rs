//! Tool registry with schema validation.
//!
//! The registry implements the [`ToolDispatch`] contract the executor
//! consumes. Arguments are validated against each tool's declared JSON
//! schema before the tool runs; validation failures reject the invocation
//! without touching the tool.

use async_trait::async_trait;
use ferret_core::definition::ToolDeclaration;
use ferret_core::error::ToolError;
use ferret_core::host::{OutputChunkHandler, RegisteredTool, ToolDispatch, ToolExecOutcome};
use ferret_core::types::ToolInvocation;
use jsonschema::Validator;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Entry {
    tool: Arc<dyn RegisteredTool>,
    declaration: ToolDeclaration,
    validator: Option<Validator>,
}

/// Registry of executable tools.
pub struct ToolRegistry {
    entries: Vec<Arc<Entry>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Register a tool. The declaration's parameter schema is compiled for
    /// argument validation; an uncompilable schema disables validation for
    /// that tool only.
    pub fn register(&mut self, tool: Arc<dyn RegisteredTool>) {
        let declaration = tool.declaration();
        let validator = match Validator::new(&declaration.parameters) {
            Ok(validator) => Some(validator),
            Err(err) => {
                tracing::warn!(tool = %declaration.name, error = %err, "tool schema failed to compile");
                None
            }
        };
        let name = declaration.name.clone();
        let index = self.entries.len();
        self.entries.push(Arc::new(Entry {
            tool,
            declaration,
            validator,
        }));
        self.by_name.insert(name, index);
    }

    /// Snapshot restricted to `names`, preserving registration order.
    ///
    /// The snapshot is independent: later registrations on either registry
    /// do not leak across.
    pub fn filtered(&self, names: &[String]) -> ToolRegistry {
        let mut out = ToolRegistry::new();
        for entry in &self.entries {
            if names.iter().any(|n| n == &entry.declaration.name) {
                out.by_name
                    .insert(entry.declaration.name.clone(), out.entries.len());
                out.entries.push(Arc::clone(entry));
            }
        }
        out
    }

    fn entry(&self, name: &str) -> Option<&Arc<Entry>> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    fn validate(&self, name: &str, args: &Map<String, Value>) -> Result<(), ToolError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| ToolError::not_found(name))?;
        if let Some(validator) = &entry.validator {
            let instance = Value::Object(args.clone());
            let errors: Vec<String> = validator
                .iter_errors(&instance)
                .map(|e| format!("{}: {}", e.instance_path, e))
                .collect();
            if !errors.is_empty() {
                return Err(ToolError::invalid_arguments(name, errors.join("; ")));
            }
        }
        Ok(())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolDispatch for ToolRegistry {
    fn declarations(&self) -> Vec<ToolDeclaration> {
        self.entries.iter().map(|e| e.declaration.clone()).collect()
    }

    fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    async fn execute(
        &self,
        invocation: &ToolInvocation,
        cancel: CancellationToken,
        on_chunk: Option<OutputChunkHandler>,
    ) -> Result<ToolExecOutcome, ToolError> {
        self.validate(&invocation.name, &invocation.args)?;
        let entry = self
            .entry(&invocation.name)
            .ok_or_else(|| ToolError::not_found(&invocation.name))?;
        entry.tool.invoke(&invocation.args, cancel, on_chunk).await
    }
}

/// Adapter turning a synchronous closure into a registered tool. Useful for
/// hosts wiring simple capabilities and for tests.
pub struct FnTool {
    declaration: ToolDeclaration,
    run: Arc<dyn Fn(&Map<String, Value>) -> Result<Value, ToolError> + Send + Sync>,
}

impl FnTool {
    pub fn new(
        declaration: ToolDeclaration,
        run: impl Fn(&Map<String, Value>) -> Result<Value, ToolError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            declaration,
            run: Arc::new(run),
        })
    }
}

#[async_trait]
impl RegisteredTool for FnTool {
    fn declaration(&self) -> ToolDeclaration {
        self.declaration.clone()
    }

    async fn invoke(
        &self,
        args: &Map<String, Value>,
        _cancel: CancellationToken,
        _on_chunk: Option<OutputChunkHandler>,
    ) -> Result<ToolExecOutcome, ToolError> {
        match (self.run)(args) {
            Ok(content) => Ok(ToolExecOutcome::success(content, None)),
            Err(err) => Ok(ToolExecOutcome::failure(err.to_string(), err.error_code())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_tool() -> Arc<FnTool> {
        FnTool::new(
            ToolDeclaration::new(
                "shell",
                "run a command",
                serde_json::json!({
                    "type": "object",
                    "properties": {"command": {"type": "string"}},
                    "required": ["command"]
                }),
            ),
            |args| Ok(args.get("command").cloned().unwrap_or(Value::Null)),
        )
    }

    fn invocation(name: &str, args: Value) -> ToolInvocation {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ToolInvocation::new("c1", name, args)
    }

    #[tokio::test]
    async fn executes_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool());

        let outcome = registry
            .execute(
                &invocation("shell", serde_json::json!({"command": "ls"})),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.content, Value::String("ls".to_string()));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn rejects_invalid_arguments_before_running() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool());

        let err = registry
            .execute(
                &invocation("shell", serde_json::json!({"command": 42})),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));

        let err = registry
            .execute(
                &invocation("shell", serde_json::json!({})),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute(
                &invocation("grep", serde_json::json!({})),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { .. }));
    }

    #[test]
    fn filtered_snapshot_is_isolated() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool());

        let view = registry.filtered(&["shell".to_string()]);
        assert!(view.contains("shell"));

        // Later registrations on the parent do not leak into the snapshot.
        registry.register(FnTool::new(
            ToolDeclaration::bare("grep", "search"),
            |_| Ok(Value::Null),
        ));
        assert!(registry.contains("grep"));
        assert!(!view.contains("grep"));
    }

    #[test]
    fn filtered_preserves_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(FnTool::new(ToolDeclaration::bare("ls", "list"), |_| {
            Ok(Value::Null)
        }));
        registry.register(echo_tool());
        registry.register(FnTool::new(ToolDeclaration::bare("grep", "search"), |_| {
            Ok(Value::Null)
        }));

        let view = registry.filtered(&["grep".to_string(), "ls".to_string()]);
        let names: Vec<String> = view.declarations().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["ls", "grep"]);
    }
}
