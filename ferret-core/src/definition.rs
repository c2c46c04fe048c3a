//! Agent definitions.
//!
//! A definition is inert data: it describes one agent (model, tools, prompts,
//! run limits, I/O) and is created once by the host at startup, never
//! mutated.

use crate::error::AgentError;
use crate::host::RegisteredTool;
use crate::types::TurnMessage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// One named string input an agent accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl InputSpec {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// The single declared output field of an agent, with its validating schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema the completion argument must satisfy.
    pub schema: Value,
}

impl OutputSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
        }
    }

    /// Derive the schema from a Rust type.
    pub fn from_type<T: schemars::JsonSchema>(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, AgentError> {
        let schema = schemars::schema_for!(T);
        let value = serde_json::to_value(&schema)
            .map_err(|e| AgentError::Configuration(format!("output schema: {e}")))?;
        Ok(Self::new(name, description, value))
    }
}

/// Sampling parameters forwarded to the model backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// Which model backend drives the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ModelConfig {
    /// First-party streaming API with native function-call parts.
    Remote {
        model: String,
        #[serde(default)]
        params: SamplingParams,
    },
    /// Local model that returns only text; tool calls are parsed.
    Local {
        model: String,
        endpoint: String,
        #[serde(default)]
        params: SamplingParams,
    },
}

impl ModelConfig {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Remote { model, .. } | Self::Local { model, .. } => model,
        }
    }

    pub fn params(&self) -> &SamplingParams {
        match self {
            Self::Remote { params, .. } | Self::Local { params, .. } => params,
        }
    }
}

/// Function-declaration schema for one tool, as sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    #[serde(rename = "parametersJsonSchema")]
    pub parameters: Value,
}

impl ToolDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Declaration with no parameters.
    pub fn bare(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(
            name,
            description,
            serde_json::json!({"type": "object", "properties": {}}),
        )
    }
}

/// How a definition refers to one tool.
#[derive(Clone)]
pub enum ToolRef {
    /// Resolved against the host's global registry at executor construction.
    Named(String),
    /// Schema-only declaration; execution still routes through the host
    /// registry by name.
    Declared(ToolDeclaration),
    /// A registered instance adopted verbatim into the agent's private view.
    Instance(Arc<dyn RegisteredTool>),
}

impl ToolRef {
    pub fn name(&self) -> String {
        match self {
            Self::Named(n) => n.clone(),
            Self::Declared(d) => d.name.clone(),
            Self::Instance(t) => t.declaration().name,
        }
    }
}

impl fmt::Debug for ToolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(n) => f.debug_tuple("Named").field(n).finish(),
            Self::Declared(d) => f.debug_tuple("Declared").field(&d.name).finish(),
            Self::Instance(t) => f.debug_tuple("Instance").field(&t.declaration().name).finish(),
        }
    }
}

/// Run limits and post-processing switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum model turns before the recovery turn.
    pub max_turns: u32,
    /// Wall-clock budget for the whole run. Fractional minutes are honored
    /// at runtime; load-time validation requires at least one.
    pub max_time_minutes: f64,
    /// Replace successful tool output with a model-written summary.
    #[serde(default)]
    pub summarize_tool_output: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_time_minutes: 5.0,
            summarize_tool_output: false,
        }
    }
}

/// Post-processor applied to a validated completion output before it becomes
/// the final result.
pub type OutputProcessor = dyn Fn(String) -> String + Send + Sync;

/// Prompt templates and auxiliary texts.
#[derive(Clone, Default)]
pub struct PromptConfig {
    /// System prompt template; `${input}` placeholders are interpolated
    /// against the run inputs plus `${directive}` and `${tool_code}`.
    pub system_prompt: Option<String>,
    /// Pre-seeded conversation turns, used instead of (or before) the
    /// system prompt.
    pub initial_messages: Option<Vec<TurnMessage>>,
    /// Template for the first user message; falls back to "Get Started!".
    pub query: Option<String>,
    /// Extra directive text available to the system prompt template.
    pub directive: Option<String>,
    /// Reminder appended to each outgoing user message on the local path,
    /// never persisted to history.
    pub reminder: Option<String>,
    /// Optional completion-output post-processor.
    pub process_output: Option<Arc<OutputProcessor>>,
}

impl fmt::Debug for PromptConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptConfig")
            .field("system_prompt", &self.system_prompt)
            .field("initial_messages", &self.initial_messages.as_ref().map(Vec::len))
            .field("query", &self.query)
            .field("directive", &self.directive)
            .field("reminder", &self.reminder)
            .field("process_output", &self.process_output.is_some())
            .finish()
    }
}

/// Immutable description of one agent.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    /// Identifier, used in agent-ids and telemetry.
    pub name: String,
    pub display_name: String,
    /// What this agent is for; a parent reads it to decide delegation.
    pub description: String,
    pub inputs: Vec<InputSpec>,
    pub output: Option<OutputSpec>,
    pub model: ModelConfig,
    pub tools: Vec<ToolRef>,
    pub run: RunConfig,
    pub prompt: PromptConfig,
}

impl AgentDefinition {
    pub fn builder(name: impl Into<String>) -> AgentDefinitionBuilder {
        AgentDefinitionBuilder::new(name)
    }

    /// Load-time validation for host-registered definitions.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.name.is_empty() {
            return Err(AgentError::Configuration(
                "agent definition requires a name".to_string(),
            ));
        }
        if self.run.max_turns < 1 {
            return Err(AgentError::Configuration(format!(
                "agent '{}': max_turns must be at least 1",
                self.name
            )));
        }
        if self.run.max_time_minutes < 1.0 {
            return Err(AgentError::Configuration(format!(
                "agent '{}': max_time_minutes must be at least 1",
                self.name
            )));
        }
        for input in &self.inputs {
            if input.description.trim().is_empty() {
                return Err(AgentError::Configuration(format!(
                    "agent '{}': input '{}' requires a description",
                    self.name, input.name
                )));
            }
        }
        if let Some(output) = &self.output {
            if output.name.trim().is_empty() {
                return Err(AgentError::Configuration(format!(
                    "agent '{}': output field requires a name",
                    self.name
                )));
            }
            if !output.schema.is_object() {
                return Err(AgentError::Configuration(format!(
                    "agent '{}': output schema must be a JSON object",
                    self.name
                )));
            }
        }
        if self.prompt.system_prompt.is_none() && self.prompt.initial_messages.is_none() {
            return Err(AgentError::Configuration(format!(
                "agent '{}': prompt config requires a system prompt or initial messages",
                self.name
            )));
        }
        Ok(())
    }
}

/// Builder for [`AgentDefinition`].
pub struct AgentDefinitionBuilder {
    name: String,
    display_name: Option<String>,
    description: String,
    inputs: Vec<InputSpec>,
    output: Option<OutputSpec>,
    model: Option<ModelConfig>,
    tools: Vec<ToolRef>,
    run: RunConfig,
    prompt: PromptConfig,
}

impl AgentDefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            description: String::new(),
            inputs: Vec::new(),
            output: None,
            model: None,
            tools: Vec::new(),
            run: RunConfig::default(),
            prompt: PromptConfig::default(),
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn input(mut self, input: InputSpec) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, output: OutputSpec) -> Self {
        self.output = Some(output);
        self
    }

    pub fn model(mut self, model: ModelConfig) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tool(mut self, tool: ToolRef) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tool_named(mut self, name: impl Into<String>) -> Self {
        self.tools.push(ToolRef::Named(name.into()));
        self
    }

    pub fn max_turns(mut self, turns: u32) -> Self {
        self.run.max_turns = turns;
        self
    }

    pub fn max_time_minutes(mut self, minutes: f64) -> Self {
        self.run.max_time_minutes = minutes;
        self
    }

    pub fn summarize_tool_output(mut self, on: bool) -> Self {
        self.run.summarize_tool_output = on;
        self
    }

    pub fn system_prompt(mut self, template: impl Into<String>) -> Self {
        self.prompt.system_prompt = Some(template.into());
        self
    }

    pub fn initial_messages(mut self, messages: Vec<TurnMessage>) -> Self {
        self.prompt.initial_messages = Some(messages);
        self
    }

    pub fn query(mut self, template: impl Into<String>) -> Self {
        self.prompt.query = Some(template.into());
        self
    }

    pub fn directive(mut self, text: impl Into<String>) -> Self {
        self.prompt.directive = Some(text.into());
        self
    }

    pub fn reminder(mut self, text: impl Into<String>) -> Self {
        self.prompt.reminder = Some(text.into());
        self
    }

    pub fn process_output(mut self, f: Arc<OutputProcessor>) -> Self {
        self.prompt.process_output = Some(f);
        self
    }

    pub fn build(self) -> AgentDefinition {
        let display_name = self.display_name.unwrap_or_else(|| self.name.clone());
        AgentDefinition {
            name: self.name,
            display_name,
            description: self.description,
            inputs: self.inputs,
            output: self.output,
            model: self.model.unwrap_or(ModelConfig::Remote {
                model: "default".to_string(),
                params: SamplingParams::default(),
            }),
            tools: self.tools,
            run: self.run,
            prompt: self.prompt,
        }
    }
}

/// Run-time inputs for one invocation: input name → value.
pub type AgentInputs = std::collections::HashMap<String, String>;

/// Check the supplied inputs against the definition's input specs.
pub fn check_inputs(definition: &AgentDefinition, inputs: &AgentInputs) -> Result<(), AgentError> {
    for spec in &definition.inputs {
        if spec.required && !inputs.contains_key(&spec.name) {
            return Err(AgentError::Configuration(format!(
                "agent '{}': missing required input '{}'",
                definition.name, spec.name
            )));
        }
    }
    for name in inputs.keys() {
        if !definition.inputs.iter().any(|s| &s.name == name) {
            return Err(AgentError::Configuration(format!(
                "agent '{}': unknown input '{}'",
                definition.name, name
            )));
        }
    }
    Ok(())
}

/// Build an argument map with a single entry (completion-call helper).
pub fn single_arg(name: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(name.to_string(), value);
    map
}
