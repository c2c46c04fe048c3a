//! System prompt assembly and template interpolation.

use crate::definition::{AgentDefinition, AgentInputs, ToolDeclaration};
use crate::error::AgentError;
use crate::host::EnvironmentContext;
use serde_json::Value;
use std::collections::HashMap;

/// Fallback first user message when a definition has no query template.
pub const DEFAULT_QUERY: &str = "Get Started!";

/// Rules appended to every system prompt. Sub-agents run with no operator in
/// the loop, so the contract is stated up front.
const IMPORTANT_RULES: &str = "# Important Rules
- You operate in non-interactive mode. No one will answer questions or confirm actions.
- Always use absolute paths when referring to files.
- You MUST finish by calling `complete_task`. Work ends only through that call.
- Never call `complete_task` in the same turn as any other tool.";

/// Interpolate `${name}` placeholders against a variable map.
///
/// Unknown placeholders are an error; `$` without a `{` passes through
/// verbatim. Applying the result a second time with the same variables is a
/// no-op as long as the values themselves contain no placeholders.
pub fn interpolate(template: &str, vars: &HashMap<String, String>) -> Result<String, AgentError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find("${") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let Some(end) = after.find('}') else {
            return Err(AgentError::Configuration(format!(
                "unterminated placeholder in template: {}",
                &rest[pos..]
            )));
        };
        let name = &after[..end];
        match vars.get(name) {
            Some(value) => out.push_str(value),
            None => {
                return Err(AgentError::Configuration(format!(
                    "template references unknown variable '{name}'"
                )))
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Render the active tool schema set for inclusion in a system prompt.
///
/// The remote path uses the wire-native `parametersJsonSchema` key. The
/// local path renames it to `parameters` and strips any parameter literally
/// named `description` from both the properties map and the required list;
/// small models misparse nested description fields.
pub fn render_tool_code(declarations: &[ToolDeclaration], local: bool) -> String {
    let rendered: Vec<Value> = declarations
        .iter()
        .map(|decl| {
            if local {
                let mut params = decl.parameters.clone();
                if let Some(obj) = params.as_object_mut() {
                    if let Some(props) = obj.get_mut("properties").and_then(Value::as_object_mut) {
                        props.remove("description");
                    }
                    if let Some(required) = obj.get_mut("required").and_then(Value::as_array_mut) {
                        required.retain(|v| v.as_str() != Some("description"));
                    }
                }
                serde_json::json!({
                    "name": decl.name,
                    "description": decl.description,
                    "parameters": params,
                })
            } else {
                serde_json::json!({
                    "name": decl.name,
                    "description": decl.description,
                    "parametersJsonSchema": decl.parameters,
                })
            }
        })
        .collect();
    serde_json::to_string_pretty(&rendered).unwrap_or_else(|_| "[]".to_string())
}

/// Build the full system prompt for one run.
///
/// Interpolates the definition's template against the inputs plus the
/// derived `directive` and `tool_code` tokens, then appends the environment
/// context and the fixed rules block.
pub fn assemble_system_prompt(
    definition: &AgentDefinition,
    inputs: &AgentInputs,
    declarations: &[ToolDeclaration],
    environment: &dyn EnvironmentContext,
) -> Result<String, AgentError> {
    let template = definition.prompt.system_prompt.as_deref().unwrap_or("");

    let mut vars: HashMap<String, String> = inputs.clone();
    if let Some(directive) = &definition.prompt.directive {
        vars.insert("directive".to_string(), directive.clone());
    }
    if template.contains("${tool_code}") {
        vars.insert(
            "tool_code".to_string(),
            render_tool_code(declarations, definition.model.is_local()),
        );
    }

    let body = interpolate(template, &vars)?;

    let mut sections = Vec::with_capacity(3);
    if !body.trim().is_empty() {
        sections.push(body);
    }
    sections.push(environment.context_block(definition.model.model()));
    sections.push(IMPORTANT_RULES.to_string());
    Ok(sections.join("\n\n"))
}

/// Build the first user message text from the query template.
pub fn build_query(definition: &AgentDefinition, inputs: &AgentInputs) -> Result<String, AgentError> {
    match definition.prompt.query.as_deref() {
        Some(template) if !template.trim().is_empty() => interpolate(template, inputs),
        _ => Ok(DEFAULT_QUERY.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{AgentDefinition, ModelConfig, SamplingParams};

    struct FixedEnv;

    impl EnvironmentContext for FixedEnv {
        fn context_block(&self, _model: &str) -> String {
            "# Environment Context\nWorking directory: /work".to_string()
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn interpolate_substitutes_placeholders() {
        let out = interpolate("find ${topic} in ${dir}", &vars(&[("topic", "bugs"), ("dir", "src")]))
            .unwrap();
        assert_eq!(out, "find bugs in src");
    }

    #[test]
    fn interpolate_unknown_variable_fails() {
        assert!(interpolate("${missing}", &vars(&[])).is_err());
    }

    #[test]
    fn interpolate_unterminated_fails() {
        assert!(interpolate("${open", &vars(&[])).is_err());
    }

    #[test]
    fn interpolate_is_idempotent() {
        let v = vars(&[("goal", "say hello")]);
        let once = interpolate("do: ${goal}", &v).unwrap();
        let twice = interpolate(&once, &v).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn tool_code_remote_keeps_wire_key() {
        let decls = vec![ToolDeclaration::bare("ls", "list files")];
        let rendered = render_tool_code(&decls, false);
        assert!(rendered.contains("parametersJsonSchema"));
    }

    #[test]
    fn tool_code_local_renames_and_strips_description_param() {
        let decls = vec![ToolDeclaration::new(
            "write_note",
            "writes a note",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "description": {"type": "string"},
                    "body": {"type": "string"}
                },
                "required": ["description", "body"]
            }),
        )];
        let rendered = render_tool_code(&decls, true);
        assert!(rendered.contains("\"parameters\""));
        assert!(!rendered.contains("parametersJsonSchema"));

        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        let params = &parsed[0]["parameters"];
        assert!(params["properties"].get("description").is_none());
        assert_eq!(params["required"], serde_json::json!(["body"]));
        // The tool's own description field survives.
        assert_eq!(parsed[0]["description"], "writes a note");
    }

    fn definition(system: &str, local: bool) -> AgentDefinition {
        let model = if local {
            ModelConfig::Local {
                model: "small".to_string(),
                endpoint: "http://localhost:11434".to_string(),
                params: SamplingParams::default(),
            }
        } else {
            ModelConfig::Remote {
                model: "large".to_string(),
                params: SamplingParams::default(),
            }
        };
        AgentDefinition::builder("scout")
            .model(model)
            .system_prompt(system)
            .build()
    }

    #[test]
    fn system_prompt_appends_environment_and_rules() {
        let def = definition("You explore ${target}.", false);
        let prompt = assemble_system_prompt(
            &def,
            &vars(&[("target", "src")]),
            &[],
            &FixedEnv,
        )
        .unwrap();
        assert!(prompt.starts_with("You explore src."));
        let env_pos = prompt.find("# Environment Context").unwrap();
        let rules_pos = prompt.find("# Important Rules").unwrap();
        assert!(env_pos < rules_pos);
        assert!(prompt.contains("complete_task"));
    }

    #[test]
    fn system_prompt_renders_tool_code_on_demand() {
        let def = definition("Tools:\n${tool_code}", true);
        let decls = vec![ToolDeclaration::bare("grep", "search")];
        let prompt = assemble_system_prompt(&def, &vars(&[]), &decls, &FixedEnv).unwrap();
        assert!(prompt.contains("\"grep\""));
        assert!(prompt.contains("\"parameters\""));
    }

    #[test]
    fn query_falls_back_to_default() {
        let def = definition("sys", false);
        assert_eq!(build_query(&def, &vars(&[])).unwrap(), DEFAULT_QUERY);
    }

    #[test]
    fn query_interpolates_inputs() {
        let mut def = definition("sys", false);
        def.prompt.query = Some("Objective: ${goal}".to_string());
        let q = build_query(&def, &vars(&[("goal", "say hello")])).unwrap();
        assert_eq!(q, "Objective: say hello");
    }
}
