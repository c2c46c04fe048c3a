//! Tool-call extraction from free-form model text.
//!
//! Used by the local-model path only. JSON is tried first; a regex pass over
//! `name(key=value, ...)` patterns is the fallback. An empty result is a
//! signal to the caller (fallback completion), not an error.

use crate::types::{call_id_for, ToolInvocation};
use regex::Regex;
use serde_json::{Map, Number, Value};

/// Parser for tool invocations embedded in model text.
pub struct ToolCallParser {
    call_pattern: Regex,
    arg_pattern: Regex,
}

impl ToolCallParser {
    pub fn new() -> Self {
        Self {
            call_pattern: Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)")
                .expect("call pattern"),
            arg_pattern: Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)\s*=\s*("([^"]*)"|'([^']*)'|[^,]+)"#)
                .expect("arg pattern"),
        }
    }

    /// Extract tool invocations from `text`, assigning call-ids derived from
    /// `prompt_id`.
    pub fn parse(&self, text: &str, prompt_id: &str) -> Vec<ToolInvocation> {
        let stripped = strip_code_fences(text);

        if let Some(calls) = parse_json_calls(&stripped, prompt_id) {
            return calls;
        }

        self.parse_with_regex(&stripped, prompt_id)
    }

    fn parse_with_regex(&self, text: &str, prompt_id: &str) -> Vec<ToolInvocation> {
        // A wrapping list is stripped before scanning.
        let text = text
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']');

        let mut calls = Vec::new();
        for captures in self.call_pattern.captures_iter(text) {
            let name = captures[1].to_string();
            let mut args = Map::new();
            for arg in self.arg_pattern.captures_iter(&captures[2]) {
                let key = arg[1].to_string();
                let value = if let Some(double) = arg.get(3) {
                    Value::String(double.as_str().to_string())
                } else if let Some(single) = arg.get(4) {
                    Value::String(single.as_str().to_string())
                } else {
                    coerce_bare(arg[2].trim())
                };
                args.insert(key, value);
            }
            calls.push(ToolInvocation::new(
                call_id_for(prompt_id, calls.len()),
                name,
                args,
            ));
        }
        calls
    }
}

impl Default for ToolCallParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove Markdown code fences and isolate the outermost JSON payload.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        // drop an optional language tag on the fence line
        let body = match rest.split_once('\n') {
            Some((_, body)) => body,
            None => rest,
        };
        let body = body.trim_end();
        let body = body.strip_suffix("```").unwrap_or(body);
        return body.trim().to_string();
    }

    // Isolate the outermost object or array when surrounded by prose.
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                let candidate = &trimmed[start..=end];
                if serde_json::from_str::<Value>(candidate).is_ok() {
                    return candidate.to_string();
                }
            }
        }
    }
    trimmed.to_string()
}

fn parse_json_calls(text: &str, prompt_id: &str) -> Option<Vec<ToolInvocation>> {
    let value: Value = serde_json::from_str(text).ok()?;
    let objects: Vec<&Map<String, Value>> = match &value {
        Value::Object(obj) => vec![obj],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => return None,
    };
    if objects.is_empty() {
        return None;
    }

    let mut calls = Vec::with_capacity(objects.len());
    for (index, obj) in objects.iter().enumerate() {
        let name = obj.get("name")?.as_str()?.to_string();
        let args = match obj.get("parameters") {
            Some(Value::Object(params)) => params.clone(),
            Some(_) | None => Map::new(),
        };
        calls.push(ToolInvocation::new(
            call_id_for(prompt_id, index),
            name,
            args,
        ));
    }
    Some(calls)
}

/// Coerce a bare (unquoted) argument value: number, then boolean, then
/// string. The coercion is lossy for strings that look like literals; that
/// matches the wire behavior the local models were tuned against.
fn coerce_bare(raw: &str) -> Value {
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = raw.parse::<f64>() {
        if let Some(num) = Number::from_f64(float) {
            return Value::Number(num);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ToolCallParser {
        ToolCallParser::new()
    }

    #[test]
    fn parses_single_json_object() {
        let calls = parser().parse(
            r#"{"name": "shell", "parameters": {"command": "echo hi"}}"#,
            "a#1",
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "shell");
        assert_eq!(calls[0].args["command"], "echo hi");
        assert_eq!(calls[0].call_id, "a#1-0");
    }

    #[test]
    fn parses_json_array() {
        let calls = parser().parse(
            r#"[{"name": "ls", "parameters": {}}, {"name": "grep", "parameters": {"pattern": "fn"}}]"#,
            "a#2",
        );
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].call_id, "a#2-0");
        assert_eq!(calls[1].call_id, "a#2-1");
        assert_eq!(calls[1].args["pattern"], "fn");
    }

    #[test]
    fn fenced_json_equals_bare_json() {
        let bare = r#"{"name": "ls", "parameters": {"path": "/tmp"}}"#;
        let fenced = format!("```json\n{bare}\n```");
        let from_bare = parser().parse(bare, "p#1");
        let from_fenced = parser().parse(&fenced, "p#1");
        assert_eq!(from_bare, from_fenced);
    }

    #[test]
    fn json_roundtrip_identity() {
        let original = serde_json::json!({
            "name": "read_file",
            "parameters": {"path": "/etc/hosts", "limit": 10}
        });
        let calls = parser().parse(&original.to_string(), "p#3");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(
            Value::Object(calls[0].args.clone()),
            original["parameters"]
        );
    }

    #[test]
    fn json_missing_parameters_yields_empty_args() {
        let calls = parser().parse(r#"{"name": "ls"}"#, "p#1");
        assert_eq!(calls.len(), 1);
        assert!(calls[0].args.is_empty());
    }

    #[test]
    fn json_embedded_in_prose_is_isolated() {
        let text = "I will now run a tool.\n{\"name\": \"ls\", \"parameters\": {}}\nDone.";
        let calls = parser().parse(text, "p#1");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ls");
    }

    #[test]
    fn regex_fallback_quoted_args() {
        let calls = parser().parse(r#"shell(command="echo hi")"#, "p#1");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "shell");
        assert_eq!(calls[0].args["command"], "echo hi");
    }

    #[test]
    fn regex_fallback_single_quotes_and_multiple_args() {
        let calls = parser().parse("grep(pattern='fn main', path='src')", "p#1");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args["pattern"], "fn main");
        assert_eq!(calls[0].args["path"], "src");
    }

    #[test]
    fn regex_fallback_coerces_bare_values() {
        let calls = parser().parse("read_file(limit=10, follow=true, ratio=0.5, path=src)", "p#1");
        let args = &calls[0].args;
        assert_eq!(args["limit"], 10);
        assert_eq!(args["follow"], true);
        assert_eq!(args["ratio"], 0.5);
        assert_eq!(args["path"], "src");
    }

    #[test]
    fn regex_fallback_strips_list_wrapping() {
        let calls = parser().parse("[ls(), grep(pattern=\"x\")]", "p#4");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "ls");
        assert!(calls[0].args.is_empty());
        assert_eq!(calls[1].name, "grep");
    }

    #[test]
    fn empty_result_is_a_signal_not_an_error() {
        let calls = parser().parse("I could not decide what to do.", "p#1");
        assert!(calls.is_empty());
    }

    #[test]
    fn call_ids_are_stable_and_unique() {
        let calls = parser().parse("[a(), b(), c()]", "p#9");
        let ids: Vec<&str> = calls.iter().map(|c| c.call_id.as_str()).collect();
        assert_eq!(ids, vec!["p#9-0", "p#9-1", "p#9-2"]);
    }
}
