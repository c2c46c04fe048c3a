//! Declarations for the built-in non-interactive tool set.
//!
//! Hosts supply the implementations; these declarations fix the names and
//! argument schemas agents are prompted with.

use ferret_core::definition::ToolDeclaration;

pub fn ls() -> ToolDeclaration {
    ToolDeclaration::new(
        "ls",
        "List the entries of a directory.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Absolute path of the directory to list"}
            },
            "required": ["path"]
        }),
    )
}

pub fn read_file() -> ToolDeclaration {
    ToolDeclaration::new(
        "read_file",
        "Read the contents of a file.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Absolute path of the file"},
                "offset": {"type": "integer", "description": "First line to read (0-based)"},
                "limit": {"type": "integer", "description": "Maximum number of lines"}
            },
            "required": ["path"]
        }),
    )
}

pub fn grep() -> ToolDeclaration {
    ToolDeclaration::new(
        "grep",
        "Search file contents with a regular expression.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Regular expression to match"},
                "path": {"type": "string", "description": "Absolute path to search under"},
                "include": {"type": "string", "description": "Glob restricting the files searched"}
            },
            "required": ["pattern"]
        }),
    )
}

pub fn glob() -> ToolDeclaration {
    ToolDeclaration::new(
        "glob",
        "Find files matching a glob pattern.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Glob pattern, e.g. src/**/*.rs"},
                "path": {"type": "string", "description": "Absolute path to search under"}
            },
            "required": ["pattern"]
        }),
    )
}

pub fn read_many_files() -> ToolDeclaration {
    ToolDeclaration::new(
        "read_many_files",
        "Read several files in one call.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "paths": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Absolute paths of the files to read"
                }
            },
            "required": ["paths"]
        }),
    )
}

pub fn memory() -> ToolDeclaration {
    ToolDeclaration::new(
        "memory",
        "Save a fact to the agent's memory file.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "fact": {"type": "string", "description": "The fact to remember"}
            },
            "required": ["fact"]
        }),
    )
}

pub fn shell() -> ToolDeclaration {
    ToolDeclaration::new(
        "shell",
        "Run a shell command and return its output.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The command to run"},
                "directory": {"type": "string", "description": "Absolute working directory"}
            },
            "required": ["command"]
        }),
    )
}

pub fn web_search() -> ToolDeclaration {
    ToolDeclaration::new(
        "web_search",
        "Search the web and return result snippets.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The search query"}
            },
            "required": ["query"]
        }),
    )
}

/// All built-in declarations, in canonical order.
pub fn all() -> Vec<ToolDeclaration> {
    vec![
        ls(),
        read_file(),
        grep(),
        glob(),
        read_many_files(),
        memory(),
        shell(),
        web_search(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferret_core::allowlist::is_allow_listed;

    #[test]
    fn every_builtin_is_allow_listed() {
        for declaration in all() {
            assert!(
                is_allow_listed(&declaration.name),
                "{} missing from the allow-list",
                declaration.name
            );
        }
    }

    #[test]
    fn schemas_compile() {
        for declaration in all() {
            assert!(
                jsonschema::Validator::new(&declaration.parameters).is_ok(),
                "{} schema failed to compile",
                declaration.name
            );
        }
    }

    #[test]
    fn required_fields_are_declared_properties() {
        for declaration in all() {
            let params = &declaration.parameters;
            let properties = params["properties"].as_object().unwrap();
            if let Some(required) = params.get("required").and_then(|r| r.as_array()) {
                for field in required {
                    assert!(
                        properties.contains_key(field.as_str().unwrap()),
                        "{}: required field {} not declared",
                        declaration.name,
                        field
                    );
                }
            }
        }
    }
}
