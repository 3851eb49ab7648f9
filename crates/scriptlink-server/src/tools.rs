//! The `execute` tool: descriptor, argument parsing and result text.

use std::time::Duration;

use serde_json::{Map, Value, json};

use scriptlink_core::ExecuteResult;

use crate::protocol::{CallToolResult, ToolDescriptor};

/// Name of the only tool this server exposes.
pub const EXECUTE_TOOL: &str = "execute";

/// Timeout applied when `tools/call` omits one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const EXECUTE_DESCRIPTION: &str = r#"Compile and run a Rust script inside the host process and return its result.

The script must define exactly one entry point named `execute` taking a `&ScriptContext` and returning a `Result`. Any of these shapes works, optionally as `async fn`:

```rust
pub fn execute(ctx: &ScriptContext) -> Result<i64, String> {
    Ok(6 * 7)
}
```

```rust
pub struct Script;

impl Script {
    pub fn execute(ctx: &ScriptContext) -> Result<Value, String> { ... }
}
```

```rust
#[derive(Default)]
pub struct Job { count: u32 }

impl Job {
    pub async fn execute(&self, ctx: &ScriptContext) -> Result<u32, String> { ... }
}
```

`ScriptContext` offers:
- `is_cancelled()`, `check_cancelled()?` and `sleep(duration)?` to honour timeouts and cancellation. Long-running scripts must check these; nothing is forcibly stopped.
- `query(name)` returning the raw JSON of a host value, plus `query_str`, `query_i64`, `query_f64`, `query_bool` and `require(name)?`. The request itself publishes `session.id` and `request.timeout_secs`.

The `Ok` value is converted into `Value` (numbers, strings, booleans, vectors, maps, options) and returned as JSON. An `Err` or a panic is reported as `Kind: message` followed by a trace. Compiler errors are listed with script line and column."#;

/// Descriptor listed by `tools/list`.
pub fn execute_tool() -> ToolDescriptor {
    ToolDescriptor {
        name: EXECUTE_TOOL,
        description: EXECUTE_DESCRIPTION,
        input_schema: json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Rust source defining exactly one `execute` entry point"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Seconds to wait for the script before reporting a timeout",
                    "default": DEFAULT_TIMEOUT_SECS,
                    "minimum": 1
                }
            },
            "required": ["code"]
        }),
    }
}

/// Validated arguments of an `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteArgs {
    pub code: String,
    pub timeout: Duration,
}

/// Pull `code` and `timeout` out of the call arguments.
///
/// The error is the text reported back to the client.
pub fn parse_execute_args(arguments: Option<&Map<String, Value>>) -> Result<ExecuteArgs, String> {
    let empty = Map::new();
    let arguments = arguments.unwrap_or(&empty);

    let code = match arguments.get("code") {
        Some(Value::String(code)) if !code.trim().is_empty() => code.clone(),
        _ => return Err("Missing 'code' argument".to_string()),
    };

    let timeout_secs = match arguments.get("timeout") {
        None | Some(Value::Null) => DEFAULT_TIMEOUT_SECS,
        Some(value) => match value.as_u64() {
            Some(secs) if secs > 0 => secs,
            _ => return Err(format!("Invalid 'timeout' argument: expected a positive integer, got {value}")),
        },
    };

    Ok(ExecuteArgs {
        code,
        timeout: Duration::from_secs(timeout_secs),
    })
}

/// Turn a controller outcome into the text block returned to the client.
pub fn format_execute_result(result: &ExecuteResult) -> CallToolResult {
    match result {
        ExecuteResult::Completed { value, .. } => {
            let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            CallToolResult::text(text, false)
        }
        ExecuteResult::Failure { message, .. } => CallToolResult::text(message.clone(), true),
        ExecuteResult::CompilationFailed(err) => CallToolResult::text(err.render(), true),
    }
}

pub fn unknown_tool(name: &str) -> CallToolResult {
    CallToolResult::text(format!("Unknown tool: {name}"), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Content;
    use scriptlink_core::{CompilationError, Diagnostic, FailureKind, SessionId};

    fn args(value: Value) -> Result<ExecuteArgs, String> {
        parse_execute_args(value.as_object())
    }

    fn text(result: &CallToolResult) -> &str {
        match &result.content[0] {
            Content::Text { text } => text,
        }
    }

    #[test]
    fn test_descriptor_schema() {
        let tool = execute_tool();
        assert_eq!(tool.name, "execute");
        assert!(tool.description.contains("ScriptContext"));
        assert_eq!(tool.input_schema["required"], json!(["code"]));
        assert_eq!(tool.input_schema["properties"]["code"]["type"], "string");
        assert_eq!(tool.input_schema["properties"]["timeout"]["type"], "integer");
        assert_eq!(tool.input_schema["properties"]["timeout"]["default"], 30);
    }

    #[test]
    fn test_parse_defaults_timeout() {
        let parsed = args(json!({"code": "pub fn execute() {}"})).unwrap();
        assert_eq!(parsed.timeout, Duration::from_secs(30));

        let parsed = args(json!({"code": "x", "timeout": null})).unwrap();
        assert_eq!(parsed.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_explicit_timeout() {
        let parsed = args(json!({"code": "x", "timeout": 5})).unwrap();
        assert_eq!(parsed.code, "x");
        assert_eq!(parsed.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_rejects_missing_code() {
        assert_eq!(args(json!({})).unwrap_err(), "Missing 'code' argument");
        assert_eq!(args(json!({"code": "   "})).unwrap_err(), "Missing 'code' argument");
        assert_eq!(args(json!({"code": 7})).unwrap_err(), "Missing 'code' argument");
        assert_eq!(parse_execute_args(None).unwrap_err(), "Missing 'code' argument");
    }

    #[test]
    fn test_parse_rejects_bad_timeout() {
        for timeout in [json!(0), json!(-3), json!(1.5), json!("10")] {
            let err = args(json!({"code": "x", "timeout": timeout})).unwrap_err();
            assert!(err.starts_with("Invalid 'timeout' argument"), "{err}");
        }
    }

    #[test]
    fn test_format_completed_is_pretty_json() {
        let result = ExecuteResult::Completed {
            session_id: SessionId::new(),
            value: json!({"a": 1}),
        };
        let formatted = format_execute_result(&result);
        assert!(!formatted.is_error);
        assert_eq!(text(&formatted), "{\n  \"a\": 1\n}");

        let scalar = ExecuteResult::Completed {
            session_id: SessionId::new(),
            value: json!(42),
        };
        assert_eq!(text(&format_execute_result(&scalar)), "42");
    }

    #[test]
    fn test_format_failures_are_flagged() {
        let failure = ExecuteResult::Failure {
            kind: FailureKind::Runtime,
            message: "Boom: failed\n   at execute".to_string(),
            session_id: None,
        };
        let formatted = format_execute_result(&failure);
        assert!(formatted.is_error);
        assert!(text(&formatted).starts_with("Boom: failed"));

        let compile = ExecuteResult::CompilationFailed(CompilationError::diagnostics(vec![
            Diagnostic::at("expected expression", 2, 13),
        ]));
        let formatted = format_execute_result(&compile);
        assert!(formatted.is_error);
        assert_eq!(
            text(&formatted),
            "Compilation failed:\n  Line 2, column 13: expected expression"
        );
    }

    #[test]
    fn test_unknown_tool_text() {
        let result = unknown_tool("shell");
        assert!(result.is_error);
        assert_eq!(text(&result), "Unknown tool: shell");
    }
}
