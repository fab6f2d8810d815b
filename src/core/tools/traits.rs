use serde_json::{Map, Value, json};
use std::future::Future;
use std::pin::Pin;

/// Prefix a router puts on output that describes a failed invocation.
pub const TOOL_ERROR_SENTINEL: &str = "Tool invocation error";

/// Executes one whitelisted tool.
///
/// Routers may report failure either as `Err` or as an output string that
/// starts with [`TOOL_ERROR_SENTINEL`]; callers treat both as a failed task.
pub trait ToolRouter: Send + Sync {
    fn invoke<'a>(
        &'a self,
        tool: &'a str,
        args: &'a Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}

pub fn is_tool_error(output: &str) -> bool {
    output.starts_with(TOOL_ERROR_SENTINEL)
}

pub fn tool_error_output(message: impl std::fmt::Display) -> String {
    format!("{TOOL_ERROR_SENTINEL}: {message}")
}

/// Error envelope for tool tasks that fail before the router is reached.
pub fn internal_failure_output(tool: &str, code: &str, message: &str, details: Value) -> String {
    json!({
        "ok": false,
        "tool": tool,
        "data": {},
        "error": {
            "code": code,
            "message": message,
            "details": details,
        },
    })
    .to_string()
}
