pub mod traits;

pub use traits::{
    TOOL_ERROR_SENTINEL, ToolRouter, internal_failure_output, is_tool_error, tool_error_output,
};
