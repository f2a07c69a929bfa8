use serde::Serialize;
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Path escapes the workspace: {0}")]
    PathEscape(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
}

impl ToolError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::ToolNotFound(_) => "tool_not_found",
            ToolError::InvalidParameters(_) => "invalid_parameters",
            ToolError::PathEscape(_) => "path_escape",
            ToolError::ExecutionError(_) => "execution_error",
        }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;
