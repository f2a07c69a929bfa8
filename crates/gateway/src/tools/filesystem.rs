use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::bridge::{ToolBridge, ToolContext, ToolHandler};
use super::error::{ToolError, ToolResult};
use super::workspace::Workspace;

fn string_param<'a>(args: &'a Value, name: &str) -> ToolResult<&'a str> {
    args.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters(format!("Missing '{}' parameter", name)))
}

fn require_object(args: &Value) -> ToolResult<()> {
    if args.is_object() {
        Ok(())
    } else {
        Err(ToolError::InvalidParameters(format!(
            "Expected an object of arguments, got {}",
            args
        )))
    }
}

pub struct FsWrite {
    workspace: Arc<Workspace>,
}

#[async_trait]
impl ToolHandler for FsWrite {
    async fn call(&self, args: Value, _ctx: &ToolContext) -> ToolResult<Value> {
        require_object(&args)?;
        let path = string_param(&args, "path")?;
        let content = string_param(&args, "content")?;

        let bytes = self.workspace.write(path, content).await?;
        Ok(json!({ "bytes": bytes }))
    }

    fn description(&self) -> &str {
        "Write text to a file in the workspace, creating parent directories as needed"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Workspace-relative file path"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }
}

pub struct FsRead {
    workspace: Arc<Workspace>,
}

#[async_trait]
impl ToolHandler for FsRead {
    async fn call(&self, args: Value, _ctx: &ToolContext) -> ToolResult<Value> {
        require_object(&args)?;
        let path = string_param(&args, "path")?;

        let content = self.workspace.read(path).await?;
        Ok(json!({ "content": content }))
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Workspace-relative file path"}
            },
            "required": ["path"]
        })
    }
}

pub struct FsList {
    workspace: Arc<Workspace>,
}

#[async_trait]
impl ToolHandler for FsList {
    async fn call(&self, args: Value, _ctx: &ToolContext) -> ToolResult<Value> {
        if !args.is_null() {
            require_object(&args)?;
        }
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");

        let entries = self.workspace.list(path).await?;
        Ok(json!({ "entries": entries }))
    }

    fn description(&self) -> &str {
        "List a workspace directory; directories end with '/'"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory, defaults to the root"}
            }
        })
    }
}

/// Returns its arguments unchanged
pub struct Echo;

#[async_trait]
impl ToolHandler for Echo {
    async fn call(&self, args: Value, _ctx: &ToolContext) -> ToolResult<Value> {
        Ok(args)
    }

    fn description(&self) -> &str {
        "Return the given arguments unchanged"
    }
}

/// Install `fs_write`, `fs_read`, `fs_list` and `echo`
pub fn register_builtin_tools(bridge: &mut ToolBridge, workspace: Arc<Workspace>) {
    bridge
        .register(
            "fs_write",
            FsWrite {
                workspace: workspace.clone(),
            },
        )
        .register(
            "fs_read",
            FsRead {
                workspace: workspace.clone(),
            },
        )
        .register("fs_list", FsList { workspace })
        .register("echo", Echo);
}
