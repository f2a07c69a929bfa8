pub mod bridge;
pub mod error;
pub mod filesystem;
pub mod workspace;

pub use bridge::{ToolBridge, ToolContext, ToolHandler};
pub use error::{ToolError, ToolResult};
pub use workspace::Workspace;
