use serde::Serialize;
use serde_json::{json, Value};

use super::tool::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
/// Which part of the pipeline an `error` event came from
pub enum ErrorScope {
    Provider,
    Tool,
    Gateway,
}

/// Token and cost accounting for one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost_usd: f64,
}

/// A wire-level event emitted to the client.
///
/// Within one response `tool_call` precedes its `tool_result` (or `error`),
/// `usage` precedes `done`, and `done` is always the single last event.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Token {
        text: String,
    },
    ToolCall(ToolCall),
    ToolResult {
        id: String,
        name: String,
        result: Value,
    },
    Error {
        message: String,
        scope: ErrorScope,
        id: Option<String>,
    },
    Usage(UsageReport),
    Done {
        finish_reason: String,
    },
}

impl GatewayEvent {
    pub fn token<S: Into<String>>(text: S) -> Self {
        GatewayEvent::Token { text: text.into() }
    }

    pub fn error<S: Into<String>>(scope: ErrorScope, message: S) -> Self {
        GatewayEvent::Error {
            message: message.into(),
            scope,
            id: None,
        }
    }

    pub fn tool_error<S: Into<String>>(call: &ToolCall, message: S) -> Self {
        GatewayEvent::Error {
            message: message.into(),
            scope: ErrorScope::Tool,
            id: Some(call.id.clone()),
        }
    }

    /// SSE `event:` name
    pub fn name(&self) -> &'static str {
        match self {
            GatewayEvent::Token { .. } => "token",
            GatewayEvent::ToolCall(_) => "tool_call",
            GatewayEvent::ToolResult { .. } => "tool_result",
            GatewayEvent::Error { .. } => "error",
            GatewayEvent::Usage(_) => "usage",
            GatewayEvent::Done { .. } => "done",
        }
    }

    /// SSE `data:` payload
    pub fn data(&self) -> Value {
        match self {
            GatewayEvent::Token { text } => json!({ "text": text }),
            GatewayEvent::ToolCall(call) => json!({
                "id": call.id,
                "name": call.name,
                "args": call.arguments,
            }),
            GatewayEvent::ToolResult { id, name, result } => json!({
                "id": id,
                "name": name,
                "result": result,
            }),
            GatewayEvent::Error { message, scope, id } => {
                let mut data = json!({ "message": message, "scope": scope });
                if let Some(id) = id {
                    data["id"] = json!(id);
                }
                data
            }
            GatewayEvent::Usage(report) => json!(report),
            GatewayEvent::Done { finish_reason } => json!({ "finish_reason": finish_reason }),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, GatewayEvent::Done { .. })
    }
}
