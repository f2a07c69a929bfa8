use serde::{Deserialize, Serialize};

use super::tool::ToolCall;
use crate::providers::base::Usage;

/// Why an adapter call ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    /// The provider has no credentials or local runtime
    Disabled { message: String },
    /// The upstream call failed; the message is client-safe
    Error { message: String },
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Disabled { .. } => "disabled",
            FinishReason::Error { .. } => "error",
        }
    }
}

/// One unit of the canonical provider output stream.
///
/// Adapters yield chunks in generation order and a `Finish` chunk is always the
/// last one they produce.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatChunk {
    Text(String),
    ToolCall(ToolCall),
    Finish {
        reason: FinishReason,
        usage: Option<Usage>,
    },
}

impl ChatChunk {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ChatChunk::Text(text.into())
    }

    pub fn finish(reason: FinishReason) -> Self {
        ChatChunk::Finish {
            reason,
            usage: None,
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Self::finish(FinishReason::Error {
            message: message.into(),
        })
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, ChatChunk::Finish { .. })
    }
}
