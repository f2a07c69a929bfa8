use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::factory::ProviderKind;
use crate::models::chunk::ChatChunk;
use crate::models::request::ChatRequest;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<u32>,
        output_tokens: Option<u32>,
        total_tokens: Option<u32>,
    ) -> Self {
        let total_tokens = total_tokens.or(match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Fill in counts the other side reported and this one did not
    pub fn merge(self, other: Usage) -> Usage {
        Usage::new(
            self.input_tokens.or(other.input_tokens),
            self.output_tokens.or(other.output_tokens),
            self.total_tokens.or(other.total_tokens),
        )
    }
}

/// Canonical chunk sequence produced by an adapter
pub type ChunkStream = BoxStream<'static, ChatChunk>;

/// Base trait for AI providers (OpenAI, Anthropic, etc)
///
/// `chat` is lazy: no upstream work happens until the returned stream is
/// polled, and dropping the stream cancels whatever is in flight. The stream
/// never fails; upstream problems arrive as a terminal error finish chunk.
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Model used when the request does not name one
    fn model(&self) -> &str;

    /// Whether credentials or a local runtime are available
    fn is_configured(&self) -> bool;

    fn chat(&self, request: &ChatRequest) -> ChunkStream;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    #[test]
    fn test_usage_creation() {
        let usage = Usage::new(Some(10), Some(20), Some(30));
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(20));
        assert_eq!(usage.total_tokens, Some(30));
    }

    #[test]
    fn test_usage_total_is_derived() {
        let usage = Usage::new(Some(10), Some(20), None);
        assert_eq!(usage.total_tokens, Some(30));

        let usage = Usage::new(Some(10), None, None);
        assert_eq!(usage.total_tokens, None);
    }

    #[test]
    fn test_usage_merge() {
        let start = Usage::new(Some(12), None, None);
        let end = Usage::new(None, Some(8), None);
        assert_eq!(start.merge(end), Usage::new(Some(12), Some(8), Some(20)));
    }

    #[test]
    fn test_usage_serialization() -> Result<()> {
        let usage = Usage::new(Some(10), Some(20), Some(30));
        let serialized = serde_json::to_string(&usage)?;
        let deserialized: Usage = serde_json::from_str(&serialized)?;

        assert_eq!(usage, deserialized);

        let json_value: serde_json::Value = serde_json::from_str(&serialized)?;
        assert_eq!(json_value["input_tokens"], json!(10));
        assert_eq!(json_value["output_tokens"], json!(20));
        assert_eq!(json_value["total_tokens"], json!(30));

        Ok(())
    }
}
