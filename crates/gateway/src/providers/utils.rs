use std::collections::HashSet;

use anyhow::{anyhow, bail, Result};
use async_stream::stream;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Response;
use serde_json::{json, Value};
use tracing::warn;

use super::base::ChunkStream;
use super::factory::ProviderKind;
use crate::models::chunk::{ChatChunk, FinishReason};
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::ToolSpec;

lazy_static! {
    static ref INVALID_FUNCTION_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
}

const BODY_EXCERPT_CHARS: usize = 300;

/// Wrap a fallible adapter stream into the canonical chunk contract.
///
/// An `Err` item becomes a terminal error finish, nothing is forwarded after
/// the first finish, and a stream that ends without one gets a `stop` finish.
pub fn into_chunk_stream<S>(provider: ProviderKind, inner: S) -> ChunkStream
where
    S: Stream<Item = Result<ChatChunk>> + Send + 'static,
{
    Box::pin(stream! {
        let mut inner = Box::pin(inner);
        let mut finished = false;

        while let Some(item) = inner.next().await {
            match item {
                Ok(chunk) => {
                    finished = chunk.is_finish();
                    yield chunk;
                    if finished {
                        break;
                    }
                }
                Err(e) => {
                    warn!(provider = %provider, error = %e, "provider stream failed");
                    yield ChatChunk::error(format!("{} request failed: {}", provider, e));
                    finished = true;
                    break;
                }
            }
        }

        if !finished {
            yield ChatChunk::finish(FinishReason::Stop);
        }
    })
}

/// The deterministic sequence an unconfigured provider produces
pub fn disabled_stream(provider: ProviderKind, reason: &str) -> ChunkStream {
    let message = format!("{} provider disabled: {}", provider, reason);
    Box::pin(futures::stream::iter(vec![
        ChatChunk::text(format!("[{}]", message)),
        ChatChunk::finish(FinishReason::Disabled { message }),
    ]))
}

/// Fail with the status and a body excerpt unless the response is 2xx
pub async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(BODY_EXCERPT_CHARS).collect();
    bail!("upstream returned {}: {}", status, excerpt.trim())
}

/// One server-sent event as framed by the upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Turn a streaming HTTP body into SSE frames, skipping events without data
pub fn sse_frames(response: Response) -> impl Stream<Item = Result<SseFrame>> + Send {
    response
        .bytes_stream()
        .eventsource()
        .filter_map(|event| async move {
            match event {
                Ok(event) if event.data.is_empty() => None,
                Ok(event) => Some(Ok(SseFrame {
                    event: event.event,
                    data: event.data,
                })),
                Err(e) => Some(Err(anyhow!("stream interrupted: {}", e))),
            }
        })
}

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match (&message.role, &message.tool_call_id) {
            (Role::Tool, Some(id)) => json!({
                "role": "tool",
                "content": message.content,
                "tool_call_id": id,
            }),
            // a result without a call id can only be shown to the model as text
            (Role::Tool, None) => json!({
                "role": "user",
                "content": format!("Tool result:\n{}", message.content),
            }),
            (role, _) => {
                let mut converted = json!({
                    "role": role,
                    "content": message.content,
                });
                if !message.tool_calls.is_empty() {
                    let calls: Vec<Value> = message
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": sanitize_function_name(&call.name),
                                    "arguments": call.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    converted["tool_calls"] = json!(calls);
                    if message.content.is_empty() {
                        converted["content"] = Value::Null;
                    }
                }
                converted
            }
        })
        .collect()
}

/// Convert ToolSpecs to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[ToolSpec]) -> Result<Vec<Value>> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": sanitize_function_name(&tool.name),
                "description": tool.description,
                "parameters": tool.parameters,
            }
        }));
    }

    Ok(result)
}

pub fn sanitize_function_name(name: &str) -> String {
    INVALID_FUNCTION_CHARS.replace_all(name, "_").to_string()
}

/// Parse streamed tool arguments. Unparseable text is passed through as a
/// string so the tool reports it as invalid parameters.
pub fn parse_tool_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
