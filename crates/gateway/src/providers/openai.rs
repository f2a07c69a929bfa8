use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_stream::try_stream;
use futures::{stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};

use super::base::{ChunkStream, Provider, Usage};
use super::configs::OpenAiProviderConfig;
use super::factory::ProviderKind;
use super::utils::{
    disabled_stream, ensure_success, into_chunk_stream, messages_to_openai_spec,
    parse_tool_arguments, sse_frames, tools_to_openai_spec,
};
use crate::models::chunk::{ChatChunk, FinishReason};
use crate::models::request::{ChatRequest, ToolChoice, ToolChoiceMode};
use crate::models::tool::ToolCall;

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

/// Tool call fragments collected across deltas
#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PartialToolCall {
    fn into_tool_call(self) -> ToolCall {
        let arguments = parse_tool_arguments(&self.arguments);
        if self.id.is_empty() {
            ToolCall::generated(self.name, arguments)
        } else {
            ToolCall::new(self.id, self.name, arguments)
        }
    }
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Option<Usage> {
        let usage = data.get("usage").filter(|u| u.is_object())?;

        let count = |key: &str| {
            usage
                .get(key)
                .and_then(|v| v.as_u64())
                .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
        };
        Some(Usage::new(
            count("prompt_tokens"),
            count("completion_tokens"),
            count("total_tokens"),
        ))
    }

    fn finish_reason(reason: &str) -> FinishReason {
        match reason {
            "length" => FinishReason::Length,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::Error {
                message: "response blocked by the OpenAI content filter".to_string(),
            },
            _ => FinishReason::Stop,
        }
    }

    fn create_request_payload(&self, request: &ChatRequest) -> Result<Value> {
        let mut payload = json!({
            "model": request.model.as_deref().unwrap_or(&self.config.model),
            "messages": messages_to_openai_spec(&request.messages),
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if request.wants_json() {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        if !request.tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(&request.tools)?);
            if let Some(choice) = &request.tool_choice {
                payload["tool_choice"] = match choice {
                    ToolChoice::Mode(ToolChoiceMode::Auto) => json!("auto"),
                    ToolChoice::Mode(ToolChoiceMode::None) => json!("none"),
                    ToolChoice::Mode(ToolChoiceMode::Required) => json!("required"),
                    ToolChoice::Named { name } => json!({
                        "type": "function",
                        "function": { "name": name },
                    }),
                };
            }
        }

        Ok(payload)
    }
}

impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_configured(&self) -> bool {
        self.config.api_key().is_some()
    }

    fn chat(&self, request: &ChatRequest) -> ChunkStream {
        let Some(api_key) = self.config.api_key().map(str::to_string) else {
            return disabled_stream(self.kind(), "OPENAI_API_KEY is not set");
        };
        let payload = match self.create_request_payload(request) {
            Ok(payload) => payload,
            Err(e) => return into_chunk_stream(self.kind(), stream::once(async move { Err(e) })),
        };
        let client = self.client.clone();
        let url = self.config.url("/v1/chat/completions");

        into_chunk_stream(
            self.kind(),
            try_stream! {
                let response = client
                    .post(&url)
                    .bearer_auth(&api_key)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| anyhow!("request error: {}", e))?;
                let response = ensure_success(response).await?;

                let mut frames = Box::pin(sse_frames(response));
                let mut calls: BTreeMap<u64, PartialToolCall> = BTreeMap::new();
                let mut finish = None;
                let mut usage = None;

                while let Some(frame) = frames.next().await {
                    let frame = frame?;
                    if frame.data.trim() == "[DONE]" {
                        break;
                    }

                    let data: Value = serde_json::from_str(&frame.data)
                        .map_err(|e| anyhow!("invalid stream payload: {}", e))?;
                    if let Some(error) = data.get("error") {
                        Err(anyhow!("OpenAI API error: {}", error))?;
                    }
                    if let Some(reported) = Self::get_usage(&data) {
                        usage = Some(reported);
                    }

                    let Some(choice) = data["choices"].get(0) else {
                        continue;
                    };
                    if let Some(text) = choice["delta"]["content"].as_str() {
                        if !text.is_empty() {
                            yield ChatChunk::text(text);
                        }
                    }
                    if let Some(deltas) = choice["delta"]["tool_calls"].as_array() {
                        for delta in deltas {
                            let index = delta["index"].as_u64().unwrap_or_default();
                            let call = calls.entry(index).or_default();
                            if let Some(id) = delta["id"].as_str() {
                                call.id = id.to_string();
                            }
                            if let Some(name) = delta["function"]["name"].as_str() {
                                call.name.push_str(name);
                            }
                            if let Some(arguments) = delta["function"]["arguments"].as_str() {
                                call.arguments.push_str(arguments);
                            }
                        }
                    }
                    if let Some(reason) = choice["finish_reason"].as_str() {
                        finish = Some(Self::finish_reason(reason));
                    }
                }

                for call in calls.into_values() {
                    yield ChatChunk::ToolCall(call.into_tool_call());
                }
                yield ChatChunk::Finish {
                    reason: finish.unwrap_or(FinishReason::Stop),
                    usage,
                };
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;
    use crate::models::request::ResponseKind;
    use crate::models::tool::ToolSpec;
    use crate::providers::configs::HttpProviderConfig;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(events: &[Value]) -> String {
        let mut body: String = events
            .iter()
            .map(|event| format!("data: {}\n\n", event))
            .collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn setup_mock_server(response: ResponseTemplate) -> (MockServer, OpenAiProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test_api_key"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(response)
            .mount(&mock_server)
            .await;

        let config = HttpProviderConfig::new(mock_server.uri(), "gpt-4o-mini")
            .with_api_key("test_api_key");
        let provider = OpenAiProvider::new(config).unwrap();
        (mock_server, provider)
    }

    #[tokio::test]
    async fn test_stream_text_with_usage() -> Result<()> {
        let body = sse_body(&[
            json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": "Hello"}}]}),
            json!({"choices": [{"index": 0, "delta": {"content": " there"}}]}),
            json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 12, "completion_tokens": 2, "total_tokens": 14}}),
        ]);
        let (_server, provider) =
            setup_mock_server(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
                .await;

        let request = ChatRequest::new(vec![Message::user("Hello?")]);
        let chunks: Vec<ChatChunk> = provider.chat(&request).collect().await;

        assert_eq!(
            chunks,
            vec![
                ChatChunk::text("Hello"),
                ChatChunk::text(" there"),
                ChatChunk::Finish {
                    reason: FinishReason::Stop,
                    usage: Some(Usage::new(Some(12), Some(2), Some(14))),
                },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_assembles_tool_calls() -> Result<()> {
        let body = sse_body(&[
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "call_123", "type": "function",
                 "function": {"name": "get_weather", "arguments": ""}}
            ]}}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"location\":"}}
            ]}}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"San Francisco, CA\"}"}}
            ]}}]}),
            json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]}),
        ]);
        let (_server, provider) =
            setup_mock_server(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
                .await;

        let tool = ToolSpec::new(
            "get_weather",
            "Gets the current weather for a location",
            json!({
                "type": "object",
                "properties": {"location": {"type": "string"}},
                "required": ["location"]
            }),
        );
        let request = ChatRequest::new(vec![Message::user("What's the weather in San Francisco?")])
            .with_tools(vec![tool]);
        let chunks: Vec<ChatChunk> = provider.chat(&request).collect().await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[0],
            ChatChunk::ToolCall(ToolCall::new(
                "call_123",
                "get_weather",
                json!({"location": "San Francisco, CA"})
            ))
        );
        assert!(matches!(
            chunks[1],
            ChatChunk::Finish {
                reason: FinishReason::ToolCalls,
                ..
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_upstream_error_becomes_error_finish() -> Result<()> {
        let (_server, provider) = setup_mock_server(
            ResponseTemplate::new(429).set_body_string(r#"{"error":{"message":"slow down"}}"#),
        )
        .await;

        let request = ChatRequest::new(vec![Message::user("Hello?")]);
        let chunks: Vec<ChatChunk> = provider.chat(&request).collect().await;

        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            ChatChunk::Finish {
                reason: FinishReason::Error { message },
                ..
            } => {
                assert!(message.contains("429"));
                assert!(message.contains("slow down"));
            }
            other => panic!("unexpected chunk {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_disabled_without_api_key() {
        let provider =
            OpenAiProvider::new(HttpProviderConfig::new("http://127.0.0.1:9", "gpt-4o")).unwrap();
        assert!(!provider.is_configured());

        let request = ChatRequest::new(vec![Message::user("Hello?")]);
        let chunks: Vec<ChatChunk> = provider.chat(&request).collect().await;
        assert!(matches!(
            chunks.last(),
            Some(ChatChunk::Finish {
                reason: FinishReason::Disabled { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_payload_maps_options() -> Result<()> {
        let provider = OpenAiProvider::new(
            HttpProviderConfig::new("http://localhost", "gpt-4o-mini").with_api_key("k"),
        )?;
        let mut request = ChatRequest::new(vec![Message::user("x")])
            .with_response_format(ResponseKind::Json)
            .with_tools(vec![ToolSpec::new("fs_read", "read", json!({}))]);
        request.tool_choice = Some(ToolChoice::Named {
            name: "fs_read".into(),
        });
        request.max_tokens = Some(64);

        let payload = provider.create_request_payload(&request)?;
        assert_eq!(payload["model"], "gpt-4o-mini");
        assert_eq!(payload["stream_options"]["include_usage"], true);
        assert_eq!(payload["response_format"]["type"], "json_object");
        assert_eq!(payload["tools"][0]["function"]["name"], "fs_read");
        assert_eq!(payload["tool_choice"]["function"]["name"], "fs_read");
        assert_eq!(payload["max_tokens"], 64);
        assert!(payload.get("temperature").is_none());
        Ok(())
    }

    #[test]
    fn test_usage_counts_saturate() {
        let data = json!({"usage": {
            "prompt_tokens": 5_000_000_000u64,
            "completion_tokens": 3,
            "total_tokens": 5_000_000_003u64
        }});
        let usage = OpenAiProvider::get_usage(&data).unwrap();
        assert_eq!(usage.input_tokens, Some(u32::MAX));
        assert_eq!(usage.output_tokens, Some(3));
        assert_eq!(usage.total_tokens, Some(u32::MAX));
    }
}
