use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_stream::try_stream;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

use super::base::{ChunkStream, Provider, Usage};
use super::configs::AnthropicProviderConfig;
use super::factory::ProviderKind;
use super::utils::{
    disabled_stream, ensure_success, into_chunk_stream, parse_tool_arguments, sse_frames,
};
use crate::models::chunk::{ChatChunk, FinishReason};
use crate::models::message::Message;
use crate::models::request::{ChatRequest, ToolChoice, ToolChoiceMode};
use crate::models::role::Role;
use crate::models::tool::ToolCall;

pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const JSON_INSTRUCTION: &str = "Respond only with a single valid JSON value and no other text.";

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

struct PendingToolUse {
    id: String,
    name: String,
    input: String,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn system_prompt(request: &ChatRequest) -> String {
        let mut parts: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .filter(|c| !c.is_empty())
            .collect();
        if request.wants_json() {
            parts.push(JSON_INSTRUCTION);
        }
        parts.join("\n\n")
    }

    fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .filter_map(|message| match message.role {
                Role::System => None,
                Role::User => Some(json!({ "role": "user", "content": message.content })),
                Role::Assistant if message.tool_calls.is_empty() => {
                    Some(json!({ "role": "assistant", "content": message.content }))
                }
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": message.content }));
                    }
                    blocks.extend(message.tool_calls.iter().map(|call| {
                        json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        })
                    }));
                    Some(json!({ "role": "assistant", "content": blocks }))
                }
                Role::Tool => match &message.tool_call_id {
                    Some(id) => Some(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": id,
                            "content": message.content,
                        }],
                    })),
                    None => Some(json!({
                        "role": "user",
                        "content": format!("Tool result:\n{}", message.content),
                    })),
                },
            })
            .collect()
    }

    fn create_request_payload(&self, request: &ChatRequest) -> Value {
        let mut payload = json!({
            "model": request.model.as_deref().unwrap_or(&self.config.model),
            "messages": Self::messages_to_anthropic_spec(&request.messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
        });

        let system = Self::system_prompt(request);
        if !system.is_empty() {
            payload["system"] = json!(system);
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters,
                    })
                })
                .collect();
            payload["tools"] = json!(tools);
            if let Some(choice) = &request.tool_choice {
                payload["tool_choice"] = match choice {
                    ToolChoice::Mode(ToolChoiceMode::Auto) => json!({ "type": "auto" }),
                    ToolChoice::Mode(ToolChoiceMode::None) => json!({ "type": "none" }),
                    ToolChoice::Mode(ToolChoiceMode::Required) => json!({ "type": "any" }),
                    ToolChoice::Named { name } => json!({ "type": "tool", "name": name }),
                };
            }
        }

        payload
    }

    fn finish_reason(reason: &str) -> FinishReason {
        match reason {
            "max_tokens" => FinishReason::Length,
            "tool_use" => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        }
    }

    fn token_count(value: &Value) -> Option<u32> {
        value.as_u64().map(|v| u32::try_from(v).unwrap_or(u32::MAX))
    }
}

impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_configured(&self) -> bool {
        self.config.api_key().is_some()
    }

    fn chat(&self, request: &ChatRequest) -> ChunkStream {
        let Some(api_key) = self.config.api_key().map(str::to_string) else {
            return disabled_stream(self.kind(), "ANTHROPIC_API_KEY is not set");
        };
        let payload = self.create_request_payload(request);
        let client = self.client.clone();
        let url = self.config.url("/v1/messages");

        into_chunk_stream(
            self.kind(),
            try_stream! {
                let response = client
                    .post(&url)
                    .header("x-api-key", &api_key)
                    .header("anthropic-version", ANTHROPIC_API_VERSION)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| anyhow!("request error: {}", e))?;
                let response = ensure_success(response).await?;

                let mut frames = Box::pin(sse_frames(response));
                let mut pending: HashMap<u64, PendingToolUse> = HashMap::new();
                let mut input_tokens = None;
                let mut output_tokens = None;
                let mut finish = None;

                while let Some(frame) = frames.next().await {
                    let frame = frame?;
                    let data: Value = serde_json::from_str(&frame.data)
                        .map_err(|e| anyhow!("invalid stream payload: {}", e))?;
                    let index = data["index"].as_u64().unwrap_or_default();

                    match data["type"].as_str().unwrap_or_default() {
                        "message_start" => {
                            input_tokens = Self::token_count(&data["message"]["usage"]["input_tokens"]);
                        }
                        "content_block_start" => {
                            let block = &data["content_block"];
                            if block["type"] == "tool_use" {
                                pending.insert(index, PendingToolUse {
                                    id: block["id"].as_str().unwrap_or_default().to_string(),
                                    name: block["name"].as_str().unwrap_or_default().to_string(),
                                    input: String::new(),
                                });
                            }
                        }
                        "content_block_delta" => {
                            let delta = &data["delta"];
                            match delta["type"].as_str().unwrap_or_default() {
                                "text_delta" => {
                                    if let Some(text) = delta["text"].as_str() {
                                        yield ChatChunk::text(text);
                                    }
                                }
                                "input_json_delta" => {
                                    if let (Some(tool), Some(json)) =
                                        (pending.get_mut(&index), delta["partial_json"].as_str())
                                    {
                                        tool.input.push_str(json);
                                    }
                                }
                                _ => {}
                            }
                        }
                        "content_block_stop" => {
                            if let Some(tool) = pending.remove(&index) {
                                yield ChatChunk::ToolCall(ToolCall::new(
                                    tool.id,
                                    tool.name,
                                    parse_tool_arguments(&tool.input),
                                ));
                            }
                        }
                        "message_delta" => {
                            if let Some(reason) = data["delta"]["stop_reason"].as_str() {
                                finish = Some(Self::finish_reason(reason));
                            }
                            if let Some(tokens) = Self::token_count(&data["usage"]["output_tokens"]) {
                                output_tokens = Some(tokens);
                            }
                        }
                        "message_stop" => break,
                        "error" => {
                            let message = data["error"]["message"].as_str().unwrap_or("unknown error");
                            Err(anyhow!("Anthropic API error: {}", message))?;
                        }
                        _ => {}
                    }
                }

                yield ChatChunk::Finish {
                    reason: finish.unwrap_or(FinishReason::Stop),
                    usage: Some(Usage::new(input_tokens, output_tokens, None)),
                };
            },
        )
    }
}
