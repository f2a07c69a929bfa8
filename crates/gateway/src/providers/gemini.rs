use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_stream::try_stream;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

use super::base::{ChunkStream, Provider, Usage};
use super::configs::GeminiProviderConfig;
use super::factory::ProviderKind;
use super::utils::{
    disabled_stream, ensure_success, into_chunk_stream, sanitize_function_name, sse_frames,
};
use crate::models::chunk::{ChatChunk, FinishReason};
use crate::models::message::Message;
use crate::models::request::{ChatRequest, ToolChoice, ToolChoiceMode};
use crate::models::role::Role;
use crate::models::tool::ToolCall;

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    config: GeminiProviderConfig,
}

impl GeminiProvider {
    pub fn new(config: GeminiProviderConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn messages_to_gemini_spec(messages: &[Message]) -> Vec<Value> {
        // functionResponse parts are keyed by name, not by call id
        let call_names: HashMap<&str, &str> = messages
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .map(|call| (call.id.as_str(), call.name.as_str()))
            .collect();

        messages
            .iter()
            .filter_map(|message| match message.role {
                Role::System => None,
                Role::User => Some(json!({
                    "role": "user",
                    "parts": [{ "text": message.content }],
                })),
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !message.content.is_empty() {
                        parts.push(json!({ "text": message.content }));
                    }
                    parts.extend(message.tool_calls.iter().map(|call| {
                        json!({ "functionCall": { "name": call.name, "args": call.arguments } })
                    }));
                    Some(json!({ "role": "model", "parts": parts }))
                }
                Role::Tool => {
                    let name = message
                        .tool_call_id
                        .as_deref()
                        .and_then(|id| call_names.get(id).copied());
                    match name {
                        Some(name) => {
                            let response = serde_json::from_str::<Value>(&message.content)
                                .ok()
                                .filter(Value::is_object)
                                .unwrap_or_else(|| json!({ "result": message.content }));
                            Some(json!({
                                "role": "user",
                                "parts": [{
                                    "functionResponse": { "name": name, "response": response }
                                }],
                            }))
                        }
                        None => Some(json!({
                            "role": "user",
                            "parts": [{ "text": format!("Tool result:\n{}", message.content) }],
                        })),
                    }
                }
            })
            .collect()
    }

    fn create_request_payload(request: &ChatRequest) -> Value {
        let mut payload = json!({
            "contents": Self::messages_to_gemini_spec(&request.messages),
        });

        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System && !m.content.is_empty())
            .map(|m| m.content.as_str())
            .collect();
        if !system.is_empty() {
            payload["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n\n") }] });
        }

        let mut generation = json!({});
        if let Some(temperature) = request.temperature {
            generation["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            generation["maxOutputTokens"] = json!(max_tokens);
        }
        if request.wants_json() {
            generation["responseMimeType"] = json!("application/json");
        }
        if generation.as_object().is_some_and(|g| !g.is_empty()) {
            payload["generationConfig"] = generation;
        }

        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": sanitize_function_name(&tool.name),
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect();
            payload["tools"] = json!([{ "functionDeclarations": declarations }]);

            if let Some(choice) = &request.tool_choice {
                let config = match choice {
                    ToolChoice::Mode(ToolChoiceMode::Auto) => json!({ "mode": "AUTO" }),
                    ToolChoice::Mode(ToolChoiceMode::None) => json!({ "mode": "NONE" }),
                    ToolChoice::Mode(ToolChoiceMode::Required) => json!({ "mode": "ANY" }),
                    ToolChoice::Named { name } => json!({
                        "mode": "ANY",
                        "allowedFunctionNames": [sanitize_function_name(name)],
                    }),
                };
                payload["toolConfig"] = json!({ "functionCallingConfig": config });
            }
        }

        payload
    }

    fn get_usage(data: &Value) -> Option<Usage> {
        let usage = data.get("usageMetadata").filter(|u| u.is_object())?;
        let count = |key: &str| {
            usage
                .get(key)
                .and_then(|v| v.as_u64())
                .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
        };
        Some(Usage::new(
            count("promptTokenCount"),
            count("candidatesTokenCount"),
            count("totalTokenCount"),
        ))
    }

    fn finish_reason(reason: &str, saw_function_call: bool) -> FinishReason {
        match reason {
            "MAX_TOKENS" => FinishReason::Length,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
                FinishReason::Error {
                    message: format!("response blocked by Gemini ({})", reason),
                }
            }
            _ if saw_function_call => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        }
    }
}

impl Provider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_configured(&self) -> bool {
        self.config.api_key().is_some()
    }

    fn chat(&self, request: &ChatRequest) -> ChunkStream {
        let Some(api_key) = self.config.api_key().map(str::to_string) else {
            return disabled_stream(self.kind(), "GEMINI_API_KEY is not set");
        };
        let payload = Self::create_request_payload(request);
        let model = request.model.as_deref().unwrap_or(&self.config.model);
        let url = self.config.url(&format!(
            "/v1beta/models/{}:streamGenerateContent?alt=sse",
            model
        ));
        let client = self.client.clone();

        into_chunk_stream(
            self.kind(),
            try_stream! {
                let response = client
                    .post(&url)
                    .header("x-goog-api-key", &api_key)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| anyhow!("request error: {}", e))?;
                let response = ensure_success(response).await?;

                let mut frames = Box::pin(sse_frames(response));
                let mut usage = None;
                let mut finish = None;
                let mut saw_function_call = false;

                while let Some(frame) = frames.next().await {
                    let frame = frame?;
                    let data: Value = serde_json::from_str(&frame.data)
                        .map_err(|e| anyhow!("invalid stream payload: {}", e))?;
                    if let Some(error) = data.get("error") {
                        Err(anyhow!("Gemini API error: {}", error["message"].as_str().unwrap_or("unknown error")))?;
                    }
                    if let Some(reported) = Self::get_usage(&data) {
                        usage = Some(reported);
                    }

                    let candidate = &data["candidates"][0];
                    if let Some(parts) = candidate["content"]["parts"].as_array() {
                        for part in parts {
                            if let Some(text) = part["text"].as_str() {
                                if !text.is_empty() {
                                    yield ChatChunk::text(text);
                                }
                            }
                            if let Some(name) = part["functionCall"]["name"].as_str() {
                                saw_function_call = true;
                                let args = part["functionCall"]
                                    .get("args")
                                    .cloned()
                                    .unwrap_or_else(|| json!({}));
                                yield ChatChunk::ToolCall(ToolCall::generated(name, args));
                            }
                        }
                    }
                    if let Some(reason) = candidate["finishReason"].as_str() {
                        finish = Some(reason.to_string());
                    }
                }

                let reason = match finish {
                    Some(reason) => Self::finish_reason(&reason, saw_function_call),
                    None if saw_function_call => FinishReason::ToolCalls,
                    None => FinishReason::Stop,
                };
                yield ChatChunk::Finish { reason, usage };
            },
        )
    }
}
