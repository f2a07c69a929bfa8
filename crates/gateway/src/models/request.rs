use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::Message;
use super::role::Role;
use super::tool::ToolSpec;
use crate::errors::{GatewayError, GatewayResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    #[default]
    Text,
    #[serde(alias = "json_object")]
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    Auto,
    None,
    Required,
}

/// How the model may use the advertised tools: a mode string or `{"name": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(ToolChoiceMode),
    Named { name: String },
}

/// A chat request as received by the gateway. Read-only once admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Capability name -> required level, checked before any generation
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requires: BTreeMap<String, Value>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            provider: None,
            model: None,
            temperature: None,
            max_tokens: None,
            response_format: None,
            tools: Vec::new(),
            tool_choice: None,
            requires: BTreeMap::new(),
        }
    }

    pub fn with_response_format(mut self, kind: ResponseKind) -> Self {
        self.response_format = Some(ResponseFormat { kind });
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_requirement<S: Into<String>>(mut self, capability: S, level: Value) -> Self {
        self.requires.insert(capability.into(), level);
        self
    }

    /// Structural checks that serde cannot express
    pub fn validate(&self) -> GatewayResult<()> {
        if self.messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "'messages' must contain at least one message".into(),
            ));
        }

        let mut names = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(GatewayError::InvalidRequest("tool names must not be empty".into()));
            }
            if !names.insert(tool.name.as_str()) {
                return Err(GatewayError::InvalidRequest(format!(
                    "duplicate tool name: {}",
                    tool.name
                )));
            }
        }

        if let Some(temperature) = self.temperature {
            if !temperature.is_finite() || temperature < 0.0 {
                return Err(GatewayError::InvalidRequest(format!(
                    "invalid temperature: {}",
                    temperature
                )));
            }
        }

        Ok(())
    }

    pub fn wants_json(&self) -> bool {
        matches!(
            self.response_format,
            Some(ResponseFormat {
                kind: ResponseKind::Json
            })
        )
    }

    /// Whether tools may be offered to the model at all
    pub fn tools_enabled(&self) -> bool {
        !self.tools.is_empty()
            && !matches!(self.tool_choice, Some(ToolChoice::Mode(ToolChoiceMode::None)))
    }

    /// Text of the most recent user message, empty if there is none
    pub fn last_user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_request() {
        let request: ChatRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hello world"}]
        }))
        .unwrap();
        assert_eq!(request.messages.len(), 1);
        assert!(!request.wants_json());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_missing_messages_fails_to_parse() {
        let result: Result<ChatRequest, _> = serde_json::from_value(json!({"model": "gpt-4o"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_messages_is_invalid() {
        let request = ChatRequest::new(vec![]);
        assert!(matches!(
            request.validate(),
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_duplicate_tool_names_are_invalid() {
        let request = ChatRequest::new(vec![Message::user("hi")]).with_tools(vec![
            ToolSpec::new("echo", "", json!({})),
            ToolSpec::new("echo", "", json!({})),
        ]);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_response_format_and_tool_choice() {
        let request: ChatRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "x"}],
            "response_format": {"type": "json"},
            "tool_choice": {"name": "fs_read"},
            "requires": {"json_mode": true}
        }))
        .unwrap();
        assert!(request.wants_json());
        assert_eq!(
            request.tool_choice,
            Some(ToolChoice::Named {
                name: "fs_read".into()
            })
        );
        assert_eq!(request.requires["json_mode"], json!(true));

        let request: ChatRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "x"}],
            "response_format": {"type": "json_object"},
            "tool_choice": "none"
        }))
        .unwrap();
        assert!(request.wants_json());
        assert_eq!(
            request.tool_choice,
            Some(ToolChoice::Mode(ToolChoiceMode::None))
        );
    }

    #[test]
    fn test_last_user_text() {
        let request = ChatRequest::new(vec![
            Message::system("be brief"),
            Message::user("first"),
            Message::assistant("ok"),
            Message::user("second"),
        ]);
        assert_eq!(request.last_user_text(), "second");
    }
}
