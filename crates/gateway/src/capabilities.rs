//! Static capability registry and the requirement checker that runs before
//! any generation starts.
use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::providers::factory::ProviderKind;

/// How well a provider supports tool calling, ordered from weakest to strongest
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ToolCalling {
    /// Tools are driven through `CALL_TOOL:` markers in generated text
    Simulated,
    Limited,
    Native,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calling: Option<ToolCalling>,
    pub json_mode: bool,
    pub vision: bool,
}

impl CapabilityProfile {
    const fn new(tool_calling: ToolCalling, json_mode: bool, vision: bool) -> Self {
        Self {
            streaming: true,
            tool_calling: Some(tool_calling),
            json_mode,
            vision,
        }
    }
}

impl ProviderKind {
    pub fn capabilities(&self) -> CapabilityProfile {
        match self {
            ProviderKind::Mock => CapabilityProfile::new(ToolCalling::Simulated, true, false),
            ProviderKind::OpenAi => CapabilityProfile::new(ToolCalling::Native, true, true),
            ProviderKind::Anthropic => CapabilityProfile::new(ToolCalling::Native, false, true),
            ProviderKind::Gemini => CapabilityProfile::new(ToolCalling::Limited, true, true),
            ProviderKind::Agent => CapabilityProfile::new(ToolCalling::Simulated, false, false),
        }
    }
}

/// Look up a provider by name. Unknown providers have an empty profile.
pub fn capabilities_of(provider: &str) -> CapabilityProfile {
    ProviderKind::from_str(provider)
        .map(|kind| kind.capabilities())
        .unwrap_or_default()
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Provider '{provider}' does not satisfy requirement '{capability}': {reason}")]
pub struct RequirementError {
    pub provider: String,
    pub capability: String,
    pub reason: String,
}

impl RequirementError {
    fn new(provider: &str, capability: &str, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            capability: capability.to_string(),
            reason: reason.into(),
        }
    }
}

/// Check every requirement against the provider's profile. All or nothing:
/// the first unmet requirement fails the whole check.
pub fn ensure_requirements(
    provider: &str,
    requires: &BTreeMap<String, Value>,
) -> Result<(), RequirementError> {
    let profile = capabilities_of(provider);

    for (capability, level) in requires {
        // false never asks for anything
        if level == &Value::Bool(false) {
            continue;
        }

        match capability.as_str() {
            "tool_calling" => check_tool_calling(provider, &profile, level)?,
            "json_mode" => check_flag(provider, capability, level, profile.json_mode)?,
            "streaming" => check_flag(provider, capability, level, profile.streaming)?,
            "vision" => check_flag(provider, capability, level, profile.vision)?,
            other => {
                return Err(RequirementError::new(
                    provider,
                    other,
                    "unknown capability",
                ))
            }
        }
    }

    Ok(())
}

fn check_flag(
    provider: &str,
    capability: &str,
    level: &Value,
    offered: bool,
) -> Result<(), RequirementError> {
    match level {
        Value::Bool(true) if offered => Ok(()),
        Value::Bool(true) => Err(RequirementError::new(
            provider,
            capability,
            "not supported",
        )),
        other => Err(RequirementError::new(
            provider,
            capability,
            format!("expected a boolean, got {}", other),
        )),
    }
}

fn check_tool_calling(
    provider: &str,
    profile: &CapabilityProfile,
    level: &Value,
) -> Result<(), RequirementError> {
    let required = match level {
        Value::Bool(true) => ToolCalling::Simulated,
        Value::String(s) => ToolCalling::from_str(s).map_err(|_| {
            RequirementError::new(
                provider,
                "tool_calling",
                format!("unknown level '{}'", s),
            )
        })?,
        other => {
            return Err(RequirementError::new(
                provider,
                "tool_calling",
                format!("expected a level, got {}", other),
            ))
        }
    };

    match (required, profile.tool_calling) {
        (_, None) => Err(RequirementError::new(
            provider,
            "tool_calling",
            "not supported",
        )),
        (ToolCalling::Native, Some(ToolCalling::Native)) => Ok(()),
        (ToolCalling::Native, Some(offered)) => Err(RequirementError::new(
            provider,
            "tool_calling",
            format!("native required, provider offers {}", offered),
        )),
        // limited and simulated accept any level of support
        (_, Some(_)) => Ok(()),
    }
}
