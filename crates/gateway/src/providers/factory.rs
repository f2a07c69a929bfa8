use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use tracing::debug;

use super::agent::AgentProvider;
use super::anthropic::AnthropicProvider;
use super::base::{ChunkStream, Provider};
use super::configs::ProviderConfigs;
use super::gemini::GeminiProvider;
use super::mock::MockProvider;
use super::openai::OpenAiProvider;
use crate::models::request::ChatRequest;

pub const AUTO: &str = "auto";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    Mock,
    OpenAi,
    Anthropic,
    #[strum(to_string = "gemini", serialize = "google")]
    Gemini,
    #[strum(to_string = "agent", serialize = "agent_sdk")]
    Agent,
}

/// Credentialed providers in the order `auto` tries them
const AUTO_PRIORITY: [ProviderKind; 3] = [
    ProviderKind::OpenAi,
    ProviderKind::Anthropic,
    ProviderKind::Gemini,
];

/// Closed set of adapters the gateway can route to
#[derive(Debug, Clone)]
pub enum Adapter {
    Mock(MockProvider),
    OpenAi(OpenAiProvider),
    Anthropic(AnthropicProvider),
    Gemini(GeminiProvider),
    Agent(AgentProvider),
}

impl Adapter {
    fn inner(&self) -> &dyn Provider {
        match self {
            Adapter::Mock(p) => p,
            Adapter::OpenAi(p) => p,
            Adapter::Anthropic(p) => p,
            Adapter::Gemini(p) => p,
            Adapter::Agent(p) => p,
        }
    }
}

impl Provider for Adapter {
    fn kind(&self) -> ProviderKind {
        self.inner().kind()
    }

    fn model(&self) -> &str {
        self.inner().model()
    }

    fn is_configured(&self) -> bool {
        self.inner().is_configured()
    }

    fn chat(&self, request: &ChatRequest) -> ChunkStream {
        self.inner().chat(request)
    }
}

/// Picks the adapter for a request.
///
/// Adapters are built once up front; selecting one is a cheap clone that
/// shares the underlying HTTP client.
#[derive(Debug, Clone)]
pub struct ProviderRouter {
    default_provider: String,
    mock: MockProvider,
    openai: OpenAiProvider,
    anthropic: AnthropicProvider,
    gemini: GeminiProvider,
    agent: AgentProvider,
}

impl ProviderRouter {
    pub fn new(configs: ProviderConfigs, default_provider: &str) -> Result<Self> {
        Ok(Self {
            default_provider: default_provider.to_string(),
            mock: MockProvider::new(),
            openai: OpenAiProvider::new(configs.openai)?,
            anthropic: AnthropicProvider::new(configs.anthropic)?,
            gemini: GeminiProvider::new(configs.gemini)?,
            agent: AgentProvider::new(configs.agent),
        })
    }

    /// Replace the mock adapter, typically with a scripted one
    pub fn with_mock(mut self, mock: MockProvider) -> Self {
        self.mock = mock;
        self
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// The concrete provider a request would be routed to.
    ///
    /// Absent names fall back to the configured default, `auto` picks the
    /// first credentialed vendor (or the local agent), anything unrecognized
    /// routes to the mock.
    pub fn resolve(&self, requested: Option<&str>) -> ProviderKind {
        let name = requested
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.default_provider);

        if name.eq_ignore_ascii_case(AUTO) {
            return self.auto();
        }

        ProviderKind::from_str(name).unwrap_or_else(|_| {
            debug!(provider = %name, "unrecognized provider, routing to mock");
            ProviderKind::Mock
        })
    }

    fn auto(&self) -> ProviderKind {
        AUTO_PRIORITY
            .into_iter()
            .find(|kind| self.adapter(*kind).is_configured())
            .unwrap_or(ProviderKind::Agent)
    }

    pub fn adapter(&self, kind: ProviderKind) -> Adapter {
        match kind {
            ProviderKind::Mock => Adapter::Mock(self.mock.clone()),
            ProviderKind::OpenAi => Adapter::OpenAi(self.openai.clone()),
            ProviderKind::Anthropic => Adapter::Anthropic(self.anthropic.clone()),
            ProviderKind::Gemini => Adapter::Gemini(self.gemini.clone()),
            ProviderKind::Agent => Adapter::Agent(self.agent.clone()),
        }
    }

    pub fn select_adapter(&self, requested: Option<&str>) -> Adapter {
        self.adapter(self.resolve(requested))
    }

    /// Per-provider readiness without exposing any credential
    pub fn health(&self) -> Value {
        let mut providers = Map::new();
        for kind in ProviderKind::iter() {
            let configured = self.adapter(kind).is_configured();
            let status = match kind {
                ProviderKind::Agent => json!({ "configured": configured, "sdk": configured }),
                _ => json!({ "configured": configured }),
            };
            providers.insert(kind.to_string(), status);
        }
        Value::Object(providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::configs::AgentProviderConfig;

    fn router_with(keys: &[ProviderKind], default_provider: &str) -> ProviderRouter {
        let mut configs = ProviderConfigs::default();
        for kind in keys {
            match kind {
                ProviderKind::OpenAi => configs.openai.api_key = Some("sk-openai".into()),
                ProviderKind::Anthropic => configs.anthropic.api_key = Some("sk-ant".into()),
                ProviderKind::Gemini => configs.gemini.api_key = Some("g-key".into()),
                _ => {}
            }
        }
        configs.agent = AgentProviderConfig {
            command: "definitely-not-an-installed-agent".into(),
            ..AgentProviderConfig::default()
        };
        ProviderRouter::new(configs, default_provider).unwrap()
    }

    #[test]
    fn test_parse_provider_kind() {
        assert_eq!(ProviderKind::from_str("openai").unwrap(), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::from_str("OpenAI").unwrap(), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::from_str("google").unwrap(), ProviderKind::Gemini);
        assert_eq!(ProviderKind::from_str("agent_sdk").unwrap(), ProviderKind::Agent);
        assert!(ProviderKind::from_str("auto").is_err());
        assert_eq!(ProviderKind::Gemini.to_string(), "gemini");
        assert_eq!(ProviderKind::OpenAi.to_string(), "openai");
    }

    #[test]
    fn test_explicit_provider_wins_even_unconfigured() {
        let router = router_with(&[], "mock");
        assert_eq!(router.resolve(Some("anthropic")), ProviderKind::Anthropic);
        assert!(!router.select_adapter(Some("anthropic")).is_configured());
    }

    #[test]
    fn test_absent_and_unknown_route_to_mock() {
        let router = router_with(&[ProviderKind::OpenAi], "mock");
        assert_eq!(router.resolve(None), ProviderKind::Mock);
        assert_eq!(router.resolve(Some("")), ProviderKind::Mock);
        assert_eq!(router.resolve(Some("llama-farm")), ProviderKind::Mock);
    }

    #[test]
    fn test_default_provider_applies_when_absent() {
        let router = router_with(&[ProviderKind::Gemini], "auto");
        assert_eq!(router.resolve(None), ProviderKind::Gemini);
        assert_eq!(router.resolve(Some("mock")), ProviderKind::Mock);
    }

    #[test]
    fn test_auto_priority() {
        let router = router_with(&[ProviderKind::Gemini, ProviderKind::Anthropic], "mock");
        assert_eq!(router.resolve(Some("auto")), ProviderKind::Anthropic);

        let router = router_with(
            &[ProviderKind::Gemini, ProviderKind::Anthropic, ProviderKind::OpenAi],
            "mock",
        );
        assert_eq!(router.resolve(Some("AUTO")), ProviderKind::OpenAi);
    }

    #[test]
    fn test_auto_without_credentials_falls_back_to_agent() {
        let router = router_with(&[], "mock");
        let adapter = router.select_adapter(Some("auto"));
        assert_eq!(adapter.kind(), ProviderKind::Agent);
        assert_ne!(adapter.kind(), ProviderKind::Mock);
    }

    #[test]
    fn test_health_has_no_secrets() {
        let router = router_with(&[ProviderKind::OpenAi], "mock");
        let health = router.health();
        assert_eq!(health["openai"]["configured"], true);
        assert_eq!(health["anthropic"]["configured"], false);
        assert_eq!(health["mock"]["configured"], true);
        assert_eq!(health["agent"]["sdk"], false);
        assert!(!health.to_string().contains("sk-openai"));
    }
}
