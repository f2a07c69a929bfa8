use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use url::Url;

pub const OPENAI_DEFAULT_HOST: &str = "https://api.openai.com";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const ANTHROPIC_DEFAULT_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
pub const GEMINI_DEFAULT_HOST: &str = "https://generativelanguage.googleapis.com";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const AGENT_DEFAULT_COMMAND: &str = "claude";
pub const AGENT_DEFAULT_MODEL: &str = "local-agent";
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Settings shared by the HTTP vendor adapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpProviderConfig {
    pub host: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl HttpProviderConfig {
    pub fn new<H: Into<String>, M: Into<String>>(host: H, model: M) -> Self {
        Self {
            host: host.into(),
            api_key: None,
            model: model.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_api_key<K: Into<String>>(mut self, api_key: K) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// The key, if one is set and non-blank
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Fails unless `host` is an absolute http(s) URL
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.host).map_err(|e| anyhow!("invalid host '{}': {}", self.host, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("invalid host '{}': expected an http or https URL", self.host);
        }
        Ok(())
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.host.trim_end_matches('/'), path)
    }
}

pub type OpenAiProviderConfig = HttpProviderConfig;
pub type AnthropicProviderConfig = HttpProviderConfig;
pub type GeminiProviderConfig = HttpProviderConfig;

/// Local agent CLI invoked as `command args... <prompt>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProviderConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub model: String,
}

impl Default for AgentProviderConfig {
    fn default() -> Self {
        Self {
            command: AGENT_DEFAULT_COMMAND.to_string(),
            args: vec!["-p".to_string()],
            model: AGENT_DEFAULT_MODEL.to_string(),
        }
    }
}

/// Everything the router needs to build any adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfigs {
    pub openai: OpenAiProviderConfig,
    pub anthropic: AnthropicProviderConfig,
    pub gemini: GeminiProviderConfig,
    pub agent: AgentProviderConfig,
}

impl Default for ProviderConfigs {
    fn default() -> Self {
        Self {
            openai: HttpProviderConfig::new(OPENAI_DEFAULT_HOST, OPENAI_DEFAULT_MODEL),
            anthropic: HttpProviderConfig::new(ANTHROPIC_DEFAULT_HOST, ANTHROPIC_DEFAULT_MODEL),
            gemini: HttpProviderConfig::new(GEMINI_DEFAULT_HOST, GEMINI_DEFAULT_MODEL),
            agent: AgentProviderConfig::default(),
        }
    }
}
