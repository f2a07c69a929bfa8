use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File};
use gateway::{
    budget::BudgetLimits,
    embeddings::DEFAULT_DIMENSIONS,
    gateway::{GatewayOptions, DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_REQUEST_TIMEOUT},
    providers::configs::{
        ProviderConfigs, AGENT_DEFAULT_COMMAND, AGENT_DEFAULT_MODEL, ANTHROPIC_DEFAULT_HOST,
        ANTHROPIC_DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS, GEMINI_DEFAULT_HOST, GEMINI_DEFAULT_MODEL,
        OPENAI_DEFAULT_HOST, OPENAI_DEFAULT_MODEL,
    },
};
use serde::Deserialize;
use std::{
    net::{AddrParseError, SocketAddr},
    path::PathBuf,
    time::Duration,
};

/// Longest request deadline accepted from configuration
const MAX_REQUEST_TIMEOUT_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    /// Provider used when a request names none
    pub default_provider: String,
    /// Sandbox root for the filesystem tools
    pub workspace_root: PathBuf,
    pub request_timeout_secs: u64,
    pub max_tool_rounds: usize,
    pub embedding_dimensions: usize,
    pub providers: ProviderConfigs,
    #[serde(default)]
    pub budget: BudgetLimits,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let mut settings = Self::load_and_validate()?;
        settings.apply_vendor_keys();
        Ok(settings)
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            max_tool_rounds: self.max_tool_rounds,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Server defaults
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            // Gateway defaults
            .set_default("default_provider", "mock")?
            .set_default("workspace_root", "./workspace")?
            .set_default("request_timeout_secs", DEFAULT_REQUEST_TIMEOUT.as_secs())?
            .set_default("max_tool_rounds", DEFAULT_MAX_TOOL_ROUNDS as u64)?
            .set_default("embedding_dimensions", DEFAULT_DIMENSIONS as u64)?
            // Provider defaults
            .set_default("providers.openai.host", OPENAI_DEFAULT_HOST)?
            .set_default("providers.openai.model", OPENAI_DEFAULT_MODEL)?
            .set_default("providers.openai.timeout_secs", DEFAULT_TIMEOUT_SECS)?
            .set_default("providers.anthropic.host", ANTHROPIC_DEFAULT_HOST)?
            .set_default("providers.anthropic.model", ANTHROPIC_DEFAULT_MODEL)?
            .set_default("providers.anthropic.timeout_secs", DEFAULT_TIMEOUT_SECS)?
            .set_default("providers.gemini.host", GEMINI_DEFAULT_HOST)?
            .set_default("providers.gemini.model", GEMINI_DEFAULT_MODEL)?
            .set_default("providers.gemini.timeout_secs", DEFAULT_TIMEOUT_SECS)?
            .set_default("providers.agent.command", AGENT_DEFAULT_COMMAND)?
            .set_default("providers.agent.args", vec!["-p"])?
            .set_default("providers.agent.model", AGENT_DEFAULT_MODEL)?
            // An optional gateway.toml in the working directory
            .add_source(File::with_name("gateway").required(false))
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(" ")
                    .with_list_parse_key("providers.agent.args")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        let settings = match result {
            Ok(settings) => settings,
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // Extract field name from error message "missing field `type`"
                let error_str = err.to_string();
                return if error_str.starts_with("missing field") {
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                };
            }
        };

        if settings.embedding_dimensions == 0 {
            return Err(ConfigError::Invalid {
                env_var: to_env_var("embedding_dimensions"),
                reason: "must be at least 1".to_string(),
            });
        }
        if !(1..=MAX_REQUEST_TIMEOUT_SECS).contains(&settings.request_timeout_secs) {
            return Err(ConfigError::Invalid {
                env_var: to_env_var("request_timeout_secs"),
                reason: format!("must be between 1 and {}", MAX_REQUEST_TIMEOUT_SECS),
            });
        }
        Ok(settings)
    }

    /// Fall back to the vendors' conventional variables for credentials
    fn apply_vendor_keys(&mut self) {
        fallback_key(&mut self.providers.openai.api_key, &["OPENAI_API_KEY"]);
        fallback_key(&mut self.providers.anthropic.api_key, &["ANTHROPIC_API_KEY"]);
        fallback_key(
            &mut self.providers.gemini.api_key,
            &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        );
    }
}

fn fallback_key(slot: &mut Option<String>, vars: &[&str]) {
    if slot.as_deref().is_some_and(|key| !key.trim().is_empty()) {
        return;
    }
    *slot = vars.iter().find_map(|var| {
        std::env::var(var)
            .ok()
            .filter(|key| !key.trim().is_empty())
    });
}
