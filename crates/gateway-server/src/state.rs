use std::sync::Arc;

use anyhow::{Context, Result};
use gateway::{
    budget::BudgetGate,
    gateway::Gateway,
    providers::factory::ProviderRouter,
    tools::{filesystem::register_builtin_tools, ToolBridge, Workspace},
};

use crate::configuration::Settings;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub embedding_dimensions: usize,
}

impl AppState {
    pub fn new(gateway: Gateway, embedding_dimensions: usize) -> Self {
        Self {
            gateway: Arc::new(gateway),
            embedding_dimensions,
        }
    }

    /// Build the gateway and its collaborators once at startup
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let workspace = Workspace::new(&settings.workspace_root).with_context(|| {
            format!(
                "failed to prepare workspace at {}",
                settings.workspace_root.display()
            )
        })?;

        let mut bridge = ToolBridge::new();
        register_builtin_tools(&mut bridge, Arc::new(workspace));

        let router = ProviderRouter::new(settings.providers.clone(), &settings.default_provider)?;
        let gateway = Gateway::new(router, Arc::new(bridge))
            .with_budget(BudgetGate::new(settings.budget))
            .with_options(settings.gateway_options());

        Ok(Self::new(gateway, settings.embedding_dimensions))
    }
}
