mod configuration;
mod error;
mod routes;
mod state;

use std::time::Duration;

use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::configuration::Settings;
use crate::state::AppState;

const BUDGET_GC_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gatewayd=info,gateway=info")),
        )
        .init();

    let settings = Settings::new()?;
    let addr = settings.server.socket_addr()?;
    let state = AppState::from_settings(&settings)?;
    info!(
        default_provider = %settings.default_provider,
        workspace = %settings.workspace_root.display(),
        "gateway configured"
    );

    // Forget personas whose budget windows are long over
    let gateway = state.gateway.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(BUDGET_GC_INTERVAL);
        loop {
            interval.tick().await;
            gateway.budget().gc();
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
