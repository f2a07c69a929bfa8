use crate::state::AppState;
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct CapabilitiesQuery {
    provider: Option<String>,
}

/// Capabilities of the provider a request would be routed to
async fn handler(
    State(state): State<AppState>,
    Query(query): Query<CapabilitiesQuery>,
) -> Json<Value> {
    let kind = state.gateway.router().resolve(query.provider.as_deref());
    Json(json!({
        "provider": kind.to_string(),
        "capabilities": kind.capabilities(),
    }))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/capabilities", get(handler))
        .with_state(state)
}
