use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

async fn liveness() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn providers(State(state): State<AppState>) -> Json<Value> {
    Json(state.gateway.router().health())
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/health/providers", get(providers))
        .with_state(state)
}
