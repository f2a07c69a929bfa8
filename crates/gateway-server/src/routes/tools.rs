use crate::{error::ApiError, state::AppState};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    routing::{get, post},
    Json, Router,
};
use gateway::{budget::persona_id, models::tool::ToolSpec, tools::ToolContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct InvokeRequest {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize)]
struct InvokeResponse {
    name: String,
    result: Value,
}

#[derive(Debug, Deserialize)]
struct InvokeQuery {
    #[serde(rename = "personaId")]
    persona_id: Option<String>,
}

/// Run a registered tool directly, outside any chat
async fn invoke_handler(
    State(state): State<AppState>,
    Query(query): Query<InvokeQuery>,
    payload: Result<Json<InvokeRequest>, JsonRejection>,
) -> Result<Json<InvokeResponse>, ApiError> {
    let Json(request) = payload?;
    let ctx = ToolContext::new(
        uuid::Uuid::new_v4().to_string(),
        persona_id(query.persona_id.as_deref()),
    );

    let result = state
        .gateway
        .bridge()
        .invoke(&request.name, request.args, &ctx)
        .await?;

    Ok(Json(InvokeResponse {
        name: request.name,
        result,
    }))
}

async fn list_handler(State(state): State<AppState>) -> Json<Vec<ToolSpec>> {
    Json(state.gateway.bridge().specs())
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/tools", get(list_handler))
        .route("/tools/invoke", post(invoke_handler))
        .with_state(state)
}
