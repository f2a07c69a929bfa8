use crate::{error::ApiError, state::AppState};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use gateway::embeddings::{embed, EMBEDDING_MODEL};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct EmbeddingsRequest {
    input: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Embedding {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct EmbeddingsResponse {
    data: Vec<Embedding>,
    model: &'static str,
    dimensions: usize,
}

async fn handler(
    State(state): State<AppState>,
    payload: Result<Json<EmbeddingsRequest>, JsonRejection>,
) -> Result<Json<EmbeddingsResponse>, ApiError> {
    let Json(request) = payload?;
    if request.input.is_empty() {
        return Err(ApiError::invalid_request("'input' must not be empty"));
    }

    let dimensions = state.embedding_dimensions;
    let data = request
        .input
        .iter()
        .enumerate()
        .map(|(index, text)| Embedding {
            index,
            embedding: embed(text, dimensions),
        })
        .collect();

    Ok(Json(EmbeddingsResponse {
        data,
        model: EMBEDDING_MODEL,
        dimensions,
    }))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/embeddings", post(handler))
        .with_state(state)
}
