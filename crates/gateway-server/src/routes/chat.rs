use crate::{error::ApiError, state::AppState};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use gateway::models::{event::GatewayEvent, request::ChatRequest};
use http::header;
use serde::Deserialize;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    provider: Option<String>,
    #[serde(rename = "personaId")]
    persona_id: Option<String>,
}

// Server-sent events body fed from a channel
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);
        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            body,
        )
            .into_response()
    }
}

/// One `event:`/`data:` frame
fn format_event(event: &GatewayEvent) -> String {
    format!("event: {}\ndata: {}\n\n", event.name(), event.data())
}

async fn handler(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<SseResponse, ApiError> {
    let Json(request) = payload?;

    // Admission failures become a plain HTTP error before any event is sent
    let admission = state.gateway.admit(
        request,
        query.provider.as_deref(),
        query.persona_id.as_deref(),
    )?;
    let request_id = admission.request_id.clone();
    let mut events = state.gateway.stream(admission);

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else {
                        break;
                    };
                    if let Err(e) = tx.send(format_event(&event)).await {
                        tracing::warn!(request_id = %request_id, "Error sending event through channel: {}", e);
                        break;
                    }
                }
                // Dropping the event stream cancels the provider call and any tool in flight
                _ = tx.closed() => {
                    tracing::info!(request_id = %request_id, "client disconnected, abandoning stream");
                    break;
                }
            }
        }
    });

    Ok(SseResponse::new(ReceiverStream::new(rx)))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(handler))
        .with_state(state)
}
