//! Client-facing API — the OpenAI-compatible endpoints.
//!
//! This is intentionally a thin layer: the completion path lives in
//! [`crate::bridge`]. Handlers translate HTTP concerns (headers, bodies,
//! content types) into calls to the bridge and back.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::{
    bridge::{self, BridgeState, Completion},
    error::AppError,
    openai::ChatCompletionRequest,
};

/// Build the client-facing axum router.
pub fn router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::api::health::healthz))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .with_state(state)
}

/// The caller's bearer token, forwarded to the upstream as-is.
///
/// A value without the `Bearer ` prefix is forwarded whole; a missing header
/// forwards an empty token and lets the upstream reject it.
pub(crate) fn bearer_token(headers: &HeaderMap) -> &str {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    value.strip_prefix("Bearer ").unwrap_or(value)
}

/// `POST /v1/chat/completions` — bridge one OpenAI request to an upstream turn.
///
/// Answers with a `chat.completion` JSON document, or with an SSE body of
/// `chat.completion.chunk` frames when the request sets `"stream": true`.
pub async fn chat_completions(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: ChatCompletionRequest =
        serde_json::from_slice(&body).context("parsing chat completion request")?;

    match bridge::complete(&state, bearer_token(&headers), request).await? {
        Completion::Buffered(document) => Ok(Json(document).into_response()),
        Completion::Streaming(frames) => {
            let mut response = Body::from_stream(frames).into_response();
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
            Ok(response)
        }
    }
}

/// `GET /v1/models` — the configured static model list.
pub async fn list_models(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let data: Vec<Value> = state
        .config
        .models
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "object": "model",
                "created": m.created,
                "owned_by": m.owned_by,
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data }))
}
