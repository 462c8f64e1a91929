//! Liveness probe.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::bridge::BridgeState;

/// `GET /healthz` — always 200 with `{"status": "ok", "uptime_secs": N}`.
///
/// Never touches the upstream, so it is safe as a container liveness probe.
pub async fn healthz(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let uptime_secs = state.started_at.elapsed().as_secs();
    (StatusCode::OK, Json(json!({ "status": "ok", "uptime_secs": uptime_secs })))
}
