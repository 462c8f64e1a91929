//! Error types.
//!
//! [`UpstreamError`] classifies everything that can go wrong talking to the
//! upstream conversation API. [`AppError`] is what axum handlers return: it
//! wraps [`anyhow::Error`], logs the full cause chain, and always answers with
//! a generic 500 so no upstream detail reaches the caller.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Failure talking to the upstream conversation API.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Connection, TLS, or request-timeout failure.
    #[error("POST {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The upstream answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
        body: String,
    },

    /// A body or stream line was not the JSON we expected.
    #[error("decoding {endpoint} response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{what} timed out after {after:?}")]
    Timeout { what: &'static str, after: Duration },

    /// One branch of conversation resolution failed; no turn was sent.
    #[error("upstream resolution failed: {0}")]
    ResolutionFailed(#[source] Box<UpstreamError>),

    /// The chat stream reported an error frame or broke off mid-way.
    #[error("upstream stream aborted: {0}")]
    StreamAborted(String),
}

/// Wraps [`anyhow::Error`] so it can be returned from axum handlers.
///
/// Any `Into<anyhow::Error>` (including [`UpstreamError`]) converts via `?`.
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let chain = format!("{:#}", self.0);
        tracing::error!(error = %chain, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": {
                    "message": "Internal Server Error",
                    "type": "server_error",
                }
            })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Self(e.into())
    }
}
