//! Request ID middleware.
//!
//! Every inbound request gets an `X-Request-ID`: the caller's own if present,
//! otherwise a fresh UUID v4. The ID is echoed in the response and attached to
//! a [`tracing`] span, so resolver, upstream and emitter log lines for one
//! request can be correlated.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Instrument as _;
use uuid::Uuid;

const HEADER: &str = "x-request-id";

/// Assigned request ID, readable by handlers as an axum `Extension`.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Apply **inside** `tower_http::TraceLayer` so it runs within the trace span.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(id.clone()));

    let span = tracing::info_span!("request", id = %id);
    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(HEADER, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        Router::new()
            .route("/", get(|Extension(id): Extension<RequestId>| async move { id.0 }))
            .layer(middleware::from_fn(request_id_middleware))
    }

    #[tokio::test]
    async fn echoes_caller_supplied_id() {
        let req = Request::builder()
            .uri("/")
            .header(HEADER, "abc-123")
            .body(Body::empty())
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[HEADER], "abc-123");
    }

    #[tokio::test]
    async fn generates_uuid_when_absent() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = app().oneshot(req).await.unwrap();

        let id = resp.headers()[HEADER].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok(), "not a uuid: {id}");
    }
}
