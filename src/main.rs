use std::{future::pending, sync::Arc};

use anyhow::Context;
use chandler_gateway::{api, bridge::BridgeState, Config};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Docker HEALTHCHECK entry point: probe /healthz and exit, no curl needed in the image.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    init_tracing();

    let config = Config::from_env()?;
    let addr = config.gateway.socket_addr()?;

    info!(
        %addr,
        upstream = %config.upstream.base_url,
        selection = %config.conversations.selection,
        models = config.models.len(),
        "chandler-gateway starting"
    );

    let state = Arc::new(BridgeState::new(Arc::new(config)).context("building upstream client")?);

    let trace_layer = tower_http::trace::TraceLayer::new_for_http()
        .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
        .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO));

    let app = api::client::router(state)
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "client API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("client API server error")?;

    info!("shutdown complete");
    Ok(())
}

/// `RUST_LOG` picks the filter; `CHANDLER_LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "chandler_gateway=info,tower_http=warn".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var("CHANDLER_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining in-flight requests");
}

/// `chandler-gateway --healthcheck`: GET /healthz on the configured port,
/// exit 0 on 200 and 1 otherwise.
async fn healthcheck() -> anyhow::Result<()> {
    let port = Config::from_env()?.gateway.socket_addr()?.port();

    let url = format!("http://127.0.0.1:{port}/healthz");
    let healthy = match reqwest::get(&url).await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    };

    std::process::exit(if healthy { 0 } else { 1 });
}
