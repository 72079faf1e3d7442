use anyhow::{Context, Result};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use tracing::{debug, info};

mod session;

use session::MediaSession;

const PORT_ENV: &str = "TUNE_RELAY_HELPER_PORT";
const DEFAULT_PORT: u16 = 3131;

#[derive(Debug, Serialize)]
struct CurrentBody<'a> {
    source: &'a str,
    #[serde(flatten)]
    session: MediaSession,
}

fn port_from_env() -> u16 {
    std::env::var(PORT_ENV)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/current", get(current))
}

async fn health() -> Response {
    Json(json!({ "ok": true })).into_response()
}

async fn current() -> Response {
    match session::read_current().await {
        Ok(Some(session)) => Json(CurrentBody {
            source: "pc",
            session,
        })
        .into_response(),
        Ok(None) => Json(json!({ "error": "no_session" })).into_response(),
        Err(err) => {
            debug!(error = %err, "media session read failed");
            Json(json!({ "error": err.to_string() })).into_response()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let addr = SocketAddr::from(([127, 0, 0, 1], port_from_env()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "media helper listening");

    axum::serve(listener, router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("helper server failed")
}
