use crate::context::{PushPayload, RelayContext};
use crate::error::RelayError;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tune_relay_core::now_ms;

#[derive(Clone)]
pub struct AppState {
    pub context: Arc<RelayContext>,
    pub port: u16,
}

#[derive(Debug, Default, Deserialize)]
pub struct ToggleRequest {
    #[serde(default)]
    pub enable: bool,
}

#[derive(Debug, Deserialize)]
pub struct LyricRequest {
    pub id: Value,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/device/push", post(device_push))
        .route("/mobile/status", get(mobile_status))
        .route("/current", post(current))
        .route("/lyric", post(lyric))
        .route("/media/status", get(media_status))
        .route("/media/enable", post(media_enable))
        .route("/media/enable-mobile", post(media_enable_mobile))
        .with_state(state)
}

fn authorized(context: &RelayContext, headers: &HeaderMap) -> bool {
    let Some(token) = context.api_token() else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|given| given == token)
}

async fn health(State(state): State<AppState>) -> Response {
    Json(json!({ "ok": true, "port": state.port })).into_response()
}

/// POST /device/push - replace the pushed playback record
async fn device_push(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PushPayload>,
) -> Result<Response, RelayError> {
    if !authorized(&state.context, &headers) {
        warn!("rejected device push with missing or wrong token");
        return Err(RelayError::Forbidden);
    }
    let ts = state.context.accept_push(payload, now_ms()).await;
    Ok(Json(json!({ "ok": true, "ts": ts })).into_response())
}

/// GET /mobile/status - freshness of the pushed record
async fn mobile_status(State(state): State<AppState>) -> Response {
    Json(state.context.mobile_status(now_ms()).await).into_response()
}

/// POST /current - the aggregated playback state
async fn current(State(state): State<AppState>) -> Response {
    let current = state.context.current_at(now_ms()).await;
    debug!(source = ?current.state.source, title = %current.state.title, "POST /current");
    Json(current).into_response()
}

/// POST /lyric - raw timestamped lyric text for a catalog id
async fn lyric(
    State(state): State<AppState>,
    Json(req): Json<LyricRequest>,
) -> Result<Response, RelayError> {
    let catalog = state.context.catalog();
    if !catalog.is_configured() {
        return Err(RelayError::CatalogUnavailable);
    }
    let id = match &req.id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match catalog.lyric(&id).await {
        Ok(Some(lyric)) => Ok(Json(json!({ "id": id, "lyric": lyric })).into_response()),
        Ok(None) => Err(RelayError::LyricNotFound),
        Err(err) => {
            warn!(error = %err, %id, "catalog lyric request failed");
            Err(RelayError::Catalog(err))
        }
    }
}

/// GET /media/status - helper and notification capability flags
async fn media_status(State(state): State<AppState>) -> Response {
    Json(state.context.media_status().await).into_response()
}

/// POST /media/enable - start or stop the helper process
async fn media_enable(
    State(state): State<AppState>,
    Json(req): Json<ToggleRequest>,
) -> Result<Response, RelayError> {
    info!(enable = req.enable, "POST /media/enable");
    let helper = state
        .context
        .set_helper_enabled(req.enable)
        .await
        .map_err(RelayError::HelperUnavailable)?;
    Ok(Json(json!({ "ok": true, "enabled": req.enable, "helper": helper })).into_response())
}

/// POST /media/enable-mobile - toggle notification scraping
async fn media_enable_mobile(
    State(state): State<AppState>,
    Json(req): Json<ToggleRequest>,
) -> Response {
    info!(enable = req.enable, "POST /media/enable-mobile");
    let enabled = state.context.set_mobile_enabled(req.enable);
    Json(json!({ "ok": true, "enabled": enabled })).into_response()
}
