use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;
use tune_relay_providers::EnableError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Forbidden")]
    Forbidden,
    #[error("helper_not_found_or_failed")]
    HelperUnavailable(#[source] EnableError),
    #[error("catalog not configured")]
    CatalogUnavailable,
    #[error("lyric not found")]
    LyricNotFound,
    #[error("catalog request failed: {0}")]
    Catalog(#[source] anyhow::Error),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            RelayError::Forbidden => {
                (StatusCode::FORBIDDEN, Json(json!({ "error": message }))).into_response()
            }
            RelayError::HelperUnavailable(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "ok": false,
                    "enabled": false,
                    "error": message,
                    "details": err.to_string(),
                })),
            )
                .into_response(),
            RelayError::CatalogUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": message }))).into_response()
            }
            RelayError::LyricNotFound => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            RelayError::Catalog(_) => {
                (StatusCode::BAD_GATEWAY, Json(json!({ "error": message }))).into_response()
            }
        }
    }
}
