//! Unified error type for the JSON endpoints.
//!
//! Handlers added on top of the SSE chat flow return `Result<T, ApiError>`;
//! the error converts into a JSON `{"error": …}` response. Internal detail
//! is logged, not leaked.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("not found: {0}")]
    NotFound(String),

    /// The external API rejected or failed the relayed request.
    #[error("upstream api error: {0}")]
    Upstream(#[from] anyhow::Error),

    #[error("internal error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, (*m).to_owned()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Upstream(e) => {
                error!("upstream API error: {e}");
                (StatusCode::BAD_GATEWAY, format!("An error occurred: {e}"))
            }
            ApiError::Internal => {
                error!("internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// The repository and service layer report failures as `Err(())` after
/// logging the cause.
impl From<()> for ApiError {
    fn from(_: ()) -> Self {
        ApiError::Internal
    }
}
