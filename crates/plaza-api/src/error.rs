use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// User-facing failures of the memo feature. Every variant is recovered at
/// the request boundary and rendered as a JSON body; none are fatal.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("login required")]
    Unauthenticated,
    #[error("not the owner of this memo")]
    Forbidden,
    #[error("memo does not exist")]
    NotFound,
    #[error("unknown, closed or blocked recipients")]
    InvalidRecipients(Vec<String>),
    #[error("point balance {have} is below the required {need}")]
    InsufficientBalance { have: i64, need: i64 },
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("human verification failed")]
    ChallengeFailed,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, json!({ "error": self.to_string() }))
            }
            ApiError::Forbidden => (StatusCode::FORBIDDEN, json!({ "error": self.to_string() })),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({ "error": self.to_string(), "fallback": "/memos" }),
            ),
            ApiError::InvalidRecipients(handles) => (
                StatusCode::NOT_FOUND,
                json!({ "error": self.to_string(), "recipients": handles }),
            ),
            ApiError::InsufficientBalance { have, need } => (
                StatusCode::FORBIDDEN,
                json!({ "error": self.to_string(), "have": have, "need": need }),
            ),
            ApiError::InvalidParameter(_) | ApiError::ChallengeFailed => {
                (StatusCode::BAD_REQUEST, json!({ "error": self.to_string() }))
            }
            ApiError::Internal(err) => {
                error!("internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
