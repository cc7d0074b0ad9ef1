use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::clients::debrid::{DebridError, DebridErrorKind};
use crate::resolver::ResolveError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("no matching file: {0}")]
    NoMatchingFile(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("internal error")]
    Internal(String),
}

impl From<DebridError> for ApiError {
    fn from(err: DebridError) -> Self {
        match err.kind {
            DebridErrorKind::Unauthorized => Self::Unauthorized(err.to_string()),
            DebridErrorKind::NotFound => Self::NotFound(err.to_string()),
            DebridErrorKind::NoMatchingFile => Self::NoMatchingFile(err.to_string()),
            _ => Self::Upstream(err.to_string()),
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnknownService(service) => {
                Self::BadRequest(format!("unknown service '{service}'"))
            }
            ResolveError::Debrid(inner) => inner.into(),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(m) | Self::NoMatchingFile(m) => (StatusCode::NOT_FOUND, m.clone()),
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Self::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            Self::Upstream(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
