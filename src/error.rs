use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

/// Request-level failure; always rendered as `{"error": ...}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Not allowed by CORS")]
    CorsDenied,

    #[error("{0}")]
    BadRequest(String),

    #[error("{field} already exists")]
    Conflict { field: &'static str },

    #[error("Server error")]
    Store(#[source] StoreError),

    #[error("Server error")]
    Internal(#[source] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::CorsDenied => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey { field } => Self::Conflict { field },
            StoreError::Validation(msg) => Self::BadRequest(msg),
            other => Self::Store(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            // The body only ever says "Server error"; details stay in the log.
            error!(error = ?self, "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(AppError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::CorsDenied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::internal(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn duplicate_key_becomes_conflict() {
        let err = AppError::from(StoreError::DuplicateKey { field: "username" });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "username already exists");
    }

    #[test]
    fn server_errors_hide_details() {
        let err = AppError::from(StoreError::Unavailable("connection reset by 10.0.0.4".into()));
        assert_eq!(err.to_string(), "Server error");
        let err = AppError::internal(anyhow::anyhow!("secret stack"));
        assert_eq!(err.to_string(), "Server error");
    }
}
