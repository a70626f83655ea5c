use crate::models::ErrorBody;
use crate::provider::ProviderError;
use axum::{extract::rejection::JsonRejection, http::StatusCode, Json};
use tracing::warn;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_IMPLEMENTED, message)
    }

    /// Failure of a table operation: always a 500 carrying the provider's message.
    pub fn provider(err: ProviderError) -> Self {
        warn!("provider call failed: {err}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.message())
    }

    /// Failure of an auth operation: client errors from the provider keep their status.
    pub fn auth_failure(err: ProviderError) -> Self {
        match &err {
            ProviderError::InvalidToken => Self::unauthorized(err.message()),
            ProviderError::Api { status, .. } if (400..500).contains(status) => {
                let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST);
                Self::new(status, err.message())
            }
            ProviderError::Unsupported(_) => Self::not_implemented(err.message()),
            _ => Self::provider(err),
        }
    }
}

/// Unparseable or wrongly typed bodies are validation failures like any other.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}
