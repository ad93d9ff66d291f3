use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use calmly_core::RemoteError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RemoteError> for AppError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Validation(message) => Self::BadRequest(message),
            RemoteError::Authorization(message) => Self::Unauthorized(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::debug!("{self}");
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
    fn remote_errors_map_to_status_codes() {
        let cases = [
            (RemoteError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (
                RemoteError::Authorization("expired".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (RemoteError::Timeout, StatusCode::INTERNAL_SERVER_ERROR),
            (
                RemoteError::Unavailable {
                    status: 500,
                    message: "server state poisoned".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (remote, expected) in cases {
            assert_eq!(AppError::from(remote).status(), expected);
        }
    }
}
