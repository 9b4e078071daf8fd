//! API error type and its mapping onto HTTP responses.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mcphub_core::HubError;
use serde::Serialize;
use thiserror::Error;

/// Errors returned by the control API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request itself is malformed.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A hub operation failed.
    #[error(transparent)]
    Hub(#[from] HubError),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
    #[serde(rename = "type")]
    error_type: &'static str,
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Hub(err) => match err {
                HubError::UnknownServer(_) => StatusCode::NOT_FOUND,
                HubError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
                HubError::Transport(_) => StatusCode::BAD_GATEWAY,
                HubError::Config { .. }
                | HubError::Persistence { .. }
                | HubError::Protocol(_)
                | HubError::Json(_)
                | HubError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Hub(err) => err.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Control request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
            error_type: self.error_type(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}
