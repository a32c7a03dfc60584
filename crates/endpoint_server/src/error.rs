//! Mapping of engine errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use endpoint_core::EndpointError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EndpointError),

    #[error("Remote shutdown is disabled")]
    ShutdownDisabled,
}

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(err) => match err {
                EndpointError::NoSession => StatusCode::UNAUTHORIZED,
                EndpointError::MalformedState(_) => StatusCode::BAD_REQUEST,
                EndpointError::NothingToProcess | EndpointError::UnknownName(_) => {
                    StatusCode::NOT_FOUND
                }
                EndpointError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::ShutdownDisabled => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Engine(err) => err.code(),
            ApiError::ShutdownDisabled => "shutdown_disabled",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        }
        let body = ErrorBody {
            ok: false,
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (EndpointError::NoSession, StatusCode::UNAUTHORIZED),
            (
                EndpointError::MalformedState("missing 'plugins'".into()),
                StatusCode::BAD_REQUEST,
            ),
            (EndpointError::NothingToProcess, StatusCode::NOT_FOUND),
            (EndpointError::UnknownName("Peter02".into()), StatusCode::NOT_FOUND),
            (
                EndpointError::BackendUnavailable("gone".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                EndpointError::Manifest("bad".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        assert_eq!(ApiError::ShutdownDisabled.status(), StatusCode::BAD_REQUEST);
    }
}
