use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tmdb_transport::UpstreamError;

use crate::ratings::StorageError;

/// Failure of a single operation, rendered as `{"error", "details"}`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    MissingParameter(String),

    #[error("Malformed request body")]
    MalformedBody(#[source] serde_json::Error),

    #[error("Invalid request parameter")]
    InvalidParameter(#[source] UpstreamError),

    #[error("TMDb proxy failed")]
    Upstream(#[source] UpstreamError),

    #[error("Ratings store failed")]
    Storage(#[from] StorageError),
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        if err.is_invalid_input() {
            AppError::InvalidParameter(err)
        } else {
            AppError::Upstream(err)
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    pub fn missing(name: &str) -> Self {
        Self::MissingParameter(format!("Missing required parameter \"{name}\""))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingParameter(_)
            | AppError::MalformedBody(_)
            | AppError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(UpstreamError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            AppError::MissingParameter(_) => None,
            AppError::MalformedBody(e) => Some(e.to_string()),
            AppError::InvalidParameter(e) | AppError::Upstream(e) => Some(e.to_string()),
            AppError::Storage(e) => Some(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
            details: self.details(),
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %body.error, details = ?body.details, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %body.error, details = ?body.details, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode as UpstreamStatus;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::missing("endpoint").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::from(UpstreamError::InvalidPath("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(UpstreamError::InvalidSize("huge".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(UpstreamError::Status(UpstreamStatus::NOT_FOUND)).status(),
            StatusCode::BAD_GATEWAY
        );
        let corrupt = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(
            AppError::from(UpstreamError::MalformedBody(corrupt)).status(),
            StatusCode::BAD_GATEWAY
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            AppError::from(StorageError::Io(io)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_missing_parameter_message() {
        assert_eq!(
            AppError::missing("user_id").to_string(),
            "Missing required parameter \"user_id\""
        );
        assert!(AppError::missing("user_id").details().is_none());
    }

    #[test]
    fn test_invalid_input_is_not_labelled_as_upstream_failure() {
        let err = AppError::from(UpstreamError::InvalidSize("huge".into()));
        assert!(matches!(err, AppError::InvalidParameter(_)));
        assert_eq!(err.to_string(), "Invalid request parameter");
        assert_eq!(err.details().unwrap(), "unknown image size: huge");

        let err = AppError::from(UpstreamError::Status(reqwest::StatusCode::NOT_FOUND));
        assert_eq!(err.to_string(), "TMDb proxy failed");
    }
}
