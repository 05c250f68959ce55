//! Uniform response envelope and error mapping.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use devbox_core::Error;

/// `{"success": true, ...data}` or `{"success": false, "error": {...}}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    /// Success with no payload.
    pub fn done() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }
}

/// A sandbox error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::PathInvalid(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) | Error::MirrorMissing(_) => StatusCode::NOT_FOUND,
            Error::RebuildInProgress(_) => StatusCode::CONFLICT,
            Error::EngineUnavailable(_) | Error::ImageUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::ExecutionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "Request failed");
        } else {
            tracing::warn!(code = self.0.code(), error = %self.0, "Request rejected");
        }

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: self.0.code().to_string(),
                message: self.0.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Serialize)]
    struct Port {
        port: u16,
    }

    #[test]
    fn test_success_is_flattened() {
        let json = serde_json::to_value(ApiResponse::ok(Port { port: 41000 })).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true, "port": 41000 }));

        let json = serde_json::to_value(ApiResponse::done()).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true }));
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::path_invalid("x"), StatusCode::BAD_REQUEST),
            (Error::not_found("x"), StatusCode::NOT_FOUND),
            (Error::mirror_missing("x"), StatusCode::NOT_FOUND),
            (Error::RebuildInProgress("x".into()), StatusCode::CONFLICT),
            (Error::engine_unavailable("x"), StatusCode::SERVICE_UNAVAILABLE),
            (Error::image_unavailable("x"), StatusCode::SERVICE_UNAVAILABLE),
            (
                Error::ExecutionTimeout {
                    sandbox: "a".into(),
                    command: "sleep 60".into(),
                    timeout: Duration::from_secs(30),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (Error::engine("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
