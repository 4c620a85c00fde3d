//! Error responses.
//!
//! Every failure leaves the service as
//! `{"error": {"code", "message", "retryable", "fieldErrors"?, "context"?}}`
//! with a status derived from the error code. Raw messages stay in the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::errors::{
    AiErrorCode, DraftErrorCode, ErrorBody, ErrorKind, MapErrorCode, NetworkErrorCode,
    UploadErrorCode, ValidationCode, WizardError,
};

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

/// HTTP status for an error.
pub fn status_for(err: &WizardError) -> StatusCode {
    match err.kind() {
        ErrorKind::Validation { code, .. } => match code {
            ValidationCode::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ValidationCode::CsrfInvalid => StatusCode::FORBIDDEN,
            ValidationCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ValidationCode::InvalidInput => StatusCode::BAD_REQUEST,
        },
        ErrorKind::Upload(UploadErrorCode::SecurityValidationFailed) => StatusCode::FORBIDDEN,
        ErrorKind::Upload(UploadErrorCode::FileTooLarge) => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::Upload(UploadErrorCode::InvalidType) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::Draft(DraftErrorCode::NotFound) => StatusCode::NOT_FOUND,
        ErrorKind::Draft(DraftErrorCode::PermissionDenied) => StatusCode::FORBIDDEN,
        ErrorKind::MapService(MapErrorCode::CoordinatesOutOfBounds) => StatusCode::BAD_REQUEST,
        ErrorKind::AiService(AiErrorCode::Timeout)
        | ErrorKind::Network(NetworkErrorCode::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Cancelled => StatusCode::REQUEST_TIMEOUT,
        _ if err.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for WizardError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Request rejected");
        }
        (status, Json(ErrorEnvelope { error: self.to_body() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FieldError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (WizardError::rate_limited("global", 100, 0, 1, 100), StatusCode::TOO_MANY_REQUESTS),
            (WizardError::csrf_invalid("missing"), StatusCode::FORBIDDEN),
            (WizardError::payload_too_large("big"), StatusCode::PAYLOAD_TOO_LARGE),
            (
                WizardError::validation("bad", vec![FieldError::new("title", "required")]),
                StatusCode::BAD_REQUEST,
            ),
            (
                WizardError::upload(UploadErrorCode::SecurityValidationFailed, "sig"),
                StatusCode::FORBIDDEN,
            ),
            (WizardError::circuit_open("ai_provider", 1), StatusCode::SERVICE_UNAVAILABLE),
            (
                WizardError::network(NetworkErrorCode::ServerError, "502"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (WizardError::unknown("?"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{}", err.code());
        }
    }

    #[tokio::test]
    async fn test_body_shape() {
        let response = WizardError::csrf_invalid("mismatch").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], "CSRF_INVALID");
        assert_eq!(json["error"]["retryable"], false);
        assert_eq!(json["error"]["context"]["reason"], "mismatch");
    }
}
