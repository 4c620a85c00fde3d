//! Classification of foreign failures into the taxonomy.
//!
//! Every external-call boundary funnels its raw failure through
//! [`ErrorFactory`] so that downstream components only ever see a
//! [`WizardError`].

use std::io;

use super::{
    AiErrorCode, DraftErrorCode, ErrorKind, MapErrorCode, NetworkErrorCode, UploadErrorCode,
    ValidationCode, WizardError,
};

/// Draft persistence operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftOperation {
    Save,
    Load,
    Delete,
}

impl DraftOperation {
    fn failure_code(self) -> DraftErrorCode {
        match self {
            Self::Save => DraftErrorCode::SaveFailed,
            Self::Load => DraftErrorCode::LoadFailed,
            Self::Delete => DraftErrorCode::DeleteFailed,
        }
    }
}

/// The external dependency a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    Ai,
    Upload,
    Map,
    Draft(DraftOperation),
    Generic,
}

/// Heuristic classes recognised in free-text error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageClass {
    Timeout,
    Network,
    Other,
}

fn classify_message(message: &str) -> MessageClass {
    let lower = message.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline") {
        MessageClass::Timeout
    } else if ["network", "fetch", "connection", "econnrefused", "econnreset", "dns", "socket"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        MessageClass::Network
    } else {
        MessageClass::Other
    }
}

/// Builds [`WizardError`]s from provider responses and foreign errors.
pub struct ErrorFactory;

impl ErrorFactory {
    /// Classify an HTTP response from an external provider.
    ///
    /// - `>= 500`: retryable server error
    /// - `429`: rate limit
    /// - `413`: payload too large
    /// - other `4xx`: non-retryable client error
    pub fn from_response(domain: ErrorDomain, status: u16, body: &str) -> WizardError {
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body}")
        };

        let err = match status {
            429 => Self::rate_limit(domain, message),
            413 => Self::too_large(domain, message),
            s if s >= 500 => Self::server_error(domain, message),
            404 => Self::not_found(domain, message),
            401 | 403 => Self::forbidden(domain, message),
            _ => Self::client_error(domain, message),
        };

        err.with_context("status", status)
    }

    /// Classify a foreign error value. Already-classified errors pass through.
    pub fn from_error(domain: ErrorDomain, err: &(dyn std::error::Error + 'static)) -> WizardError {
        if let Some(wizard) = err.downcast_ref::<WizardError>() {
            return wizard.clone();
        }

        if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return Self::timeout(domain, err.to_string());
        }

        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return match io_err.kind() {
                io::ErrorKind::TimedOut => Self::timeout(domain, io_err.to_string()),
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof => Self::network(domain, io_err.to_string()),
                _ => Self::from_message(domain, &io_err.to_string()),
            };
        }

        Self::from_message(domain, &err.to_string())
    }

    /// Classify by message substrings when nothing structured is available.
    pub fn from_message(domain: ErrorDomain, message: &str) -> WizardError {
        match classify_message(message) {
            MessageClass::Timeout => Self::timeout(domain, message.to_string()),
            MessageClass::Network => Self::network(domain, message.to_string()),
            MessageClass::Other => Self::fallback(domain, message.to_string()),
        }
    }

    fn rate_limit(domain: ErrorDomain, message: String) -> WizardError {
        match domain {
            ErrorDomain::Ai => WizardError::ai(AiErrorCode::RateLimit, message),
            ErrorDomain::Upload => WizardError::upload(UploadErrorCode::QuotaExceeded, message),
            ErrorDomain::Map => WizardError::map(MapErrorCode::ServiceUnavailable, message),
            ErrorDomain::Draft(op) => WizardError::draft(op.failure_code(), message),
            ErrorDomain::Generic => WizardError::new(
                ErrorKind::Validation {
                    code: ValidationCode::RateLimit,
                    field_errors: Vec::new(),
                },
                message,
            ),
        }
    }

    fn too_large(domain: ErrorDomain, message: String) -> WizardError {
        match domain {
            ErrorDomain::Upload => WizardError::upload(UploadErrorCode::FileTooLarge, message),
            _ => WizardError::payload_too_large(message),
        }
    }

    fn server_error(domain: ErrorDomain, message: String) -> WizardError {
        let err = match domain {
            ErrorDomain::Ai => WizardError::ai(AiErrorCode::ApiError, message),
            ErrorDomain::Upload => WizardError::upload(UploadErrorCode::UploadFailed, message),
            ErrorDomain::Map => WizardError::map(MapErrorCode::ServiceUnavailable, message),
            ErrorDomain::Draft(op) => WizardError::draft(op.failure_code(), message),
            ErrorDomain::Generic => WizardError::network(NetworkErrorCode::ServerError, message),
        };
        err.with_retryable(true)
    }

    fn not_found(domain: ErrorDomain, message: String) -> WizardError {
        match domain {
            ErrorDomain::Ai => WizardError::ai(AiErrorCode::ModelNotFound, message),
            ErrorDomain::Draft(_) => WizardError::draft(DraftErrorCode::NotFound, message),
            _ => Self::client_error(domain, message),
        }
    }

    fn forbidden(domain: ErrorDomain, message: String) -> WizardError {
        match domain {
            ErrorDomain::Draft(_) => WizardError::draft(DraftErrorCode::PermissionDenied, message),
            ErrorDomain::Upload => {
                WizardError::upload(UploadErrorCode::SecurityValidationFailed, message)
            }
            _ => Self::client_error(domain, message),
        }
    }

    fn client_error(domain: ErrorDomain, message: String) -> WizardError {
        let err = match domain {
            ErrorDomain::Ai => WizardError::ai(AiErrorCode::ApiError, message),
            ErrorDomain::Upload => WizardError::upload(UploadErrorCode::UploadFailed, message),
            ErrorDomain::Map => WizardError::map(MapErrorCode::GeocodingFailed, message),
            ErrorDomain::Draft(op) => WizardError::draft(op.failure_code(), message),
            ErrorDomain::Generic => WizardError::validation(message, Vec::new()),
        };
        err.with_retryable(false)
    }

    fn timeout(domain: ErrorDomain, message: String) -> WizardError {
        match domain {
            ErrorDomain::Ai => WizardError::ai(AiErrorCode::Timeout, message),
            ErrorDomain::Upload => WizardError::upload(UploadErrorCode::NetworkError, message),
            ErrorDomain::Map => WizardError::map(MapErrorCode::NetworkError, message),
            ErrorDomain::Draft(op) => {
                WizardError::draft(op.failure_code(), message).with_retryable(true)
            }
            ErrorDomain::Generic => WizardError::network(NetworkErrorCode::Timeout, message),
        }
    }

    fn network(domain: ErrorDomain, message: String) -> WizardError {
        match domain {
            ErrorDomain::Ai => WizardError::ai(AiErrorCode::NetworkError, message),
            ErrorDomain::Upload => WizardError::upload(UploadErrorCode::NetworkError, message),
            ErrorDomain::Map => WizardError::map(MapErrorCode::NetworkError, message),
            ErrorDomain::Draft(op) => {
                WizardError::draft(op.failure_code(), message).with_retryable(true)
            }
            ErrorDomain::Generic => WizardError::network(NetworkErrorCode::NetworkError, message),
        }
    }

    fn fallback(domain: ErrorDomain, message: String) -> WizardError {
        match domain {
            ErrorDomain::Ai => {
                WizardError::ai(AiErrorCode::ApiError, message).with_retryable(false)
            }
            ErrorDomain::Upload => {
                WizardError::upload(UploadErrorCode::UploadFailed, message).with_retryable(false)
            }
            ErrorDomain::Map => WizardError::map(MapErrorCode::GeocodingFailed, message),
            ErrorDomain::Draft(op) => {
                WizardError::draft(op.failure_code(), message).with_retryable(false)
            }
            ErrorDomain::Generic => WizardError::unknown(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = ErrorFactory::from_response(ErrorDomain::Ai, 503, "overloaded");
        assert_eq!(err.code(), "API_ERROR");
        assert!(err.is_retryable());
        assert_eq!(err.context_u64("status"), Some(503));

        let err = ErrorFactory::from_response(ErrorDomain::Ai, 429, "");
        assert_eq!(err.code(), "RATE_LIMIT");

        let err = ErrorFactory::from_response(ErrorDomain::Upload, 413, "too big");
        assert_eq!(err.code(), "FILE_TOO_LARGE");
        assert!(!err.is_retryable());

        let err = ErrorFactory::from_response(ErrorDomain::Ai, 400, "bad prompt");
        assert_eq!(err.code(), "API_ERROR");
        assert!(!err.is_retryable());

        let err = ErrorFactory::from_response(ErrorDomain::Generic, 502, "");
        assert_eq!(err.code(), "SERVER_ERROR");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_draft_statuses() {
        let err = ErrorFactory::from_response(ErrorDomain::Draft(DraftOperation::Load), 404, "");
        assert_eq!(err.code(), "NOT_FOUND");
        let err = ErrorFactory::from_response(ErrorDomain::Draft(DraftOperation::Save), 403, "");
        assert_eq!(err.code(), "PERMISSION_DENIED");
        let err = ErrorFactory::from_response(ErrorDomain::Draft(DraftOperation::Save), 500, "");
        assert_eq!(err.code(), "SAVE_FAILED");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_message_heuristics() {
        let err = ErrorFactory::from_message(ErrorDomain::Ai, "Request timed out after 30s");
        assert_eq!(err.code(), "TIMEOUT");
        assert!(err.is_retryable());

        let err = ErrorFactory::from_message(ErrorDomain::Map, "Failed to fetch");
        assert_eq!(err.code(), "NETWORK_ERROR");
        assert!(err.is_retryable());

        let err = ErrorFactory::from_message(ErrorDomain::Generic, "something odd");
        assert_eq!(err.code(), "UNKNOWN_ERROR");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_io_errors() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = ErrorFactory::from_error(ErrorDomain::Upload, &io_err);
        assert_eq!(err.code(), "NETWORK_ERROR");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_wizard_errors_pass_through() {
        let original = WizardError::upload(UploadErrorCode::InvalidType, "image/tiff");
        let err = ErrorFactory::from_error(ErrorDomain::Generic, &original);
        assert_eq!(err.code(), "INVALID_TYPE");
        assert_eq!(err.message(), "image/tiff");
    }
}
