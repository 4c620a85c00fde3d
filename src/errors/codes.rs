//! Closed per-domain error code enumerations.
//!
//! The string forms returned by `as_str` are the contract the UI and log
//! pipelines key off of. They must never change once published.

use serde::{Deserialize, Serialize};

/// Failures reported by the AI content-generation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AiErrorCode {
    RateLimit,
    ApiError,
    InvalidResponse,
    NetworkError,
    Timeout,
    QuotaExceeded,
    ModelNotFound,
}

impl AiErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "RATE_LIMIT",
            Self::ApiError => "API_ERROR",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::ModelNotFound => "MODEL_NOT_FOUND",
        }
    }

    pub(crate) fn default_retryable(self) -> bool {
        !matches!(self, Self::QuotaExceeded | Self::ModelNotFound)
    }

    pub(crate) fn user_message(self) -> &'static str {
        match self {
            Self::RateLimit => "The AI assistant is busy right now. Please wait a moment or use a template instead.",
            Self::ApiError => "The AI assistant ran into a problem. Please try again.",
            Self::InvalidResponse => "The AI assistant returned an unexpected answer. Please try again or write the text yourself.",
            Self::NetworkError => "We could not reach the AI assistant. Check your connection and try again.",
            Self::Timeout => "The AI assistant took too long to respond. Please try again.",
            Self::QuotaExceeded => "The AI generation quota has been used up. Please use a template or write the text yourself.",
            Self::ModelNotFound => "The AI assistant is currently unavailable. Please use a template instead.",
        }
    }
}

/// Failures in file and image upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadErrorCode {
    FileTooLarge,
    InvalidType,
    UploadFailed,
    NetworkError,
    QuotaExceeded,
    ProcessingError,
    SecurityValidationFailed,
}

impl UploadErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::InvalidType => "INVALID_TYPE",
            Self::UploadFailed => "UPLOAD_FAILED",
            Self::NetworkError => "NETWORK_ERROR",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::ProcessingError => "PROCESSING_ERROR",
            Self::SecurityValidationFailed => "SECURITY_VALIDATION_FAILED",
        }
    }

    pub(crate) fn default_retryable(self) -> bool {
        matches!(
            self,
            Self::UploadFailed | Self::NetworkError | Self::ProcessingError
        )
    }

    pub(crate) fn user_message(self) -> &'static str {
        match self {
            Self::FileTooLarge => "This file is too large. Please compress or resize it and try again.",
            Self::InvalidType => "This file type is not supported. Please choose a different file.",
            Self::UploadFailed => "The upload did not complete. Please try again.",
            Self::NetworkError => "The upload was interrupted by a connection problem. Please try again.",
            Self::QuotaExceeded => "You have reached your storage limit. Remove some files before uploading more.",
            Self::ProcessingError => "We could not process this file. Please try again.",
            Self::SecurityValidationFailed => "The upload link is no longer valid. Please refresh the page and try again.",
        }
    }
}

/// Sub-classification of validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    /// Field-level input errors.
    #[serde(rename = "VALIDATION_ERROR")]
    InvalidInput,
    /// Admission refused by the rate limiter.
    RateLimit,
    /// Missing, expired or mismatched anti-forgery token.
    CsrfInvalid,
    PayloadTooLarge,
}

impl ValidationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "VALIDATION_ERROR",
            Self::RateLimit => "RATE_LIMIT",
            Self::CsrfInvalid => "CSRF_INVALID",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
        }
    }

    pub(crate) fn user_message(self) -> &'static str {
        match self {
            Self::InvalidInput => "Some fields need your attention before you can continue.",
            Self::RateLimit => "Too many requests. Please wait a moment before trying again.",
            Self::CsrfInvalid => "Your session has expired. Please refresh the page and try again.",
            Self::PayloadTooLarge => "The submitted data is too large.",
        }
    }
}

/// Failures in the map and geocoding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MapErrorCode {
    GeocodingFailed,
    CoordinatesOutOfBounds,
    NetworkError,
    ServiceUnavailable,
}

impl MapErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GeocodingFailed => "GEOCODING_FAILED",
            Self::CoordinatesOutOfBounds => "COORDINATES_OUT_OF_BOUNDS",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    pub(crate) fn default_retryable(self) -> bool {
        matches!(self, Self::NetworkError | Self::ServiceUnavailable)
    }

    pub(crate) fn user_message(self) -> &'static str {
        match self {
            Self::GeocodingFailed => "We could not find this address. Please check it or place the pin manually.",
            Self::CoordinatesOutOfBounds => "The selected location is outside the supported area.",
            Self::NetworkError => "The map could not be reached. Check your connection and try again.",
            Self::ServiceUnavailable => "The map service is temporarily unavailable. You can enter the location manually.",
        }
    }
}

/// Failures in draft persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DraftErrorCode {
    SaveFailed,
    LoadFailed,
    DeleteFailed,
    NotFound,
    PermissionDenied,
}

impl DraftErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SaveFailed => "SAVE_FAILED",
            Self::LoadFailed => "LOAD_FAILED",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::PermissionDenied => "PERMISSION_DENIED",
        }
    }

    pub(crate) fn default_retryable(self) -> bool {
        matches!(self, Self::SaveFailed | Self::LoadFailed | Self::DeleteFailed)
    }

    pub(crate) fn user_message(self) -> &'static str {
        match self {
            Self::SaveFailed => "Your draft could not be saved. Your changes are kept on this page.",
            Self::LoadFailed => "Your draft could not be loaded. Please try again.",
            Self::DeleteFailed => "The draft could not be deleted. Please try again.",
            Self::NotFound => "This draft no longer exists.",
            Self::PermissionDenied => "You do not have access to this draft.",
        }
    }
}

/// Transport-level failures. Always retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkErrorCode {
    NetworkError,
    Timeout,
    ServerError,
}

impl NetworkErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ServerError => "SERVER_ERROR",
        }
    }

    pub(crate) fn user_message(self) -> &'static str {
        match self {
            Self::NetworkError => "A connection problem occurred. Please check your internet connection.",
            Self::Timeout => "The request took too long. Please try again.",
            Self::ServerError => "The server ran into a problem. Please try again in a moment.",
        }
    }
}
