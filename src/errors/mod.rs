//! Error taxonomy.
//!
//! # Data Flow
//! ```text
//! External call fails (provider response, io error, timeout)
//!     → factory.rs (classify by status code or message heuristics)
//!     → WizardError { kind, code, retryable, user_message, context }
//!     → resilience (retry predicate reads `is_retryable()` / `kind()`)
//!     → recovery (resolver dispatches on `kind()`)
//!     → http (uniform JSON error body)
//! ```
//!
//! # Design Decisions
//! - One concrete error type, subtyped by an enum tag instead of a class tree
//! - Codes are closed enumerations (codes.rs), never free text
//! - `user_message` is never empty; raw messages are for logs only

pub mod codes;
pub mod factory;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use codes::{
    AiErrorCode, DraftErrorCode, MapErrorCode, NetworkErrorCode, UploadErrorCode, ValidationCode,
};
pub use factory::{DraftOperation, ErrorDomain, ErrorFactory};

/// Result type for guarded wizard operations.
pub type WizardResult<T> = Result<T, WizardError>;

/// Opaque key/value bag attached to an error.
pub type ErrorContext = BTreeMap<String, Value>;

/// A single invalid form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failure domain of a [`WizardError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    AiService(AiErrorCode),
    Upload(UploadErrorCode),
    /// Field errors keep submission order so the UI can focus the first one.
    Validation {
        code: ValidationCode,
        field_errors: Vec<FieldError>,
    },
    MapService(MapErrorCode),
    Draft(DraftErrorCode),
    Network(NetworkErrorCode),
    /// A circuit breaker refused the call without invoking the dependency.
    CircuitOpen,
    /// The caller abandoned the operation.
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// Stable machine identifier.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AiService(c) => c.as_str(),
            Self::Upload(c) => c.as_str(),
            Self::Validation { code, .. } => code.as_str(),
            Self::MapService(c) => c.as_str(),
            Self::Draft(c) => c.as_str(),
            Self::Network(c) => c.as_str(),
            Self::CircuitOpen => "CIRCUIT_BREAKER_OPEN",
            Self::Cancelled => "OPERATION_CANCELLED",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Name of the failure domain, as used in logs.
    pub fn domain(&self) -> &'static str {
        match self {
            Self::AiService(_) => "ai_service",
            Self::Upload(_) => "upload",
            Self::Validation { .. } => "validation",
            Self::MapService(_) => "map_service",
            Self::Draft(_) => "draft",
            Self::Network(_) => "network",
            Self::CircuitOpen => "circuit_breaker",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    fn default_retryable(&self) -> bool {
        match self {
            Self::AiService(c) => c.default_retryable(),
            Self::Upload(c) => c.default_retryable(),
            Self::Validation { .. } => false,
            Self::MapService(c) => c.default_retryable(),
            Self::Draft(c) => c.default_retryable(),
            Self::Network(_) => true,
            Self::CircuitOpen => true,
            Self::Cancelled => false,
            Self::Unknown => false,
        }
    }

    fn default_user_message(&self) -> &'static str {
        match self {
            Self::AiService(c) => c.user_message(),
            Self::Upload(c) => c.user_message(),
            Self::Validation { code, .. } => code.user_message(),
            Self::MapService(c) => c.user_message(),
            Self::Draft(c) => c.user_message(),
            Self::Network(c) => c.user_message(),
            Self::CircuitOpen => "This service is temporarily unavailable. Please try again in a minute.",
            Self::Cancelled => "The operation was cancelled.",
            Self::Unknown => "Something went wrong. Please try again.",
        }
    }
}

/// Classified failure surfaced by every component of the guard.
#[derive(Debug, Clone, Error)]
#[error("[{}] {message}", .kind.code())]
pub struct WizardError {
    kind: ErrorKind,
    message: String,
    user_message: String,
    retryable: bool,
    context: ErrorContext,
}

impl WizardError {
    /// Create an error of the given kind with its default flags and user message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retryable = kind.default_retryable();
        let user_message = kind.default_user_message().to_string();
        Self {
            kind,
            message: message.into(),
            user_message,
            retryable,
            context: ErrorContext::new(),
        }
    }

    pub fn ai(code: AiErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AiService(code), message)
    }

    pub fn upload(code: UploadErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upload(code), message)
    }

    pub fn map(code: MapErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MapService(code), message)
    }

    pub fn draft(code: DraftErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Draft(code), message)
    }

    pub fn network(code: NetworkErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network(code), message)
    }

    /// Field-level validation failure.
    pub fn validation(message: impl Into<String>, field_errors: Vec<FieldError>) -> Self {
        Self::new(
            ErrorKind::Validation {
                code: ValidationCode::InvalidInput,
                field_errors,
            },
            message,
        )
    }

    /// Rejection by the rate limiter. `reset_time` is epoch milliseconds.
    pub fn rate_limited(
        operation: &str,
        limit: u32,
        remaining: u32,
        reset_time: u64,
        total_hits: u32,
    ) -> Self {
        Self::new(
            ErrorKind::Validation {
                code: ValidationCode::RateLimit,
                field_errors: Vec::new(),
            },
            format!("rate limit exceeded for {operation}"),
        )
        .with_context("operation", operation)
        .with_context("limit", limit)
        .with_context("remaining", remaining)
        .with_context("resetTime", reset_time)
        .with_context("totalHits", total_hits)
    }

    pub fn csrf_invalid(reason: &str) -> Self {
        Self::new(
            ErrorKind::Validation {
                code: ValidationCode::CsrfInvalid,
                field_errors: Vec::new(),
            },
            format!("csrf validation failed: {reason}"),
        )
        .with_context("reason", reason)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Validation {
                code: ValidationCode::PayloadTooLarge,
                field_errors: Vec::new(),
            },
            message,
        )
    }

    /// Fail-fast rejection from an open circuit. `retry_at` is epoch milliseconds.
    pub fn circuit_open(dependency: &str, retry_at: u64) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!("circuit breaker open for {dependency}"),
        )
        .with_context("dependency", dependency)
        .with_context("retryAt", retry_at)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled by caller")
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Attach a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Replace the user-facing message. Empty messages are ignored.
    pub fn with_user_message(mut self, user_message: impl Into<String>) -> Self {
        let user_message = user_message.into();
        if !user_message.trim().is_empty() {
            self.user_message = user_message;
        }
        self
    }

    /// Override the retryable flag. Network errors stay retryable.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable || matches!(self.kind, ErrorKind::Network(_));
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn context_u64(&self, key: &str) -> Option<u64> {
        self.context.get(key).and_then(Value::as_u64)
    }

    /// Field errors for validation failures, empty otherwise.
    pub fn field_errors(&self) -> &[FieldError] {
        match &self.kind {
            ErrorKind::Validation { field_errors, .. } => field_errors,
            _ => &[],
        }
    }

    /// Wire representation used by the HTTP layer and logs.
    pub fn to_body(&self) -> ErrorBody<'_> {
        ErrorBody {
            code: self.code(),
            message: &self.user_message,
            retryable: self.retryable,
            field_errors: self.field_errors(),
            context: &self.context,
        }
    }
}

/// Serializable view of a [`WizardError`]. Never includes the raw message.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub code: &'static str,
    pub message: &'a str,
    pub retryable: bool,
    #[serde(rename = "fieldErrors", skip_serializing_if = "no_field_errors")]
    pub field_errors: &'a [FieldError],
    #[serde(skip_serializing_if = "no_context")]
    pub context: &'a ErrorContext,
}

fn no_field_errors(errors: &&[FieldError]) -> bool {
    errors.is_empty()
}

fn no_context(context: &&ErrorContext) -> bool {
    context.is_empty()
}

impl fmt::Display for ErrorBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
