//! Error → recovery plan resolution. Pure; performs no I/O.

use serde::Serialize;

use crate::errors::{
    AiErrorCode, DraftErrorCode, ErrorKind, MapErrorCode, UploadErrorCode, ValidationCode,
    WizardError,
};

/// How loudly to surface a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// What the client should do when the user picks an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Retry,
    /// `at` is epoch milliseconds, when known.
    WaitAndRetry { at: Option<u64> },
    UseFallbackTemplate,
    CompressImage,
    ChooseDifferentFile,
    FocusField { field: String },
    EnterManually,
    SaveLocally,
    StartFresh,
    RefreshSession,
    ReportIssue,
    Dismiss,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryAction {
    pub label: String,
    pub action: ActionKind,
    pub primary: bool,
}

impl RecoveryAction {
    fn primary(label: &str, action: ActionKind) -> Self {
        Self {
            label: label.to_string(),
            action,
            primary: true,
        }
    }

    fn secondary(label: &str, action: ActionKind) -> Self {
        Self {
            label: label.to_string(),
            action,
            primary: false,
        }
    }
}

/// Caller capabilities that change which actions are offered.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryOptions {
    /// Offer retry actions for retryable errors.
    pub allow_retry: bool,
    /// A template can stand in for AI output.
    pub fallback_available: bool,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            allow_retry: true,
            fallback_available: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPlan {
    pub message: String,
    pub actions: Vec<RecoveryAction>,
    pub severity: Severity,
    pub can_auto_recover: bool,
}

impl RecoveryPlan {
    pub fn primary_action(&self) -> Option<&RecoveryAction> {
        self.actions.iter().find(|a| a.primary)
    }
}

/// Resolve an error into a plan.
pub fn resolve(error: &WizardError, options: &RecoveryOptions) -> RecoveryPlan {
    let can_retry = options.allow_retry && error.is_retryable();
    let fallback = options.fallback_available;

    let (actions, severity, can_auto_recover) = match error.kind() {
        ErrorKind::AiService(AiErrorCode::RateLimit) => (
            vec![
                fallback.then(|| {
                    RecoveryAction::primary("Use a template instead", ActionKind::UseFallbackTemplate)
                }),
                can_retry.then(|| {
                    RecoveryAction::secondary("Try again later", ActionKind::WaitAndRetry { at: None })
                }),
            ],
            Severity::Warning,
            fallback,
        ),
        ErrorKind::AiService(AiErrorCode::QuotaExceeded) => (
            vec![fallback.then(|| {
                RecoveryAction::primary("Use a template instead", ActionKind::UseFallbackTemplate)
            })],
            Severity::Error,
            fallback,
        ),
        ErrorKind::AiService(_) => (
            vec![
                can_retry.then(|| RecoveryAction::primary("Try again", ActionKind::Retry)),
                fallback.then(|| {
                    RecoveryAction::secondary("Use a template instead", ActionKind::UseFallbackTemplate)
                }),
            ],
            Severity::Warning,
            false,
        ),
        ErrorKind::Upload(UploadErrorCode::FileTooLarge) => (
            vec![
                Some(RecoveryAction::primary(
                    "Compress or resize the image",
                    ActionKind::CompressImage,
                )),
                Some(RecoveryAction::secondary(
                    "Choose a different file",
                    ActionKind::ChooseDifferentFile,
                )),
            ],
            Severity::Error,
            false,
        ),
        ErrorKind::Upload(UploadErrorCode::InvalidType) => (
            vec![Some(RecoveryAction::primary(
                "Choose a different file",
                ActionKind::ChooseDifferentFile,
            ))],
            Severity::Error,
            false,
        ),
        ErrorKind::Upload(UploadErrorCode::SecurityValidationFailed) => (
            vec![Some(RecoveryAction::primary(
                "Start the upload again",
                ActionKind::RefreshSession,
            ))],
            Severity::Error,
            false,
        ),
        ErrorKind::Upload(_) => (
            vec![
                can_retry.then(|| RecoveryAction::primary("Retry upload", ActionKind::Retry)),
                Some(RecoveryAction::secondary(
                    "Choose a different file",
                    ActionKind::ChooseDifferentFile,
                )),
            ],
            Severity::Warning,
            false,
        ),
        ErrorKind::Validation {
            code: ValidationCode::RateLimit,
            ..
        } => (
            vec![Some(RecoveryAction::primary(
                "Wait and try again",
                ActionKind::WaitAndRetry {
                    at: error.context_u64("resetTime"),
                },
            ))],
            Severity::Warning,
            true,
        ),
        ErrorKind::Validation {
            code: ValidationCode::CsrfInvalid,
            ..
        } => (
            vec![Some(RecoveryAction::primary(
                "Refresh the page",
                ActionKind::RefreshSession,
            ))],
            Severity::Warning,
            true,
        ),
        ErrorKind::Validation {
            code: ValidationCode::PayloadTooLarge,
            ..
        } => (
            vec![Some(RecoveryAction::primary(
                "Shorten your input",
                ActionKind::Dismiss,
            ))],
            Severity::Error,
            false,
        ),
        ErrorKind::Validation { field_errors, .. } => {
            let focus = field_errors.first().map(|first| {
                RecoveryAction::primary(
                    "Fix the highlighted field",
                    ActionKind::FocusField {
                        field: first.field.clone(),
                    },
                )
            });
            (vec![focus], Severity::Info, false)
        }
        ErrorKind::MapService(MapErrorCode::GeocodingFailed)
        | ErrorKind::MapService(MapErrorCode::CoordinatesOutOfBounds) => (
            vec![Some(RecoveryAction::primary(
                "Enter the location manually",
                ActionKind::EnterManually,
            ))],
            Severity::Warning,
            false,
        ),
        ErrorKind::MapService(_) => (
            vec![
                can_retry.then(|| RecoveryAction::primary("Try again", ActionKind::Retry)),
                Some(RecoveryAction::secondary(
                    "Enter the location manually",
                    ActionKind::EnterManually,
                )),
            ],
            Severity::Warning,
            false,
        ),
        ErrorKind::Draft(DraftErrorCode::SaveFailed) => (
            vec![
                can_retry.then(|| RecoveryAction::primary("Try saving again", ActionKind::Retry)),
                Some(RecoveryAction::secondary(
                    "Keep a copy on this device",
                    ActionKind::SaveLocally,
                )),
            ],
            Severity::Warning,
            can_retry,
        ),
        ErrorKind::Draft(DraftErrorCode::NotFound) | ErrorKind::Draft(DraftErrorCode::LoadFailed) => (
            vec![
                can_retry.then(|| RecoveryAction::primary("Try again", ActionKind::Retry)),
                Some(RecoveryAction::secondary("Start a new listing", ActionKind::StartFresh)),
            ],
            Severity::Warning,
            false,
        ),
        ErrorKind::Draft(DraftErrorCode::PermissionDenied) => (
            vec![Some(RecoveryAction::primary(
                "Refresh the page",
                ActionKind::RefreshSession,
            ))],
            Severity::Error,
            false,
        ),
        ErrorKind::Draft(_) => (
            vec![can_retry.then(|| RecoveryAction::primary("Try again", ActionKind::Retry))],
            Severity::Warning,
            false,
        ),
        ErrorKind::Network(_) => (
            vec![can_retry.then(|| RecoveryAction::primary("Try again", ActionKind::Retry))],
            Severity::Warning,
            can_retry,
        ),
        ErrorKind::CircuitOpen => (
            vec![Some(RecoveryAction::primary(
                "Try again shortly",
                ActionKind::WaitAndRetry {
                    at: error.context_u64("retryAt"),
                },
            ))],
            Severity::Warning,
            true,
        ),
        ErrorKind::Cancelled => (
            vec![Some(RecoveryAction::primary("Dismiss", ActionKind::Dismiss))],
            Severity::Info,
            false,
        ),
        ErrorKind::Unknown => (
            vec![
                Some(RecoveryAction::primary("Try again", ActionKind::Retry)),
                Some(RecoveryAction::secondary("Report this problem", ActionKind::ReportIssue)),
            ],
            Severity::Error,
            false,
        ),
    };

    let mut actions: Vec<RecoveryAction> = actions.into_iter().flatten().collect();
    if actions.is_empty() {
        actions.push(RecoveryAction::primary("Dismiss", ActionKind::Dismiss));
    } else if !actions.iter().any(|a| a.primary) {
        actions[0].primary = true;
    }

    RecoveryPlan {
        message: error.user_message().to_string(),
        actions,
        severity,
        can_auto_recover,
    }
}
