//! Retry orchestration.
//!
//! # Responsibilities
//! - Decide whether a classified failure is worth another attempt
//! - Execute retries with exponential backoff + jitter
//! - Stop early when the caller cancels
//!
//! # Design Decisions
//! - The retry predicate is a pure function over the error tag and attempt
//! - Per-class presets live in config (`RetryConfig`), not at call sites
//! - Cancellation interrupts both the in-flight attempt and the backoff sleep
//! - Only the inter-attempt sleep suspends; the limiter and breaker never wait

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::{RetryConfig, RetryPolicy};
use crate::errors::{AiErrorCode, DraftErrorCode, ErrorKind, UploadErrorCode, WizardError};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::circuit_breaker::CircuitBreaker;

/// Operation classes with their own retry preset and predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryClass {
    AiGeneration,
    ImageUpload,
    Network,
    Draft,
}

impl RetryClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AiGeneration => "ai_generation",
            Self::ImageUpload => "image_upload",
            Self::Network => "network",
            Self::Draft => "draft",
        }
    }

    /// Preset policy for this class.
    pub fn policy(self, config: &RetryConfig) -> RetryPolicy {
        match self {
            Self::AiGeneration => config.ai_generation,
            Self::ImageUpload => config.image_upload,
            Self::Network => config.network,
            Self::Draft => config.draft,
        }
    }

    /// Default retry predicate for this class.
    pub fn should_retry(self, err: &WizardError, _attempt: u32) -> bool {
        if !err.is_retryable() {
            return false;
        }
        match (self, err.kind()) {
            (_, ErrorKind::Cancelled) => false,
            (Self::AiGeneration, ErrorKind::AiService(code)) => !matches!(
                code,
                AiErrorCode::QuotaExceeded | AiErrorCode::ModelNotFound
            ),
            (Self::ImageUpload, ErrorKind::Upload(code)) => !matches!(
                code,
                UploadErrorCode::FileTooLarge
                    | UploadErrorCode::InvalidType
                    | UploadErrorCode::QuotaExceeded
                    | UploadErrorCode::SecurityValidationFailed
            ),
            (Self::Draft, ErrorKind::Draft(code)) => !matches!(
                code,
                DraftErrorCode::NotFound | DraftErrorCode::PermissionDenied
            ),
            _ => true,
        }
    }
}

impl fmt::Display for RetryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Custom retry predicate: `(error, attempt) -> retry?`.
pub type RetryPredicate = Arc<dyn Fn(&WizardError, u32) -> bool + Send + Sync>;

/// Sending half of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Receiving half of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelToken { rx })
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancelled. Never resolves if the handle is dropped first.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn wait_cancelled(cancel: Option<&CancelToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Options for one retried operation.
#[derive(Clone)]
pub struct RetryOptions {
    pub class: RetryClass,
    pub policy: RetryPolicy,
    predicate: Option<RetryPredicate>,
    cancel: Option<CancelToken>,
}

impl RetryOptions {
    pub fn new(class: RetryClass, policy: RetryPolicy) -> Self {
        Self {
            class,
            policy,
            predicate: None,
            cancel: None,
        }
    }

    /// Options using the configured preset for `class`.
    pub fn for_class(class: RetryClass, config: &RetryConfig) -> Self {
        Self::new(class, class.policy(config))
    }

    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&WizardError, u32) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn should_retry(&self, err: &WizardError, attempt: u32) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(err, attempt),
            None => self.class.should_retry(err, attempt),
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("class", &self.class)
            .field("policy", &self.policy)
            .field("custom_predicate", &self.predicate.is_some())
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct RetryReport<T> {
    pub result: Result<T, WizardError>,
    /// Attempts actually started.
    pub attempts: u32,
    pub total_time: Duration,
}

impl<T> RetryReport<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, WizardError> {
        self.result
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, exhausts
/// `max_attempts` or is cancelled. The last error is returned on failure.
pub async fn retry_with_backoff<F, Fut, T>(mut op: F, options: &RetryOptions) -> RetryReport<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WizardError>>,
{
    let start = Instant::now();
    let cancel = options.cancel.as_ref();
    let max_attempts = options.policy.max_attempts.max(1);
    let mut attempts = 0;

    let finish = |result: Result<T, WizardError>, attempts: u32| RetryReport {
        result,
        attempts,
        total_time: start.elapsed(),
    };

    loop {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return finish(Err(WizardError::cancelled()), attempts);
        }

        attempts += 1;
        metrics::record_retry_attempt(options.class.as_str());

        let outcome = tokio::select! {
            res = op() => res,
            _ = wait_cancelled(cancel) => Err(WizardError::cancelled()),
        };

        let err = match outcome {
            Ok(value) => return finish(Ok(value), attempts),
            Err(err) => err,
        };

        if matches!(err.kind(), ErrorKind::Cancelled) {
            return finish(Err(err), attempts);
        }

        if attempts >= max_attempts || !options.should_retry(&err, attempts) {
            if err.is_retryable() {
                tracing::warn!(
                    class = %options.class,
                    attempts,
                    code = err.code(),
                    "Retries exhausted"
                );
            }
            let err = err.with_context("attempts", attempts);
            return finish(Err(err), attempts);
        }

        let delay = calculate_backoff(attempts, &options.policy);
        tracing::debug!(
            class = %options.class,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            code = err.code(),
            "Retrying operation"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wait_cancelled(cancel) => {
                return finish(Err(WizardError::cancelled()), attempts);
            }
        }
    }
}

/// Retry an operation whose every attempt goes through `breaker`.
pub async fn retry_guarded<F, Fut, T>(
    breaker: &CircuitBreaker,
    op: F,
    options: &RetryOptions,
) -> RetryReport<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, WizardError>>,
{
    let op = &op;
    retry_with_backoff(move || breaker.call(op), options).await
}
