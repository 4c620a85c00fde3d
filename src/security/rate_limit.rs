//! Sliding window log rate limiter.
//!
//! Each `(identifier, operation class)` pair owns a log of admission
//! timestamps. A check drops timestamps that fell out of the trailing window,
//! compares what is left against the class limit and records the new hit.
//! Admission is a single synchronous decision; nothing here waits.

use std::collections::VecDeque;
use std::fmt;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::config::{RateLimitRule, RateLimitTable};
use crate::errors::WizardError;
use crate::observability::metrics;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_RATELIMIT_USED: HeaderName = HeaderName::from_static("x-ratelimit-used");

/// Operation classes with independent windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    AiGeneration,
    ImageUpload,
    DraftSave,
    FormSubmission,
    /// Global per-caller bucket used by the security middleware.
    Global,
}

impl OperationClass {
    pub const ALL: [OperationClass; 5] = [
        Self::AiGeneration,
        Self::ImageUpload,
        Self::DraftSave,
        Self::FormSubmission,
        Self::Global,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AiGeneration => "ai_generation",
            Self::ImageUpload => "image_upload",
            Self::DraftSave => "draft_save",
            Self::FormSubmission => "form_submission",
            Self::Global => "global",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RateLimitTable {
    /// Rule for an operation class.
    pub fn rule(&self, class: OperationClass) -> RateLimitRule {
        match class {
            OperationClass::AiGeneration => self.ai_generation,
            OperationClass::ImageUpload => self.image_upload,
            OperationClass::DraftSave => self.draft_save,
            OperationClass::FormSubmission => self.form_submission,
            OperationClass::Global => self.global,
        }
    }
}

/// Outcome of the request being admitted, when the caller already knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Failure,
}

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    /// Admissions left in the current window.
    pub remaining: u32,
    /// Epoch milliseconds at which the oldest counted hit leaves the window.
    pub reset_time: u64,
    /// Hits counted in the window, including this one when it was recorded.
    pub total_hits: u32,
}

impl RateLimitDecision {
    /// Write the `X-RateLimit-*` headers. `Reset` is in epoch seconds.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset_time.div_ceil(1_000)));
        headers.insert(X_RATELIMIT_USED, HeaderValue::from(self.total_hits));
    }
}

/// Timestamps admitted within the trailing window, oldest first.
#[derive(Debug, Default)]
struct WindowLog {
    hits: VecDeque<u64>,
}

impl WindowLog {
    /// Drop hits at or before `now - window_ms`. Nothing has aged out
    /// while `now` is still inside the first window.
    fn evict_expired(&mut self, now: u64, window_ms: u64) {
        let Some(cutoff) = now.checked_sub(window_ms) else {
            return;
        };
        while self.hits.front().is_some_and(|&t| t <= cutoff) {
            self.hits.pop_front();
        }
    }
}

type WindowKey = (String, OperationClass);

/// Sliding window rate limiter keyed by identifier and operation class.
pub struct RateLimiter {
    windows: DashMap<WindowKey, WindowLog>,
    table: RateLimitTable,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(table: RateLimitTable, clock: SharedClock) -> Self {
        Self {
            windows: DashMap::new(),
            table,
            clock,
        }
    }

    pub fn table(&self) -> &RateLimitTable {
        &self.table
    }

    /// Decide whether one more request is admitted.
    pub fn is_allowed(
        &self,
        identifier: &str,
        class: OperationClass,
        outcome: Option<RequestOutcome>,
    ) -> RateLimitDecision {
        let rule = self.table.rule(class);
        let now = self.clock.now_ms();

        let mut log = self
            .windows
            .entry((identifier.to_string(), class))
            .or_default();
        log.evict_expired(now, rule.window_ms);

        let counted = log.hits.len() as u32;
        if counted >= rule.max_requests {
            let reset_time = log.hits.front().map_or(now, |&t| t + rule.window_ms);
            return RateLimitDecision {
                allowed: false,
                limit: rule.max_requests,
                remaining: 0,
                reset_time,
                total_hits: counted,
            };
        }

        let skip = match outcome {
            Some(RequestOutcome::Success) => rule.skip_successful_requests,
            Some(RequestOutcome::Failure) => rule.skip_failed_requests,
            None => false,
        };
        if !skip {
            log.hits.push_back(now);
        }

        let total_hits = log.hits.len() as u32;
        let reset_time = log.hits.front().map_or(now + rule.window_ms, |&t| t + rule.window_ms);
        RateLimitDecision {
            allowed: true,
            limit: rule.max_requests,
            remaining: rule.max_requests.saturating_sub(total_hits),
            reset_time,
            total_hits,
        }
    }

    /// Like [`is_allowed`](Self::is_allowed) but turns a refusal into a `RATE_LIMIT` error.
    pub fn check(
        &self,
        identifier: &str,
        class: OperationClass,
        outcome: Option<RequestOutcome>,
    ) -> Result<RateLimitDecision, WizardError> {
        let decision = self.is_allowed(identifier, class, outcome);
        if decision.allowed {
            Ok(decision)
        } else {
            Err(self.reject(identifier, class, &decision))
        }
    }

    /// Log and count a refused decision and turn it into a `RATE_LIMIT` error.
    pub fn reject(
        &self,
        identifier: &str,
        class: OperationClass,
        decision: &RateLimitDecision,
    ) -> WizardError {
        tracing::warn!(
            client = %identifier,
            operation = %class,
            reset_time = decision.reset_time,
            "Rate limit exceeded"
        );
        metrics::record_rate_limited(class.as_str());
        WizardError::rate_limited(
            class.as_str(),
            decision.limit,
            decision.remaining,
            decision.reset_time,
            decision.total_hits,
        )
    }

    /// Forget every hit recorded for an identifier and class.
    pub fn reset(&self, identifier: &str, class: OperationClass) {
        self.windows.remove(&(identifier.to_string(), class));
    }

    /// Drop expired hits and empty windows. Locks one shard at a time.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.windows.len();
        self.windows.retain(|(_, class), log| {
            let window_ms = self.table.rule(*class).window_ms;
            log.evict_expired(now, window_ms);
            !log.hits.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
