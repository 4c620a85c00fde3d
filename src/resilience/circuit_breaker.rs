//! Circuit breaker for external dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: testing if the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Half-Open: first call after recovery_timeout
//! Half-Open → Closed: probe call succeeds
//! Half-Open → Open: probe call fails (last_failure_time reset)
//! ```
//!
//! # Design Decisions
//! - Per-dependency circuit breaker (not global)
//! - Fail fast in Open state (the operation is never invoked)
//! - Single probe in Half-Open: concurrent callers are rejected while the
//!   probe is in flight, and a dropped probe frees the slot

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::config::{BreakerSettings, CircuitBreakerConfig};
use crate::errors::{ErrorKind, WizardError};
use crate::observability::metrics;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn gauge_value(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

/// External dependencies guarded by a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    AiProvider,
    UploadProvider,
    MapProvider,
}

impl Dependency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AiProvider => "ai_provider",
            Self::UploadProvider => "upload_provider",
            Self::MapProvider => "map_provider",
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<u64>,
    probe_in_flight: bool,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub dependency: Dependency,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<u64>,
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
}

/// Three-state failure isolator for one dependency.
pub struct CircuitBreaker {
    dependency: Dependency,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new(dependency: Dependency, settings: BreakerSettings, clock: SharedClock) -> Self {
        Self {
            dependency,
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                probe_in_flight: false,
            }),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // State stays consistent across a panic: every update is a plain field write.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        if inner.state != to {
            tracing::info!(
                dependency = %self.dependency,
                from = ?inner.state,
                to = ?to,
                failures = inner.failure_count,
                "Circuit breaker transition"
            );
            inner.state = to;
            metrics::record_breaker_state(self.dependency.as_str(), to.gauge_value());
        }
    }

    /// Ask for permission to call the dependency.
    ///
    /// The returned permit must be settled with [`Permit::success`] or
    /// [`Permit::failure`]. Dropping it unsettled releases a half-open probe
    /// slot without counting an outcome.
    pub fn try_acquire(&self) -> Result<Permit<'_>, WizardError> {
        let now = self.clock.now_ms();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::Open => {
                let last = inner.last_failure_time.unwrap_or(0);
                if now.saturating_sub(last) > self.settings.recovery_timeout_ms {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    Ok(Permit::new(self, true))
                } else {
                    Err(self.rejection(last))
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(self.rejection(inner.last_failure_time.unwrap_or(now)))
                } else {
                    inner.probe_in_flight = true;
                    Ok(Permit::new(self, true))
                }
            }
        }
    }

    fn rejection(&self, last_failure: u64) -> WizardError {
        tracing::debug!(dependency = %self.dependency, "Circuit open, failing fast");
        WizardError::circuit_open(
            self.dependency.as_str(),
            last_failure + self.settings.recovery_timeout_ms + 1,
        )
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        if probe {
            inner.probe_in_flight = false;
        }
        if probe || inner.state == CircuitState::HalfOpen {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    fn on_failure(&self, probe: bool) {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);

        if probe {
            inner.probe_in_flight = false;
            inner.last_failure_time = Some(now);
            self.transition(&mut inner, CircuitState::Open);
            return;
        }

        if inner.state == CircuitState::Closed {
            inner.last_failure_time = Some(now);
            if inner.failure_count >= self.settings.failure_threshold {
                tracing::warn!(
                    dependency = %self.dependency,
                    threshold = self.settings.failure_threshold,
                    "Failure threshold reached, opening circuit"
                );
                self.transition(&mut inner, CircuitState::Open);
            }
        }
    }

    fn on_abandon(&self, probe: bool) {
        if probe {
            self.lock().probe_in_flight = false;
        }
    }

    /// Run `op` through the breaker.
    ///
    /// Every error except cancellation counts as a dependency failure.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, WizardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, WizardError>>,
    {
        let permit = self.try_acquire()?;
        match op().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(err) if matches!(err.kind(), ErrorKind::Cancelled) => {
                drop(permit);
                Err(err)
            }
            Err(err) => {
                permit.failure();
                Err(err)
            }
        }
    }

    pub fn dependency(&self) -> Dependency {
        self.dependency
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            dependency: self.dependency,
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_time: inner.last_failure_time,
            failure_threshold: self.settings.failure_threshold,
            recovery_timeout_ms: self.settings.recovery_timeout_ms,
        }
    }

    /// Force the breaker back to Closed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.last_failure_time = None;
        inner.probe_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed);
    }
}

/// Permission to make one call through a [`CircuitBreaker`].
#[must_use = "settle the permit with success() or failure()"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// Whether this call is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandon(self.probe);
        }
    }
}

/// One breaker per external dependency.
pub struct BreakerRegistry {
    ai_provider: Arc<CircuitBreaker>,
    upload_provider: Arc<CircuitBreaker>,
    map_provider: Arc<CircuitBreaker>,
}

impl BreakerRegistry {
    pub fn new(config: &CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            ai_provider: Arc::new(CircuitBreaker::new(
                Dependency::AiProvider,
                config.ai_provider,
                clock.clone(),
            )),
            upload_provider: Arc::new(CircuitBreaker::new(
                Dependency::UploadProvider,
                config.upload_provider,
                clock.clone(),
            )),
            map_provider: Arc::new(CircuitBreaker::new(
                Dependency::MapProvider,
                config.map_provider,
                clock,
            )),
        }
    }

    pub fn get(&self, dependency: Dependency) -> Arc<CircuitBreaker> {
        match dependency {
            Dependency::AiProvider => self.ai_provider.clone(),
            Dependency::UploadProvider => self.upload_provider.clone(),
            Dependency::MapProvider => self.map_provider.clone(),
        }
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        [&self.ai_provider, &self.upload_provider, &self.map_provider]
            .iter()
            .map(|b| b.snapshot())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::errors::{AiErrorCode, NetworkErrorCode};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn breaker(threshold: u32, recovery_ms: u64) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000));
        let breaker = CircuitBreaker::new(
            Dependency::AiProvider,
            BreakerSettings::new(threshold, recovery_ms),
            clock.clone(),
        );
        (breaker, clock)
    }

    fn fail() -> Result<(), WizardError> {
        Err(WizardError::ai(AiErrorCode::ApiError, "503"))
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let (breaker, _) = breaker(3, 1_000);
        for _ in 0..2 {
            let _ = breaker.call(|| async { fail() }).await;
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        let _ = breaker.call(|| async { fail() }).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().failure_count, 3);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking() {
        let (breaker, clock) = breaker(1, 1_000);
        let _ = breaker.call(|| async { fail() }).await;

        let invoked = AtomicU32::new(0);
        clock.advance(Duration::from_millis(1_000));
        let err = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CIRCUIT_BREAKER_OPEN");
        assert!(err.is_retryable());
        assert_eq!(err.context_u64("retryAt"), Some(11_001));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_probe_success_closes() {
        let (breaker, clock) = breaker(1, 1_000);
        let _ = breaker.call(|| async { fail() }).await;
        clock.advance(Duration::from_millis(1_001));

        breaker.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_probe_failure_reopens() {
        let (breaker, clock) = breaker(1, 1_000);
        let _ = breaker.call(|| async { fail() }).await;
        clock.advance(Duration::from_millis(1_001));

        let _ = breaker.call(|| async { fail() }).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().last_failure_time, Some(11_001));

        clock.advance(Duration::from_millis(500));
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn test_single_probe_in_flight() {
        let (breaker, clock) = breaker(1, 1_000);
        breaker.try_acquire().unwrap().failure();
        clock.advance(Duration::from_millis(2_000));

        let probe = breaker.try_acquire().unwrap();
        assert!(probe.is_probe());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_err());

        drop(probe);
        let probe = breaker.try_acquire().unwrap();
        probe.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let (breaker, _) = breaker(3, 1_000);
        let _ = breaker.call(|| async { fail() }).await;
        let _ = breaker.call(|| async { fail() }).await;
        breaker.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.snapshot().failure_count, 0);
        let _ = breaker.call(|| async { fail() }).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_a_failure() {
        let (breaker, _) = breaker(1, 1_000);
        let _ = breaker
            .call(|| async { Err::<(), _>(WizardError::cancelled()) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        let _ = breaker
            .call(|| async {
                Err::<(), _>(WizardError::network(NetworkErrorCode::Timeout, "t"))
            })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_registry_returns_configured_breakers() {
        let registry = BreakerRegistry::new(
            &CircuitBreakerConfig::default(),
            Arc::new(ManualClock::new(0)),
        );
        let upload = registry.get(Dependency::UploadProvider);
        assert_eq!(upload.snapshot().failure_threshold, 3);
        assert_eq!(registry.snapshots().len(), 3);
    }
}
