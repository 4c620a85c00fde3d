//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to external dependency (AI, upload, map):
//!     → retries.rs (attempt loop, class predicate, cancellation)
//!     → circuit_breaker.rs (fail fast while the dependency is down)
//!     → operation (opaque future supplied by the caller)
//!     → On failure: backoff.rs (delay before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Every failure is already a classified `WizardError` when it gets here
//! - Circuit breaker prevents many callers hammering a saturated dependency
//! - Jittered backoff prevents synchronized retry storms
//! - All resilience logic is composable around plain futures

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitState, Dependency};
pub use retries::{
    retry_guarded, retry_with_backoff, CancelHandle, CancelToken, RetryClass, RetryOptions,
    RetryReport,
};
