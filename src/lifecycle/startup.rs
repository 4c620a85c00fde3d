//! Service construction and lifecycle.
//!
//! # Responsibilities
//! - Validate configuration and build every store in dependency order
//! - Start and stop background tasks
//!
//! # Design Decisions
//! - Fail fast: an invalid config or secret is fatal
//! - Stores are shared through `Arc`, never through globals

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::clock::SharedClock;
use crate::config::{validate_config, ConfigError, GuardConfig, RetryConfig};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::sweeper::Sweeper;
use crate::resilience::{BreakerRegistry, RetryClass, RetryOptions};
use crate::security::{
    CsrfService, RateLimiter, SecretError, SecurityGate, SignedTokenService, SigningSecret,
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Secret(#[from] SecretError),
}

/// Every store the guard owns.
pub struct GuardServices {
    limiter: Arc<RateLimiter>,
    breakers: Arc<BreakerRegistry>,
    csrf: Arc<CsrfService>,
    tokens: Arc<SignedTokenService>,
    gate: Arc<SecurityGate>,
    retries: RetryConfig,
    cleanup_interval: Duration,
    clock: SharedClock,
    shutdown: Shutdown,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl GuardServices {
    pub fn build(
        config: &GuardConfig,
        secret: &SigningSecret,
        clock: SharedClock,
    ) -> Result<Self, StartupError> {
        validate_config(config).map_err(ConfigError::Validation)?;

        let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone(), clock.clone()));
        let breakers = Arc::new(BreakerRegistry::new(&config.circuit_breakers, clock.clone()));
        let csrf = Arc::new(CsrfService::new(config.csrf.clone(), clock.clone()));
        let tokens = Arc::new(SignedTokenService::new(
            secret,
            config.signed_tokens.clone(),
            clock.clone(),
        )?);
        let gate = Arc::new(
            SecurityGate::new(limiter.clone(), csrf.clone(), config.security.clone())
                .with_body_timeout(Duration::from_secs(config.listener.request_timeout_secs)),
        );

        tracing::info!(
            protection_rules = config.security.protection_rules.len(),
            csrf_ttl_secs = config.csrf.token_ttl_secs,
            "Guard services initialized"
        );

        Ok(Self {
            limiter,
            breakers,
            csrf,
            tokens,
            gate,
            retries: config.retries.clone(),
            cleanup_interval: Duration::from_secs(config.cleanup.interval_secs),
            clock,
            shutdown: Shutdown::new(),
            sweeper: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Spawn the sweeper. Calling it again while running, or after
    /// [`close`](Self::close), does nothing.
    pub fn start(&self) {
        let mut slot = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!("Guard services already closed; not starting sweeper");
            return;
        }
        if slot.is_some() {
            return;
        }
        let sweeper = Sweeper::new(
            self.limiter.clone(),
            self.csrf.clone(),
            self.tokens.clone(),
            self.cleanup_interval,
        );
        *slot = Some(tokio::spawn(sweeper.run(self.shutdown.subscribe())));
    }

    /// Stop background tasks and wait for them to exit. Final.
    pub async fn close(&self) {
        {
            let _slot = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
            self.closed.store(true, Ordering::Release);
        }
        self.shutdown.trigger();
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Sweeper task failed");
            }
        }
        tracing::info!("Guard services closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn csrf(&self) -> &Arc<CsrfService> {
        &self.csrf
    }

    pub fn tokens(&self) -> &Arc<SignedTokenService> {
        &self.tokens
    }

    pub fn gate(&self) -> &Arc<SecurityGate> {
        &self.gate
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Retry options for a class, from the configured presets.
    pub fn retry_options(&self, class: RetryClass) -> RetryOptions {
        RetryOptions::for_class(class, &self.retries)
    }
}
