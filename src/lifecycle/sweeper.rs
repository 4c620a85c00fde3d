//! Periodic purge of expired entries.
//!
//! Each store is swept shard by shard (`DashMap::retain`), so a sweep never
//! holds one lock across a whole table.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::observability::metrics;
use crate::security::{CsrfService, RateLimiter, SignedTokenService};

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rate_limit_windows: usize,
    pub csrf_tokens: usize,
    pub revocations: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.rate_limit_windows + self.csrf_tokens + self.revocations
    }
}

pub struct Sweeper {
    limiter: Arc<RateLimiter>,
    csrf: Arc<CsrfService>,
    tokens: Arc<SignedTokenService>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        limiter: Arc<RateLimiter>,
        csrf: Arc<CsrfService>,
        tokens: Arc<SignedTokenService>,
        interval: Duration,
    ) -> Self {
        Self {
            limiter,
            csrf,
            tokens,
            interval,
        }
    }

    pub fn sweep_once(&self) -> SweepReport {
        let report = SweepReport {
            rate_limit_windows: self.limiter.purge_expired(),
            csrf_tokens: self.csrf.purge_expired(),
            revocations: self.tokens.purge_expired(),
        };
        metrics::record_sweep("rate_limit", report.rate_limit_windows);
        metrics::record_sweep("csrf", report.csrf_tokens);
        metrics::record_sweep("revocations", report.revocations);
        tracing::debug!(
            rate_limit_windows = report.rate_limit_windows,
            csrf_tokens = report.csrf_tokens,
            revocations = report.revocations,
            "Sweep complete"
        );
        report
    }

    /// Sweep every interval until shutdown. The first sweep happens one
    /// interval after start.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Sweeper starting");

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
