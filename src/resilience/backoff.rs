//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryPolicy;

/// Delay before the attempt following failed attempt `attempt` (1-indexed).
///
/// `min(base * factor^(attempt-1), max)`, perturbed by ±10% when the policy
/// enables jitter. Attempt 0 yields no delay.
pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let capped_delay = capped_delay_ms(attempt, policy);
    if !policy.jitter {
        return Duration::from_millis(capped_delay);
    }

    let jitter_range = capped_delay as f64 * 0.1;
    let jitter = if jitter_range > 0.0 {
        rand::thread_rng().gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    Duration::from_millis((capped_delay as f64 + jitter).max(0.0).round() as u64)
}

fn capped_delay_ms(attempt: u32, policy: &RetryPolicy) -> u64 {
    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let raw = policy.base_delay_ms as f64 * policy.backoff_factor.powi(exponent);
    if !raw.is_finite() || raw >= policy.max_delay_ms as f64 {
        policy.max_delay_ms
    } else {
        raw as u64
    }
}
