//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, thresholds > 0, expiry caps)
//! - Detect malformed path prefixes
//!
//! # Design Decisions
//! - Returns all violations, not just the first
//! - Validation is a pure function: GuardConfig → Result<(), Vec<ConfigViolation>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{BreakerSettings, GuardConfig, RateLimitRule, RetryPolicy};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ConfigViolation {
    pub field: String,
    pub reason: String,
}

impl ConfigViolation {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Validate a configuration, collecting every violation.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ConfigViolation>> {
    let mut violations = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        violations.push(ConfigViolation::new(
            "listener.bind_address",
            "must be a socket address like 0.0.0.0:8080",
        ));
    }

    let limits = &config.rate_limits;
    for (name, rule) in [
        ("ai_generation", &limits.ai_generation),
        ("image_upload", &limits.image_upload),
        ("draft_save", &limits.draft_save),
        ("form_submission", &limits.form_submission),
        ("global", &limits.global),
    ] {
        check_rate_rule(&format!("rate_limits.{name}"), rule, &mut violations);
    }

    let breakers = &config.circuit_breakers;
    for (name, settings) in [
        ("ai_provider", &breakers.ai_provider),
        ("upload_provider", &breakers.upload_provider),
        ("map_provider", &breakers.map_provider),
    ] {
        check_breaker(&format!("circuit_breakers.{name}"), settings, &mut violations);
    }

    let retries = &config.retries;
    for (name, policy) in [
        ("ai_generation", &retries.ai_generation),
        ("image_upload", &retries.image_upload),
        ("network", &retries.network),
        ("draft", &retries.draft),
    ] {
        check_retry(&format!("retries.{name}"), policy, &mut violations);
    }

    if config.csrf.token_ttl_secs == 0 {
        violations.push(ConfigViolation::new("csrf.token_ttl_secs", "must be positive"));
    }
    for prefix in &config.csrf.protected_paths {
        if !prefix.starts_with('/') {
            violations.push(ConfigViolation::new(
                "csrf.protected_paths",
                format!("prefix {prefix:?} must start with '/'"),
            ));
        }
    }

    let tokens = &config.signed_tokens;
    if url::Url::parse(&tokens.base_url).is_err() {
        violations.push(ConfigViolation::new("signed_tokens.base_url", "must be an absolute URL"));
    }
    if !tokens.endpoint.starts_with('/') {
        violations.push(ConfigViolation::new("signed_tokens.endpoint", "must start with '/'"));
    }
    if tokens.secret_env.is_empty() {
        violations.push(ConfigViolation::new("signed_tokens.secret_env", "must not be empty"));
    }
    for (name, secs) in [
        ("max_upload_expiry_secs", tokens.max_upload_expiry_secs),
        ("max_download_expiry_secs", tokens.max_download_expiry_secs),
        ("max_preview_expiry_secs", tokens.max_preview_expiry_secs),
        ("max_delete_expiry_secs", tokens.max_delete_expiry_secs),
        ("default_expiry_secs", tokens.default_expiry_secs),
    ] {
        if secs == 0 {
            violations.push(ConfigViolation::new(
                format!("signed_tokens.{name}"),
                "must be positive",
            ));
        }
    }
    if tokens.max_filename_len < 8 {
        violations.push(ConfigViolation::new(
            "signed_tokens.max_filename_len",
            "must be at least 8",
        ));
    }

    for rule in &config.security.protection_rules {
        if !rule.prefix.starts_with('/') {
            violations.push(ConfigViolation::new(
                "security.protection_rules",
                format!("prefix {:?} must start with '/'", rule.prefix),
            ));
        }
    }

    if config.cleanup.interval_secs == 0 {
        violations.push(ConfigViolation::new("cleanup.interval_secs", "must be positive"));
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn check_rate_rule(field: &str, rule: &RateLimitRule, out: &mut Vec<ConfigViolation>) {
    if rule.window_ms == 0 {
        out.push(ConfigViolation::new(format!("{field}.window_ms"), "must be positive"));
    }
    if rule.max_requests == 0 {
        out.push(ConfigViolation::new(format!("{field}.max_requests"), "must be positive"));
    }
    if rule.skip_successful_requests && rule.skip_failed_requests {
        out.push(ConfigViolation::new(
            field.to_string(),
            "cannot skip both successful and failed requests",
        ));
    }
}

fn check_breaker(field: &str, settings: &BreakerSettings, out: &mut Vec<ConfigViolation>) {
    if settings.failure_threshold == 0 {
        out.push(ConfigViolation::new(
            format!("{field}.failure_threshold"),
            "must be positive",
        ));
    }
    if settings.recovery_timeout_ms == 0 {
        out.push(ConfigViolation::new(
            format!("{field}.recovery_timeout_ms"),
            "must be positive",
        ));
    }
}

fn check_retry(field: &str, policy: &RetryPolicy, out: &mut Vec<ConfigViolation>) {
    if policy.max_attempts == 0 {
        out.push(ConfigViolation::new(format!("{field}.max_attempts"), "must be positive"));
    }
    if policy.backoff_factor < 1.0 {
        out.push(ConfigViolation::new(format!("{field}.backoff_factor"), "must be >= 1.0"));
    }
    if policy.max_delay_ms < policy.base_delay_ms {
        out.push(ConfigViolation::new(
            format!("{field}.max_delay_ms"),
            "must be >= base_delay_ms",
        ));
    }
}
