//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::security::middleware::ProtectionLevel;

/// Root configuration for the wizard guard.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Per-operation-class sliding window limits.
    pub rate_limits: RateLimitTable,

    /// Per-dependency circuit breaker thresholds.
    pub circuit_breakers: CircuitBreakerConfig,

    /// Retry presets.
    pub retries: RetryConfig,

    /// Anti-forgery token settings.
    pub csrf: CsrfConfig,

    /// Signed upload/download token settings.
    pub signed_tokens: SignedTokenConfig,

    /// Request protection and response header policy.
    pub security: SecurityConfig,

    /// Background sweep of expired entries.
    pub cleanup: CleanupConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// One sliding window rule.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitRule {
    /// Trailing window length in milliseconds.
    pub window_ms: u64,

    /// Maximum admissions counted inside the window.
    pub max_requests: u32,

    /// Do not record requests reported as successful.
    pub skip_successful_requests: bool,

    /// Do not record requests reported as failed.
    pub skip_failed_requests: bool,
}

impl RateLimitRule {
    pub const fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
            skip_successful_requests: false,
            skip_failed_requests: false,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self::new(60_000, 100)
    }
}

/// Static rate limit table, one rule per operation class.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitTable {
    pub ai_generation: RateLimitRule,
    pub image_upload: RateLimitRule,
    pub draft_save: RateLimitRule,
    pub form_submission: RateLimitRule,
    /// Global per-caller bucket applied by the security middleware.
    pub global: RateLimitRule,
}

impl Default for RateLimitTable {
    fn default() -> Self {
        Self {
            ai_generation: RateLimitRule::new(60_000, 5),
            image_upload: RateLimitRule::new(60_000, 20),
            draft_save: RateLimitRule::new(60_000, 30),
            form_submission: RateLimitRule {
                skip_successful_requests: true,
                ..RateLimitRule::new(300_000, 10)
            },
            global: RateLimitRule::new(60_000, 100),
        }
    }
}

/// Thresholds for one circuit breaker.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a probe is allowed, in milliseconds.
    pub recovery_timeout_ms: u64,
}

impl BreakerSettings {
    pub const fn new(failure_threshold: u32, recovery_timeout_ms: u64) -> Self {
        Self {
            failure_threshold,
            recovery_timeout_ms,
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::new(5, 60_000)
    }
}

/// Circuit breaker configuration per external dependency.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub ai_provider: BreakerSettings,
    pub upload_provider: BreakerSettings,
    pub map_provider: BreakerSettings,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            ai_provider: BreakerSettings::new(5, 60_000),
            upload_provider: BreakerSettings::new(3, 30_000),
            map_provider: BreakerSettings::new(5, 60_000),
        }
    }
}

/// Exponential backoff policy.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Delay after the first failed attempt, in milliseconds.
    pub base_delay_ms: u64,

    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt.
    pub backoff_factor: f64,

    /// Perturb delays by up to ±10%.
    pub jitter: bool,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64, jitter: bool) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            backoff_factor: 2.0,
            jitter,
        }
    }

    pub const fn ai_generation() -> Self {
        Self::new(3, 1_000, 10_000, true)
    }

    pub const fn image_upload() -> Self {
        Self::new(2, 2_000, 8_000, true)
    }

    pub const fn network() -> Self {
        Self::new(3, 500, 5_000, true)
    }

    pub const fn draft() -> Self {
        Self::new(2, 1_000, 3_000, false)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::network()
    }
}

/// Retry presets per operation class.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub ai_generation: RetryPolicy,
    pub image_upload: RetryPolicy,
    pub network: RetryPolicy,
    pub draft: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            ai_generation: RetryPolicy::ai_generation(),
            image_upload: RetryPolicy::image_upload(),
            network: RetryPolicy::network(),
            draft: RetryPolicy::draft(),
        }
    }
}

/// Anti-forgery token configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Token lifetime in seconds (also the cookie Max-Age).
    pub token_ttl_secs: u64,

    /// Path prefixes on which state-changing requests need a token.
    pub protected_paths: Vec<String>,

    /// Mark the cookie `Secure`.
    pub secure_cookie: bool,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 3_600,
            protected_paths: vec![
                "/api/wizard".to_string(),
                "/api/upload".to_string(),
                "/api/drafts".to_string(),
                "/api/ai".to_string(),
            ],
            secure_cookie: true,
        }
    }
}

/// Signed token configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SignedTokenConfig {
    /// Public base URL used when building signed URLs.
    pub base_url: String,

    /// Endpoint path that accepts signed uploads.
    pub endpoint: String,

    /// Environment variable holding the HMAC secret.
    pub secret_env: String,

    /// Expiry used when the caller does not request one, in seconds.
    pub default_expiry_secs: u64,

    pub max_upload_expiry_secs: u64,
    pub max_download_expiry_secs: u64,
    pub max_preview_expiry_secs: u64,
    pub max_delete_expiry_secs: u64,

    /// Maximum length of the sanitized filename part of an upload path.
    pub max_filename_len: usize,
}

impl Default for SignedTokenConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            endpoint: "/api/upload/signed".to_string(),
            secret_env: "WIZARD_GUARD_SIGNING_SECRET".to_string(),
            default_expiry_secs: 3_600,
            max_upload_expiry_secs: 3_600,
            max_download_expiry_secs: 86_400,
            max_preview_expiry_secs: 3_600,
            max_delete_expiry_secs: 300,
            max_filename_len: 100,
        }
    }
}

/// Maps a path prefix to a protection level.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProtectionRule {
    pub prefix: String,
    pub level: ProtectionLevel,
}

impl ProtectionRule {
    pub fn new(prefix: &str, level: ProtectionLevel) -> Self {
        Self {
            prefix: prefix.to_string(),
            level,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable security headers.
    pub enable_headers: bool,

    /// Maximum form body buffered to read the anti-forgery field, in bytes.
    pub max_body_size: usize,

    /// Path classification. The longest matching prefix wins.
    pub protection_rules: Vec<ProtectionRule>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            max_body_size: 2 * 1024 * 1024, // 2MB
            protection_rules: vec![
                ProtectionRule::new("/api/upload/signed", ProtectionLevel::Basic),
                ProtectionRule::new("/api/upload", ProtectionLevel::Full),
                ProtectionRule::new("/api/wizard", ProtectionLevel::Full),
                ProtectionRule::new("/api/drafts", ProtectionLevel::Full),
                ProtectionRule::new("/api/ai", ProtectionLevel::Full),
                ProtectionRule::new("/api", ProtectionLevel::Basic),
            ],
        }
    }
}

/// Background cleanup configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Sweep interval in seconds.
    pub interval_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format: "pretty" or "compact".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tables() {
        let config = GuardConfig::default();
        assert_eq!(config.rate_limits.ai_generation.max_requests, 5);
        assert_eq!(config.rate_limits.ai_generation.window_ms, 60_000);
        assert!(config.rate_limits.form_submission.skip_successful_requests);
        assert_eq!(config.retries.draft.max_attempts, 2);
        assert!(!config.retries.draft.jitter);
        assert_eq!(config.retries.network.base_delay_ms, 500);
        assert_eq!(config.circuit_breakers.upload_provider.failure_threshold, 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: GuardConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [rate_limits.ai_generation]
            max_requests = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.rate_limits.ai_generation.max_requests, 2);
        assert_eq!(config.rate_limits.ai_generation.window_ms, 60_000);
        assert_eq!(config.csrf.token_ttl_secs, 3_600);
    }

    #[test]
    fn test_protection_rules_from_toml() {
        let config: GuardConfig = toml::from_str(
            r#"
            [[security.protection_rules]]
            prefix = "/forms"
            level = "full"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.security.protection_rules,
            vec![ProtectionRule::new("/forms", ProtectionLevel::Full)]
        );
    }
}
