//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → handed to GuardServices::build and HttpServer::new
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Secrets never live in the file, only the name of the env var holding them

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use validation::{validate_config, ConfigViolation};
pub use schema::{
    BreakerSettings, CircuitBreakerConfig, CleanupConfig, CsrfConfig, GuardConfig, ListenerConfig,
    ObservabilityConfig, ProtectionRule, RateLimitRule, RateLimitTable, RetryConfig, RetryPolicy,
    SecurityConfig, SignedTokenConfig,
};
