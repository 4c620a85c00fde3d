//! Resilience and security layer for the property listing wizard.
//!
//! Classifies failures, limits request rates, isolates failing dependencies,
//! retries with backoff, guards state-changing requests against forgery and
//! issues signed, expiring file grants.

pub mod clock;
pub mod config;
pub mod errors;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod recovery;
pub mod resilience;
pub mod security;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::GuardConfig;
pub use errors::{WizardError, WizardResult};
pub use http::HttpServer;
pub use lifecycle::{GuardServices, Shutdown};
