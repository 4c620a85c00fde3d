//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Build stores → start() spawns the sweeper
//!
//! Sweeper (sweeper.rs):
//!     Every cleanup interval → purge rate-limit windows, CSRF tokens, revocations
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → close() stops the sweeper → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then stores, then listeners
//! - Background tasks are owned by `GuardServices` and joined on close

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod sweeper;

pub use shutdown::Shutdown;
pub use startup::{GuardServices, StartupError};
pub use sweeper::{SweepReport, Sweeper};
