//! Recovery guidance.
//!
//! # Data Flow
//! ```text
//! WizardError
//!     → strategy.rs (resolve: kind + code → RecoveryPlan, no I/O)
//!     → notify.rs (present: plan → NotificationSink)
//! ```
//!
//! Actions are data. The client decides how to carry them out.

pub mod notify;
pub mod strategy;

pub use notify::{present, Notification, NotificationSink, TracingSink};
pub use strategy::{resolve, ActionKind, RecoveryAction, RecoveryOptions, RecoveryPlan, Severity};
