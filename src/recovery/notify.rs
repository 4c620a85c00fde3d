//! Presenting recovery plans to a user-facing channel.

use crate::recovery::strategy::{RecoveryPlan, Severity};

/// A message ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub code: &'static str,
    pub severity: Severity,
    pub message: String,
    /// Action labels, primary first.
    pub actions: Vec<String>,
}

/// Destination for notifications (toast queue, log, test recorder).
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Hand a resolved plan to a sink.
pub fn present(code: &'static str, plan: &RecoveryPlan, sink: &dyn NotificationSink) {
    let mut actions: Vec<&_> = plan.actions.iter().collect();
    actions.sort_by_key(|a| !a.primary);
    sink.notify(Notification {
        code,
        severity: plan.severity,
        message: plan.message.clone(),
        actions: actions.into_iter().map(|a| a.label.clone()).collect(),
    });
}

/// Writes notifications to the log at a level matching their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, n: Notification) {
        match n.severity {
            Severity::Info => tracing::info!(code = n.code, actions = ?n.actions, "{}", n.message),
            Severity::Warning => tracing::warn!(code = n.code, actions = ?n.actions, "{}", n.message),
            Severity::Error => tracing::error!(code = n.code, actions = ?n.actions, "{}", n.message),
        }
    }
}
