#![forbid(unsafe_code)]
//! Per-(metric, model) alert state machine with cooldown and notification.

mod engine;
mod notify;
mod transition;

pub use engine::{AlertEngine, AlertOutcome};
pub use notify::{deliver_with_retry, Delivery, LogNotifier, Notifier, NotifyError, RetryPolicy};
pub use transition::{severity_for, transition, Transition};

pub const CRATE_NAME: &str = "evalwatch-alerts";
