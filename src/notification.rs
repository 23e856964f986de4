//! Notification sinks.
//!
//! The organizer, rule engine and file monitor report user-facing events through a
//! fire-and-forget [`Notifier`]. A sink that fails or is unavailable never stops
//! the caller: [`deliver`] logs the failure and moves on.

use crate::output::OutputFormatter;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for user-facing notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError>;
}

/// Sends a notification, logging instead of failing when the sink is down.
pub fn deliver(notifier: &dyn Notifier, title: &str, message: &str) {
    if let Err(e) = notifier.notify(title, message) {
        tracing::warn!("[notify] dropped '{title}: {message}': {e}");
    }
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        tracing::info!("[notify] {title}: {message}");
        Ok(())
    }
}

/// Prints notifications to the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        OutputFormatter::notice(title, message);
        Ok(())
    }
}
