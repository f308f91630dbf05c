//! Notifier that records what it was asked to send.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use studyhall_core::notify::{Notification, Notifier, NotifyError};
use studyhall_core::types::UserId;

/// Captures notifications for assertions. Can be told to fail every delivery.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(UserId, Notification)>>>,
    failing: bool,
}

impl RecordingNotifier {
    /// A notifier that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier that records, then reports failure for every delivery.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            sent: Arc::default(),
            failing: true,
        }
    }

    /// Everything delivered so far, in order, with its recipient.
    #[must_use]
    pub fn sent(&self) -> Vec<(UserId, Notification)> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(
        &self,
        recipient: UserId,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push((recipient, notification));
            if self.failing {
                return Err(NotifyError("mail relay refused the message".to_string()));
            }
            Ok(())
        })
    }
}
