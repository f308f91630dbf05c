//! Outbound notifications.
//!
//! Delivery is best-effort. The engine awaits the notifier but only logs a
//! failure; a lost notification never rolls back the state change behind it.

use crate::types::{ReservationId, UserId};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Something a member or operator should be told about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// A membership identifier was issued
    IdentifierIssued {
        /// Owner's identifier
        identifier: String,
    },
    /// An admin confirmed cash collection
    CashCollected {
        /// Reservation confirmed
        reservation_id: ReservationId,
        /// Owner's identifier, if one exists yet
        identifier: Option<String>,
    },
    /// The payment gateway confirmed a payment
    PaymentConfirmed {
        /// Reservation paid for
        reservation_id: ReservationId,
    },
}

impl Notification {
    /// Short name for logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::IdentifierIssued { .. } => "identifier_issued",
            Self::CashCollected { .. } => "cash_collected",
            Self::PaymentConfirmed { .. } => "payment_confirmed",
        }
    }
}

/// Delivery failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Notification sink (email, push, ...)
pub trait Notifier: Send + Sync {
    /// Deliver one notification to `recipient`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if delivery failed.
    fn notify(
        &self,
        recipient: UserId,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>>;
}

/// Notifier that only writes a log line
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(
        &self,
        recipient: UserId,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(%recipient, kind = notification.kind(), ?notification, "notification");
            Ok(())
        })
    }
}
