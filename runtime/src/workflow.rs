//! Payment and cash-collection transitions driven by requests.
//!
//! Every change goes through [`ReservationStore::apply`] so the status check
//! and the write are one atomic step. Identifier issuance after a payment is
//! best-effort: a failure is logged and the sweeper backfills it when the
//! reservation activates.

use crate::engine::EngineEnvironment;
use crate::issuer::SequenceIssuer;
use chrono::Duration;
use studyhall_core::error::{ConflictError, EngineError, Result};
use studyhall_core::notify::Notification;
use studyhall_core::status::StatusChange;
use studyhall_core::store::ApplyOutcome;
use studyhall_core::types::{Actor, PaymentStatus, Reservation, ReservationId};

/// Result reported by the payment gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Money was captured
    Succeeded {
        /// Gateway payment reference
        reference: String,
    },
    /// Payment was declined or abandoned
    Failed {
        /// Gateway payment reference
        reference: String,
    },
}

/// Request-driven status transitions.
#[derive(Clone, Debug)]
pub struct PaymentWorkflow {
    env: EngineEnvironment,
    issuer: SequenceIssuer,
    cash_window: Duration,
}

impl PaymentWorkflow {
    /// Create the workflow.
    #[must_use]
    pub const fn new(
        env: EngineEnvironment,
        issuer: SequenceIssuer,
        cash_window: Duration,
    ) -> Self {
        Self {
            env,
            issuer,
            cash_window,
        }
    }

    /// `cash_pending → cash_collected`, inside the collection window.
    ///
    /// Issues the owner's identifier if they have none yet.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotPermitted`] unless `admin` is an admin
    /// - [`EngineError::NotFound`] for an unknown reservation
    /// - [`EngineError::AlreadyFinalized`] if collection was already confirmed
    /// - [`ConflictError::ActiveMembershipExists`] if the owner holds another
    ///   membership for overlapping dates
    /// - [`EngineError::InvalidTransition`] from any other status, or after the window
    #[tracing::instrument(skip_all, fields(%reservation_id, admin = %admin.user_id))]
    pub async fn confirm_cash_collection(
        &self,
        reservation_id: ReservationId,
        admin: Actor,
        note: Option<String>,
    ) -> Result<Reservation> {
        if !admin.is_admin() {
            return Err(EngineError::NotPermitted {
                action: "confirm cash collection",
            });
        }

        let change = StatusChange::CollectCash {
            admin: admin.user_id,
            note,
            at: self.env.clock.now(),
            cash_window: self.cash_window,
        };
        let collected = match self.env.reservations.apply(reservation_id, change).await? {
            ApplyOutcome::Applied(reservation) => reservation,
            ApplyOutcome::Rejected(current)
                if current.payment_status == PaymentStatus::CashCollected =>
            {
                return Err(EngineError::AlreadyFinalized(reservation_id));
            }
            other => return Err(refusal(reservation_id, "collect_cash", other)),
        };
        tracing::info!(user_id = %collected.user_id, "Cash collection confirmed");

        let identifier = self.issue_after_payment(&collected).await;
        self.env
            .notify(
                collected.user_id,
                Notification::CashCollected {
                    reservation_id,
                    identifier,
                },
            )
            .await;
        Ok(collected)
    }

    /// Withdraw a booking before it is paid.
    ///
    /// Card/UPI bookings can be cancelled while `pending`; cash bookings while
    /// `cash_pending` and inside the collection window. Only the owner or an
    /// admin may cancel.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] for an unknown reservation
    /// - [`EngineError::NotPermitted`] if `actor` neither owns it nor is an admin
    /// - [`EngineError::InvalidTransition`] once paid, expired or already cancelled
    #[tracing::instrument(skip_all, fields(%reservation_id, actor = %actor.user_id))]
    pub async fn cancel(&self, reservation_id: ReservationId, actor: Actor) -> Result<Reservation> {
        let Some(current) = self.env.reservations.get(reservation_id).await? else {
            return Err(EngineError::NotFound(reservation_id));
        };
        if !actor.may_act_for(current.user_id) {
            return Err(EngineError::NotPermitted {
                action: "cancel another member's reservation",
            });
        }

        let change = StatusChange::Cancel {
            actor: actor.user_id,
            at: self.env.clock.now(),
            cash_window: self.cash_window,
        };
        match self.env.reservations.apply(reservation_id, change).await? {
            ApplyOutcome::Applied(cancelled) => {
                tracing::info!(
                    payment_status = %cancelled.payment_status,
                    "Reservation cancelled"
                );
                Ok(cancelled)
            }
            other => Err(refusal(reservation_id, "cancel", other)),
        }
    }

    /// Apply a payment gateway callback.
    ///
    /// Success promotes `pending → completed` only if the seat is still free
    /// and the owner holds no other membership for these dates at that
    /// moment; otherwise the booking fails with a conflict. Repeated callbacks carrying the same
    /// reference return the current record.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] for an unknown reservation
    /// - [`ConflictError::SeatTaken`] if the seat was lost before payment landed
    /// - [`ConflictError::ActiveMembershipExists`] if the owner paid for other
    ///   overlapping dates first; this booking is marked failed
    /// - [`EngineError::InvalidTransition`] if the booking is not `pending`
    #[tracing::instrument(skip_all, fields(%reservation_id))]
    pub async fn record_payment(
        &self,
        reservation_id: ReservationId,
        outcome: PaymentOutcome,
    ) -> Result<Reservation> {
        let at = self.env.clock.now();
        match outcome {
            PaymentOutcome::Succeeded { reference } => {
                let change = StatusChange::CompletePayment {
                    reference: reference.clone(),
                    at,
                    cash_window: self.cash_window,
                };
                match self.env.reservations.apply(reservation_id, change).await? {
                    ApplyOutcome::Applied(paid) => {
                        tracing::info!(user_id = %paid.user_id, %reference, "Payment completed");
                        self.env
                            .notify(paid.user_id, Notification::PaymentConfirmed { reservation_id })
                            .await;
                        self.issue_after_payment(&paid).await;
                        Ok(paid)
                    }
                    ApplyOutcome::Rejected(current)
                        if current.payment_status == PaymentStatus::Completed
                            && current.external_reference.as_deref() == Some(reference.as_str()) =>
                    {
                        tracing::debug!(%reference, "Duplicate payment callback");
                        Ok(current)
                    }
                    other => Err(refusal(reservation_id, "complete_payment", other)),
                }
            }
            PaymentOutcome::Failed { reference } => {
                let change = StatusChange::FailPayment {
                    reference: reference.clone(),
                    at,
                };
                match self.env.reservations.apply(reservation_id, change).await? {
                    ApplyOutcome::Applied(failed) => {
                        tracing::info!(%reference, "Payment failed");
                        Ok(failed)
                    }
                    ApplyOutcome::Rejected(current)
                        if current.payment_status == PaymentStatus::Failed
                            && current.external_reference.as_deref() == Some(reference.as_str()) =>
                    {
                        Ok(current)
                    }
                    other => Err(refusal(reservation_id, "fail_payment", other)),
                }
            }
        }
    }

    async fn issue_after_payment(&self, paid: &Reservation) -> Option<String> {
        match self.issuer.issue_identifier(paid.user_id).await {
            Ok(identity) => Some(identity.identifier),
            Err(error) => {
                tracing::warn!(
                    user_id = %paid.user_id,
                    reservation_id = %paid.id,
                    %error,
                    "Identifier issuance deferred to the sweeper"
                );
                None
            }
        }
    }
}

/// Error for an apply that did not go through.
fn refusal(
    reservation_id: ReservationId,
    attempted: &'static str,
    outcome: ApplyOutcome,
) -> EngineError {
    match outcome {
        ApplyOutcome::Missing => EngineError::NotFound(reservation_id),
        ApplyOutcome::SeatTaken { current, holder } => match current.seat {
            Some(seat) => {
                tracing::warn!(
                    %seat,
                    holder = %holder.id,
                    "Payment landed on a seat taken in the meantime; booking failed"
                );
                ConflictError::SeatTaken {
                    seat,
                    occupied_by: holder.holder_name,
                    conflicting_range: holder.range,
                }
                .into()
            }
            None => invalid(attempted, &current),
        },
        ApplyOutcome::MembershipHeld { current, existing } => {
            tracing::warn!(
                user_id = %current.user_id,
                existing = %existing.id,
                payment_status = %current.payment_status,
                "Owner already holds these dates; booking not paid"
            );
            ConflictError::ActiveMembershipExists {
                reservation_id: existing.id,
            }
            .into()
        }
        ApplyOutcome::Rejected(current) | ApplyOutcome::Applied(current) => {
            invalid(attempted, &current)
        }
    }
}

fn invalid(attempted: &'static str, current: &Reservation) -> EngineError {
    tracing::debug!(
        reservation_id = %current.id,
        attempted,
        payment_status = %current.payment_status,
        lifecycle = %current.lifecycle,
        "Transition refused"
    );
    EngineError::InvalidTransition {
        reservation_id: current.id,
        attempted,
        payment_status: current.payment_status,
        lifecycle: current.lifecycle,
    }
}
