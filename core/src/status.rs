//! Guarded status changes.
//!
//! Every invariant-bearing transition of a [`Reservation`] is expressed as a
//! [`StatusChange`]. A storage backend evaluates [`StatusChange::permits`] and
//! writes [`StatusChange::apply_to`] inside one atomic unit, so the in-process
//! snapshot is never mutated and flushed later. A change whose guard fails
//! performs no write, which is what makes repeated sweeps idempotent.
//!
//! ```text
//! pending ──CompletePayment──▶ completed ──Activate──▶ active ──Expire──▶ expired
//!    │  └──FailPayment──▶ failed
//!    └──Cancel──▶ cancelled
//! cash_pending ──CollectCash (≤ 48h)──▶ cash_collected ──Activate──▶ …
//!    ├──ExpireCashHold (> 48h)──▶ expired
//!    └──Cancel (≤ 48h)──▶ cancelled
//! ```

use crate::types::{LifecycleStatus, PaymentStatus, Reservation, UserId};
use chrono::{DateTime, Duration, NaiveDate, Utc};

/// A guarded transition of one reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusChange {
    /// Gateway reported success: `pending → completed`.
    ///
    /// Stores must also re-check that no occupying reservation overlaps the
    /// seat and that the owner holds no other membership for these dates; if
    /// either is claimed, the record moves to `failed` instead.
    CompletePayment {
        /// Gateway payment reference
        reference: String,
        /// When the callback arrived
        at: DateTime<Utc>,
        /// Cash collection window (to judge which holds still occupy)
        cash_window: Duration,
    },

    /// Gateway reported failure: `pending → failed`.
    FailPayment {
        /// Gateway payment reference
        reference: String,
        /// When the callback arrived
        at: DateTime<Utc>,
    },

    /// Admin confirmed cash: `cash_pending → cash_collected`, inside the window.
    ///
    /// Refused without a write if the owner holds another membership for
    /// overlapping dates.
    CollectCash {
        /// Confirming admin
        admin: UserId,
        /// Optional admin note
        note: Option<String>,
        /// Confirmation time
        at: DateTime<Utc>,
        /// Collection window
        cash_window: Duration,
    },

    /// Window lapsed: `cash_pending → expired`.
    ExpireCashHold {
        /// Sweep time
        at: DateTime<Utc>,
        /// Collection window
        cash_window: Duration,
    },

    /// Owner or admin withdrew a pre-payment booking.
    Cancel {
        /// Who cancelled
        actor: UserId,
        /// Cancellation time
        at: DateTime<Utc>,
        /// Collection window (cash holds may only be cancelled inside it)
        cash_window: Duration,
    },

    /// `not_yet_active → active` once today is inside the paid range.
    Activate {
        /// Current day
        today: NaiveDate,
        /// Sweep time
        at: DateTime<Utc>,
    },

    /// `not_yet_active | active → expired` once today is past the paid range.
    Expire {
        /// Current day
        today: NaiveDate,
        /// Sweep time
        at: DateTime<Utc>,
    },
}

impl StatusChange {
    /// Short verb for logs, metrics and errors
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CompletePayment { .. } => "complete_payment",
            Self::FailPayment { .. } => "fail_payment",
            Self::CollectCash { .. } => "collect_cash",
            Self::ExpireCashHold { .. } => "expire_cash_hold",
            Self::Cancel { .. } => "cancel",
            Self::Activate { .. } => "activate",
            Self::Expire { .. } => "expire",
        }
    }

    /// Time the change is applied at
    #[must_use]
    pub const fn at(&self) -> DateTime<Utc> {
        match self {
            Self::CompletePayment { at, .. }
            | Self::FailPayment { at, .. }
            | Self::CollectCash { at, .. }
            | Self::ExpireCashHold { at, .. }
            | Self::Cancel { at, .. }
            | Self::Activate { at, .. }
            | Self::Expire { at, .. } => *at,
        }
    }

    /// Whether the change is legal from the record's current state.
    #[must_use]
    pub fn permits(&self, current: &Reservation) -> bool {
        if current.lifecycle == LifecycleStatus::Cancelled {
            return false;
        }
        match self {
            Self::CompletePayment { .. } | Self::FailPayment { .. } => {
                current.payment_status == PaymentStatus::Pending
            }
            Self::CollectCash { at, cash_window, .. } => {
                current.cash_window_open(*at, *cash_window)
            }
            Self::ExpireCashHold { at, cash_window } => {
                current.payment_status == PaymentStatus::CashPending
                    && !current.cash_window_open(*at, *cash_window)
            }
            Self::Cancel { at, cash_window, .. } => match current.payment_status {
                PaymentStatus::Pending => true,
                PaymentStatus::CashPending => current.cash_window_open(*at, *cash_window),
                _ => false,
            },
            Self::Activate { today, .. } => {
                current.payment_status.is_paid()
                    && current.lifecycle == LifecycleStatus::NotYetActive
                    && current.range.contains(*today)
            }
            Self::Expire { today, .. } => {
                current.payment_status.is_paid()
                    && matches!(
                        current.lifecycle,
                        LifecycleStatus::NotYetActive | LifecycleStatus::Active
                    )
                    && *today > current.range.end()
            }
        }
    }

    /// The record after the change. Callers must check [`Self::permits`] first.
    #[must_use]
    pub fn apply_to(&self, current: &Reservation) -> Reservation {
        let mut next = current.clone();
        next.updated_at = self.at();
        match self {
            Self::CompletePayment { reference, .. } => {
                next.payment_status = PaymentStatus::Completed;
                next.external_reference = Some(reference.clone());
            }
            Self::FailPayment { reference, .. } => {
                next.payment_status = PaymentStatus::Failed;
                next.lifecycle = LifecycleStatus::Expired;
                next.external_reference = Some(reference.clone());
            }
            Self::CollectCash {
                admin, note, at, ..
            } => {
                next.payment_status = PaymentStatus::CashCollected;
                next.confirmed_by = Some(*admin);
                next.confirmed_at = Some(*at);
                if note.is_some() {
                    next.note.clone_from(note);
                }
            }
            Self::ExpireCashHold { .. } => {
                next.payment_status = PaymentStatus::Expired;
                next.lifecycle = LifecycleStatus::Expired;
            }
            Self::Cancel { actor, .. } => {
                next.lifecycle = LifecycleStatus::Cancelled;
                next.cancelled_by = Some(*actor);
            }
            Self::Activate { .. } => {
                next.lifecycle = LifecycleStatus::Active;
            }
            Self::Expire { .. } => {
                next.lifecycle = LifecycleStatus::Expired;
            }
        }
        next
    }

    /// Instant and cash window at which the store must re-validate seat
    /// occupancy before writing, for changes that make a record occupying.
    #[must_use]
    pub const fn seat_recheck(&self) -> Option<(DateTime<Utc>, Duration)> {
        match self {
            Self::CompletePayment {
                at, cash_window, ..
            } => Some((*at, *cash_window)),
            _ => None,
        }
    }

    /// Instant and cash window at which the store must check that none of
    /// the owner's other reservations holds a membership for overlapping
    /// dates, for changes that make a record paid.
    #[must_use]
    pub const fn membership_recheck(&self) -> Option<(DateTime<Utc>, Duration)> {
        match self {
            Self::CompletePayment {
                at, cash_window, ..
            }
            | Self::CollectCash {
                at, cash_window, ..
            } => Some((*at, *cash_window)),
            _ => None,
        }
    }

    /// The change a store writes when a payment lands after its seat or its
    /// owner's dates were claimed in the meantime. `None` means the record
    /// is left untouched.
    #[must_use]
    pub fn lost_claim(&self) -> Option<Self> {
        match self {
            Self::CompletePayment { reference, at, .. } => Some(Self::FailPayment {
                reference: reference.clone(),
                at: *at,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::types::{
        DateRange, Money, PaymentMethod, ReservationId, ResourceType, SeatLabel, TimeSlot,
    };
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    fn cash_hold() -> Reservation {
        let start = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 2, 9).unwrap();
        Reservation {
            id: ReservationId::new(),
            user_id: UserId::new(),
            holder_name: "Asha".into(),
            resource_type: ResourceType::new("Standard").unwrap(),
            time_slot: TimeSlot::Day,
            range: DateRange::new(start, end).unwrap(),
            seat: Some(SeatLabel::new("B3").unwrap()),
            amount: Money::from_minor(150_000),
            payment_method: PaymentMethod::Cash,
            payment_status: PaymentStatus::CashPending,
            lifecycle: LifecycleStatus::NotYetActive,
            external_reference: None,
            note: None,
            confirmed_by: None,
            confirmed_at: None,
            cancelled_by: None,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    #[test]
    fn cash_can_be_collected_only_inside_the_window() {
        let hold = cash_hold();
        let window = Duration::hours(48);
        let admin = UserId::new();
        let at_47h = StatusChange::CollectCash {
            admin,
            note: Some("paid at desk".into()),
            at: t0() + Duration::hours(47),
            cash_window: window,
        };
        let at_49h = StatusChange::CollectCash {
            admin,
            note: None,
            at: t0() + Duration::hours(49),
            cash_window: window,
        };
        assert!(at_47h.permits(&hold));
        assert!(!at_49h.permits(&hold));

        let collected = at_47h.apply_to(&hold);
        assert_eq!(collected.payment_status, PaymentStatus::CashCollected);
        assert_eq!(collected.confirmed_by, Some(admin));
        assert_eq!(collected.note.as_deref(), Some("paid at desk"));
        assert!(!at_47h.permits(&collected));
    }

    #[test]
    fn cash_hold_expiry_is_the_complement_of_collection() {
        let hold = cash_hold();
        let window = Duration::hours(48);
        let early = StatusChange::ExpireCashHold {
            at: t0() + Duration::hours(48),
            cash_window: window,
        };
        let late = StatusChange::ExpireCashHold {
            at: t0() + Duration::hours(48) + Duration::seconds(1),
            cash_window: window,
        };
        assert!(!early.permits(&hold));
        assert!(late.permits(&hold));
        let expired = late.apply_to(&hold);
        assert_eq!(expired.payment_status, PaymentStatus::Expired);
        assert!(!expired.is_occupying(late.at(), window));
        assert!(!late.permits(&expired));
    }

    #[test]
    fn cancelled_records_accept_nothing() {
        let window = Duration::hours(48);
        let cancel = StatusChange::Cancel {
            actor: UserId::new(),
            at: t0() + Duration::hours(1),
            cash_window: window,
        };
        let cancelled = cancel.apply_to(&cash_hold());
        assert!(!cancelled.is_occupying(t0() + Duration::hours(2), window));
        assert!(!cancel.permits(&cancelled));
        assert!(
            !StatusChange::CollectCash {
                admin: UserId::new(),
                note: None,
                at: t0() + Duration::hours(2),
                cash_window: window,
            }
            .permits(&cancelled)
        );
    }

    #[test]
    fn activation_and_expiry_follow_the_calendar() {
        let mut paid = cash_hold();
        paid.payment_status = PaymentStatus::CashCollected;
        let day = |d| NaiveDate::from_ymd_opt(2025, 1, d).unwrap();
        let activate = |today| StatusChange::Activate { today, at: t0() };

        assert!(!activate(day(9)).permits(&paid));
        assert!(activate(day(10)).permits(&paid));
        let active = activate(day(10)).apply_to(&paid);
        assert_eq!(active.lifecycle, LifecycleStatus::Active);
        assert!(!activate(day(11)).permits(&active));

        let feb = |d| NaiveDate::from_ymd_opt(2025, 2, d).unwrap();
        let expire = |today| StatusChange::Expire { today, at: t0() };
        assert!(!expire(feb(9)).permits(&active));
        assert!(expire(feb(10)).permits(&active));
        assert_eq!(
            expire(feb(10)).apply_to(&active).lifecycle,
            LifecycleStatus::Expired
        );
    }

    #[test]
    fn paying_changes_recheck_the_owners_other_memberships() {
        let window = Duration::hours(48);
        let at = t0() + Duration::hours(1);
        let pay = StatusChange::CompletePayment {
            reference: "pay_1".into(),
            at,
            cash_window: window,
        };
        let collect = StatusChange::CollectCash {
            admin: UserId::new(),
            note: None,
            at,
            cash_window: window,
        };
        assert_eq!(pay.membership_recheck(), Some((at, window)));
        assert_eq!(collect.membership_recheck(), Some((at, window)));
        assert!(matches!(pay.lost_claim(), Some(StatusChange::FailPayment { .. })));
        assert_eq!(collect.lost_claim(), None);
        assert_eq!(
            StatusChange::Activate { today: at.date_naive(), at }.membership_recheck(),
            None
        );

        let first = cash_hold();
        let mut second = cash_hold();
        second.user_id = first.user_id;
        second.seat = Some(SeatLabel::new("A1").unwrap());
        assert!(second.membership_clash(&first, at, window));
        assert!(!second.membership_clash(&first, t0() + Duration::hours(49), window));

        let stranger = cash_hold();
        assert!(!second.membership_clash(&stranger, at, window));
    }

    #[test]
    fn unpaid_records_never_activate() {
        let hold = cash_hold();
        let today = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert!(!StatusChange::Activate { today, at: t0() }.permits(&hold));
    }
}
