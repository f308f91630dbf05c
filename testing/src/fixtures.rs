//! Test data builders.
//!
//! These helpers panic on malformed literals, which is what a test wants.
#![allow(clippy::expect_used, clippy::missing_panics_doc)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use studyhall_core::types::{
    DateRange, LifecycleStatus, Money, PaymentMethod, PaymentStatus, Reservation, ReservationId,
    ResourceType, Seat, SeatClass, SeatLabel, TimeSlot, UserId,
};

/// Calendar date from literals
#[must_use]
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid fixture date")
}

/// UTC instant from literals
#[must_use]
pub fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .expect("valid fixture instant")
}

/// 2025-01-01 09:00 UTC, the default creation time of built reservations
#[must_use]
pub fn t0() -> DateTime<Utc> {
    at(2025, 1, 1, 9)
}

/// Inclusive range from two dates
#[must_use]
pub fn range(start: NaiveDate, end: NaiveDate) -> DateRange {
    DateRange::new(start, end).expect("fixture range must not be inverted")
}

/// The "Standard" resource type
#[must_use]
pub fn standard() -> ResourceType {
    ResourceType::new("Standard").expect("non-empty")
}

/// Seat label from a literal
#[must_use]
pub fn seat_label(label: &str) -> SeatLabel {
    SeatLabel::new(label).expect("non-empty seat label")
}

/// Seats of `resource_type` from `(label, class)` pairs
#[must_use]
pub fn inventory(resource_type: &ResourceType, seats: &[(&str, SeatClass)]) -> Vec<Seat> {
    seats
        .iter()
        .map(|(label, class)| Seat {
            resource_type: resource_type.clone(),
            label: seat_label(label),
            class: *class,
        })
        .collect()
}

/// Builder for reservations in arbitrary states, for seeding stores.
///
/// Defaults: "Standard", `Day` slot, no seat, card payment `pending`,
/// `not_yet_active`, created at [`t0`].
#[derive(Debug, Clone)]
pub struct ReservationBuilder {
    reservation: Reservation,
}

impl ReservationBuilder {
    /// Start a reservation for `user_id` over `range`
    #[must_use]
    pub fn new(user_id: UserId, range: DateRange) -> Self {
        Self {
            reservation: Reservation {
                id: ReservationId::new(),
                user_id,
                holder_name: "Member".to_string(),
                resource_type: standard(),
                time_slot: TimeSlot::Day,
                range,
                seat: None,
                amount: Money::from_minor(150_000),
                payment_method: PaymentMethod::Card,
                payment_status: PaymentStatus::Pending,
                lifecycle: LifecycleStatus::NotYetActive,
                external_reference: None,
                note: None,
                confirmed_by: None,
                confirmed_at: None,
                cancelled_by: None,
                created_at: t0(),
                updated_at: t0(),
            },
        }
    }

    /// Holder display name
    #[must_use]
    pub fn holder(mut self, name: &str) -> Self {
        self.reservation.holder_name = name.to_string();
        self
    }

    /// Resource type
    #[must_use]
    pub fn resource_type(mut self, resource_type: ResourceType) -> Self {
        self.reservation.resource_type = resource_type;
        self
    }

    /// Time slot
    #[must_use]
    pub fn slot(mut self, slot: TimeSlot) -> Self {
        self.reservation.time_slot = slot;
        self
    }

    /// Assigned seat
    #[must_use]
    pub fn seat(mut self, seat: SeatLabel) -> Self {
        self.reservation.seat = Some(seat);
        self
    }

    /// Payment method, resetting the payment status to the method's initial one
    #[must_use]
    pub fn method(mut self, method: PaymentMethod) -> Self {
        self.reservation.payment_method = method;
        self.reservation.payment_status = method.initial_status();
        self
    }

    /// Payment status
    #[must_use]
    pub fn status(mut self, status: PaymentStatus) -> Self {
        self.reservation.payment_status = status;
        self
    }

    /// Stored lifecycle status
    #[must_use]
    pub fn lifecycle(mut self, lifecycle: LifecycleStatus) -> Self {
        self.reservation.lifecycle = lifecycle;
        self
    }

    /// Creation time (anchors the cash window)
    #[must_use]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.reservation.created_at = created_at;
        self.reservation.updated_at = created_at;
        self
    }

    /// Finish
    #[must_use]
    pub fn build(self) -> Reservation {
        self.reservation
    }
}
