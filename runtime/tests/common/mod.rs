//! Shared harness for engine integration tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use studyhall_core::environment::Clock;
use studyhall_core::types::{
    Actor, DurationCode, Money, PaymentMethod, ResourceType, SeatClass, SeatLabel, TimeSlot,
    UserId,
};
use studyhall_runtime::retry::RetryPolicy;
use studyhall_runtime::{AllocatorConfig, BookingRequest, EngineEnvironment, MembershipEngine};
use studyhall_testing::fixtures::{seat_label, standard, t0};
use studyhall_testing::{InMemoryStore, ManualClock, RecordingNotifier, init_test_tracing};

/// Engine over an in-memory store with a hand-driven clock.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: ManualClock,
    pub notifier: RecordingNotifier,
    pub engine: MembershipEngine,
    pub admin: Actor,
}

impl Harness {
    /// Clock at 2025-01-01 09:00 UTC, seats A1..A3 (Regular) and B3 (Regular), P1 (Premium).
    pub async fn new() -> Self {
        Self::with_notifier(RecordingNotifier::new()).await
    }

    pub async fn with_notifier(notifier: RecordingNotifier) -> Self {
        init_test_tracing();
        let store = Arc::new(InMemoryStore::new());
        let clock = ManualClock::new(t0());
        let env = EngineEnvironment::with_store(
            Arc::new(clock.clone()) as Arc<dyn Clock>,
            Arc::clone(&store),
            Arc::new(notifier.clone()),
        );
        let engine = MembershipEngine::new(env, AllocatorConfig::default(), fast_retry());
        let harness = Self {
            store,
            clock,
            notifier,
            engine,
            admin: Actor::admin(UserId::new()),
        };
        harness
            .seats(&[
                ("A1", SeatClass::Regular),
                ("A2", SeatClass::Regular),
                ("B3", SeatClass::Regular),
                ("P1", SeatClass::Premium),
            ])
            .await;
        harness
    }

    /// Register seats for "Standard".
    pub async fn seats(&self, seats: &[(&str, SeatClass)]) {
        self.engine
            .initialize_seats(
                self.admin,
                standard(),
                seats
                    .iter()
                    .map(|(label, class)| (seat_label(label), *class))
                    .collect(),
            )
            .await
            .unwrap();
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

/// Retry quickly so exhaustion tests stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(4)
        .initial_delay(std::time::Duration::from_millis(1))
        .max_delay(std::time::Duration::from_millis(5))
        .jitter(0.0)
        .build()
}

/// Booking for "Standard" / `Day`, with the duration code spelled out.
pub fn booking(
    user_id: UserId,
    holder: &str,
    start: NaiveDate,
    end: NaiveDate,
    duration: &str,
    seat: Option<&str>,
    method: PaymentMethod,
) -> BookingRequest {
    BookingRequest {
        user_id,
        holder_name: holder.to_string(),
        resource_type: standard(),
        time_slot: TimeSlot::Day,
        duration: DurationCode::parse(duration).unwrap(),
        start,
        end,
        preferred_seat: seat.map(seat_label),
        payment_method: method,
        amount: Money::from_minor(150_000),
    }
}

/// Booking whose duration is exactly the range length in days.
pub fn booking_for_days(
    user_id: UserId,
    start: NaiveDate,
    end: NaiveDate,
    seat: &str,
    method: PaymentMethod,
) -> BookingRequest {
    let days = (end - start).num_days() + 1;
    booking(
        user_id,
        "Member",
        start,
        end,
        &format!("{days}d"),
        Some(seat),
        method,
    )
}

pub fn seat(label: &str) -> SeatLabel {
    seat_label(label)
}

pub fn standard_type() -> ResourceType {
    standard()
}
