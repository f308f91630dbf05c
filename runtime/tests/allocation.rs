//! Seat allocation against the in-memory store.
#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::{Harness, booking, booking_for_days, seat};
use proptest::prelude::*;
use studyhall_core::error::{ConflictError, EngineError, ValidationError};
use studyhall_core::types::{
    DateRange, LifecycleStatus, PaymentMethod, PaymentStatus, Reservation, SeatClass, TimeSlot,
    UserId,
};
use studyhall_runtime::{PaymentOutcome, SweeperConfig};
use studyhall_testing::fixtures::{ReservationBuilder, at, date, range, standard};
use studyhall_testing::properties::date_range;

#[tokio::test]
async fn overlapping_cash_hold_blocks_the_seat() {
    let h = Harness::new().await;
    let held = h
        .engine
        .allocate(booking(
            UserId::new(),
            "Ravi",
            date(2025, 1, 10),
            date(2025, 2, 9),
            "1m",
            Some("B3"),
            PaymentMethod::Cash,
        ))
        .await
        .unwrap();
    assert_eq!(held.payment_status, PaymentStatus::CashPending);
    assert_eq!(held.seat, Some(seat("B3")));

    let err = h
        .engine
        .allocate(booking(
            UserId::new(),
            "Meera",
            date(2025, 2, 1),
            date(2025, 2, 15),
            "15d",
            Some("B3"),
            PaymentMethod::Card,
        ))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        EngineError::Conflict(ConflictError::SeatTaken {
            seat: seat("B3"),
            occupied_by: "Ravi".to_string(),
            conflicting_range: range(date(2025, 1, 10), date(2025, 2, 9)),
        })
    );
    assert!(err.is_user_error());
}

#[tokio::test]
async fn adjacent_range_on_the_same_seat_is_free() {
    let h = Harness::new().await;
    h.engine
        .allocate(booking(
            UserId::new(),
            "Ravi",
            date(2025, 1, 10),
            date(2025, 2, 9),
            "1m",
            Some("B3"),
            PaymentMethod::Cash,
        ))
        .await
        .unwrap();

    let next = h
        .engine
        .allocate(booking(
            UserId::new(),
            "Meera",
            date(2025, 2, 10),
            date(2025, 3, 9),
            "1m",
            Some("B3"),
            PaymentMethod::Cash,
        ))
        .await
        .unwrap();

    assert_eq!(next.range, range(date(2025, 2, 10), date(2025, 3, 9)));
    assert_eq!(next.seat, Some(seat("B3")));
}

#[tokio::test]
async fn other_time_slots_do_not_conflict() {
    let h = Harness::new().await;
    h.engine
        .allocate(booking_for_days(
            UserId::new(),
            date(2025, 1, 10),
            date(2025, 1, 19),
            "B3",
            PaymentMethod::Cash,
        ))
        .await
        .unwrap();

    let mut evening = booking_for_days(
        UserId::new(),
        date(2025, 1, 10),
        date(2025, 1, 19),
        "B3",
        PaymentMethod::Cash,
    );
    evening.time_slot = TimeSlot::Evening;
    assert!(h.engine.allocate(evening).await.is_ok());
}

#[tokio::test]
async fn regular_seats_are_handed_out_before_premium_then_capacity_runs_out() {
    let h = Harness::new().await;
    let mut assigned = Vec::new();
    for _ in 0..4 {
        let reservation = h
            .engine
            .allocate(booking(
                UserId::new(),
                "Member",
                date(2025, 1, 10),
                date(2025, 1, 16),
                "1w",
                None,
                PaymentMethod::Cash,
            ))
            .await
            .unwrap();
        assigned.push(reservation.seat.unwrap());
    }
    assert_eq!(assigned, vec![seat("A1"), seat("A2"), seat("B3"), seat("P1")]);

    let err = h
        .engine
        .allocate(booking(
            UserId::new(),
            "Late",
            date(2025, 1, 12),
            date(2025, 1, 12),
            "1d",
            None,
            PaymentMethod::Cash,
        ))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict(ConflictError::NoCapacity { ref resource_type, .. })
            if *resource_type == standard()
    ));
}

#[tokio::test]
async fn pending_card_bookings_do_not_hold_the_seat() {
    let h = Harness::new().await;
    h.engine
        .allocate(booking_for_days(
            UserId::new(),
            date(2025, 1, 10),
            date(2025, 1, 19),
            "B3",
            PaymentMethod::Card,
        ))
        .await
        .unwrap();

    let cash = h
        .engine
        .allocate(booking_for_days(
            UserId::new(),
            date(2025, 1, 10),
            date(2025, 1, 19),
            "B3",
            PaymentMethod::Cash,
        ))
        .await;
    assert!(cash.is_ok());
}

#[tokio::test]
async fn user_with_an_active_membership_cannot_book_again() {
    let h = Harness::new().await;
    let user = UserId::new();
    let active = ReservationBuilder::new(user, range(date(2024, 12, 20), date(2025, 1, 19)))
        .seat(seat("A1"))
        .status(PaymentStatus::Completed)
        .lifecycle(LifecycleStatus::Active)
        .build();
    h.store.seed(active.clone());

    let err = h
        .engine
        .allocate(booking_for_days(
            user,
            date(2025, 2, 1),
            date(2025, 2, 10),
            "A2",
            PaymentMethod::Cash,
        ))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        EngineError::Conflict(ConflictError::ActiveMembershipExists {
            reservation_id: active.id
        })
    );
}

/// Book `seat` from January `first` to January `last` 2025.
async fn book_january(
    h: &Harness,
    user: UserId,
    first: u32,
    last: u32,
    seat: &str,
    method: PaymentMethod,
) -> Result<Reservation, EngineError> {
    h.engine
        .allocate(booking_for_days(
            user,
            date(2025, 1, first),
            date(2025, 1, last),
            seat,
            method,
        ))
        .await
}

#[tokio::test]
async fn one_member_cannot_hold_overlapping_dates_on_two_seats() {
    let h = Harness::new().await;
    let user = UserId::new();
    let first = book_january(&h, user, 10, 19, "A1", PaymentMethod::Cash).await.unwrap();

    let conflict = EngineError::Conflict(ConflictError::ActiveMembershipExists {
        reservation_id: first.id,
    });
    let err = book_january(&h, user, 10, 19, "A2", PaymentMethod::Cash).await.unwrap_err();
    assert_eq!(err, conflict);
    let err = h
        .engine
        .allocate(booking(
            user,
            "Member",
            date(2025, 1, 15),
            date(2025, 1, 21),
            "1w",
            None,
            PaymentMethod::Card,
        ))
        .await
        .unwrap_err();
    assert_eq!(err, conflict);

    let later = book_january(&h, user, 20, 29, "A2", PaymentMethod::Cash).await;
    assert!(later.is_ok());

    h.engine.cancel(first.id, h.admin).await.unwrap();
    let replacement = book_january(&h, user, 10, 19, "B3", PaymentMethod::Cash).await;
    assert!(replacement.is_ok());
}

#[tokio::test]
async fn paying_for_two_overlapping_bookings_keeps_one_membership() {
    let h = Harness::new().await;
    let user = UserId::new();
    let first = book_january(&h, user, 10, 19, "A1", PaymentMethod::Card).await.unwrap();
    let second = book_january(&h, user, 10, 19, "A2", PaymentMethod::Card).await.unwrap();

    h.engine
        .record_payment(
            first.id,
            PaymentOutcome::Succeeded {
                reference: "pay_1".to_string(),
            },
        )
        .await
        .unwrap();
    let err = h
        .engine
        .record_payment(
            second.id,
            PaymentOutcome::Succeeded {
                reference: "pay_2".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Conflict(ConflictError::ActiveMembershipExists {
            reservation_id: first.id
        })
    );
    assert_eq!(
        h.store.reservation(second.id).unwrap().payment_status,
        PaymentStatus::Failed
    );

    h.clock.set(at(2025, 1, 11, 9));
    let report = h.engine.sweeper(SweeperConfig::default()).run_pass().await;
    assert_eq!(report.activated, 1);
    let active = h
        .store
        .all_reservations()
        .into_iter()
        .filter(|r| r.user_id == user && r.lifecycle == LifecycleStatus::Active)
        .count();
    assert_eq!(active, 1);
}

#[tokio::test]
async fn expired_history_does_not_block_a_new_booking() {
    let h = Harness::new().await;
    let user = UserId::new();
    h.store.seed(
        ReservationBuilder::new(user, range(date(2024, 11, 1), date(2024, 11, 30)))
            .seat(seat("A1"))
            .status(PaymentStatus::Completed)
            .lifecycle(LifecycleStatus::Active)
            .build(),
    );

    let booked = h
        .engine
        .allocate(booking_for_days(
            user,
            date(2025, 1, 2),
            date(2025, 1, 8),
            "A1",
            PaymentMethod::Cash,
        ))
        .await;
    assert!(booked.is_ok());
}

#[tokio::test]
async fn malformed_requests_are_rejected_before_storage() {
    let h = Harness::new().await;

    let err = h
        .engine
        .allocate(booking(
            UserId::new(),
            "Member",
            date(2025, 1, 10),
            date(2025, 1, 12),
            "1d",
            Some("Z9"),
            PaymentMethod::Cash,
        ))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::DurationMismatch { .. })
    ));

    let err = h
        .engine
        .allocate(booking(
            UserId::new(),
            "Member",
            date(2025, 1, 10),
            date(2025, 1, 10),
            "1d",
            Some("Z9"),
            PaymentMethod::Cash,
        ))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::UnknownSeat { .. })
    ));

    let err = h
        .engine
        .allocate(booking(
            UserId::new(),
            "Member",
            date(2024, 12, 31),
            date(2024, 12, 31),
            "1d",
            None,
            PaymentMethod::Cash,
        ))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::StartInPast { .. })
    ));
    assert!(h.store.all_reservations().is_empty());
}

#[tokio::test]
async fn storage_outage_fails_closed() {
    let h = Harness::new().await;
    h.store.set_unavailable(true);

    let err = h
        .engine
        .allocate(booking_for_days(
            UserId::new(),
            date(2025, 1, 10),
            date(2025, 1, 19),
            "B3",
            PaymentMethod::Cash,
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::StorageUnavailable(_)));
    assert!(err.is_retryable());
    h.store.set_unavailable(false);
    assert!(h.store.all_reservations().is_empty());
}

#[tokio::test]
async fn occupancy_lists_only_holding_reservations() {
    let h = Harness::new().await;
    let cash = h
        .engine
        .allocate(booking(
            UserId::new(),
            "Ravi",
            date(2025, 1, 10),
            date(2025, 2, 9),
            "1m",
            Some("B3"),
            PaymentMethod::Cash,
        ))
        .await
        .unwrap();
    h.engine
        .allocate(booking(
            UserId::new(),
            "Card",
            date(2025, 1, 10),
            date(2025, 2, 9),
            "1m",
            Some("A1"),
            PaymentMethod::Card,
        ))
        .await
        .unwrap();

    let occupied = h
        .engine
        .get_occupancy(
            standard(),
            TimeSlot::Day,
            range(date(2025, 1, 1), date(2025, 1, 31)),
        )
        .await
        .unwrap();

    assert_eq!(occupied.len(), 1);
    assert_eq!(occupied[0].seat, seat("B3"));
    assert_eq!(occupied[0].holder_name, "Ravi");
    assert_eq!(occupied[0].reservation_id, cash.id);
}

#[tokio::test]
async fn only_admins_initialize_seats() {
    let h = Harness::new().await;
    let err = h
        .engine
        .initialize_seats(
            studyhall_core::types::Actor::member(UserId::new()),
            standard(),
            vec![(seat("C1"), SeatClass::Regular)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotPermitted { .. }));

    let added = h
        .engine
        .initialize_seats(
            h.admin,
            standard(),
            vec![(seat("A1"), SeatClass::Premium), (seat("C1"), SeatClass::Regular)],
        )
        .await
        .unwrap();
    assert_eq!(added, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_for_one_seat_have_one_winner() {
    let h = Harness::new().await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .allocate(booking_for_days(
                        UserId::new(),
                        date(2025, 1, 10),
                        date(2025, 1, 19),
                        "B3",
                        PaymentMethod::Cash,
                    ))
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(EngineError::Conflict(ConflictError::SeatTaken { .. })) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(h.store.all_reservations().len(), 1);
}

fn overlapping_pairs(ranges: &[DateRange]) -> usize {
    let mut pairs = 0;
    for (i, a) in ranges.iter().enumerate() {
        pairs += ranges[i + 1..].iter().filter(|b| a.overlaps(b)).count();
    }
    pairs
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Whatever the arrival order, accepted holds on one seat never overlap,
    /// and a request is refused only when it overlaps an accepted one.
    #[test]
    fn accepted_holds_never_overlap(
        requests in prop::collection::vec(date_range(date(2025, 1, 2), 90, 40), 1..12)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let h = Harness::new().await;
            let mut accepted: Vec<DateRange> = Vec::new();

            for requested in requests {
                let result = h
                    .engine
                    .allocate(booking_for_days(
                        UserId::new(),
                        requested.start(),
                        requested.end(),
                        "B3",
                        PaymentMethod::Cash,
                    ))
                    .await;
                let clashes = accepted.iter().any(|held| held.overlaps(&requested));
                match result {
                    Ok(reservation) => {
                        prop_assert!(!clashes);
                        accepted.push(reservation.range);
                    }
                    Err(EngineError::Conflict(ConflictError::SeatTaken {
                        conflicting_range,
                        ..
                    })) => {
                        prop_assert!(clashes);
                        prop_assert!(conflicting_range.overlaps(&requested));
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {}", other),
                }
            }

            prop_assert_eq!(overlapping_pairs(&accepted), 0);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
