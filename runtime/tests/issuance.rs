//! Membership identifier issuance.
#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::Harness;
use futures::future::join_all;
use proptest::prelude::*;
use std::collections::HashSet;
use studyhall_core::error::EngineError;
use studyhall_core::membership::PeriodKey;
use studyhall_core::notify::Notification;
use studyhall_core::store::MembershipStore;
use studyhall_core::types::UserId;
use studyhall_testing::fixtures::at;

fn january() -> PeriodKey {
    PeriodKey::parse("202501").unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_for_one_user_share_one_identifier() {
    let h = Harness::new().await;
    let user = UserId::new();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.issue_identifier(user).await })
        })
        .collect();

    for handle in handles {
        let identity = handle.await.unwrap().unwrap();
        assert_eq!(identity.identifier, "202501001");
        assert_eq!(identity.user_id, user);
    }
    assert_eq!(h.store.counter_value(january()).await.unwrap(), 1);

    let issued: Vec<_> = h
        .notifier
        .sent()
        .into_iter()
        .filter(|(_, n)| matches!(n, Notification::IdentifierIssued { .. }))
        .collect();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].0, user);
}

#[tokio::test]
async fn repeat_issuance_returns_the_stored_identifier() {
    let h = Harness::new().await;
    let user = UserId::new();
    let first = h.engine.issue_identifier(user).await.unwrap();

    h.advance(chrono::Duration::days(45));
    let again = h.engine.issue_identifier(user).await.unwrap();

    assert_eq!(first, again);
    assert_eq!(again.period, january());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_users_get_a_gapless_sequence() {
    let h = Harness::new().await;

    let handles: Vec<_> = (0..25)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.issue_identifier(UserId::new()).await })
        })
        .collect();

    let mut sequences = Vec::new();
    for handle in handles {
        sequences.push(handle.await.unwrap().unwrap().sequence);
    }
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=25).collect::<Vec<u32>>());
    assert_eq!(h.store.counter_value(january()).await.unwrap(), 25);
}

#[tokio::test]
async fn sequence_restarts_in_a_new_month() {
    let h = Harness::new().await;
    h.engine.issue_identifier(UserId::new()).await.unwrap();
    h.engine.issue_identifier(UserId::new()).await.unwrap();

    h.clock.set(at(2025, 2, 3, 10));
    let february = h.engine.issue_identifier(UserId::new()).await.unwrap();

    assert_eq!(february.identifier, "202502001");
    assert_eq!(h.store.counter_value(january()).await.unwrap(), 2);
}

#[tokio::test]
async fn contention_is_retried() {
    let h = Harness::new().await;
    h.store.fail_next_assignments(3);

    let identity = h.engine.issue_identifier(UserId::new()).await.unwrap();

    assert_eq!(identity.identifier, "202501001");
}

#[tokio::test]
async fn persistent_contention_exhausts_without_burning_a_number() {
    let h = Harness::new().await;
    h.store.fail_next_assignments(100);

    let err = h.engine.issue_identifier(UserId::new()).await.unwrap_err();

    assert_eq!(err, EngineError::SequenceExhausted { attempts: 5 });
    assert!(err.is_retryable());
    assert_eq!(h.store.counter_value(january()).await.unwrap(), 0);
    assert!(h.store.identities().is_empty());

    h.store.fail_next_assignments(0);
    let identity = h.engine.issue_identifier(UserId::new()).await.unwrap();
    assert_eq!(identity.sequence, 1);
}

#[tokio::test]
async fn outage_is_reported_as_storage_unavailable() {
    let h = Harness::new().await;
    h.store.set_unavailable(true);

    let err = h.engine.issue_identifier(UserId::new()).await.unwrap_err();

    assert!(matches!(err, EngineError::StorageUnavailable(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any mix of users and repeats yields one identifier per user and
    /// sequences 1..=N with no gaps or duplicates.
    #[test]
    fn identifiers_are_unique_and_dense(
        picks in prop::collection::vec(0usize..12, 1..40)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let h = Harness::new().await;
            let users: Vec<UserId> = (0..12).map(|_| UserId::new()).collect();

            let results = join_all(
                picks.iter().map(|&i| h.engine.issue_identifier(users[i])),
            )
            .await;

            let mut per_user = std::collections::HashMap::new();
            for (&i, result) in picks.iter().zip(results) {
                let identity = result.unwrap();
                let previous = per_user.insert(i, identity.identifier.clone());
                if let Some(previous) = previous {
                    prop_assert_eq!(previous, identity.identifier);
                }
            }

            let distinct: HashSet<usize> = picks.iter().copied().collect();
            let mut sequences: Vec<u32> = h.store.identities().iter().map(|i| i.sequence).collect();
            sequences.sort_unstable();
            let expected: Vec<u32> = (1..=u32::try_from(distinct.len()).unwrap()).collect();
            prop_assert_eq!(sequences, expected);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
