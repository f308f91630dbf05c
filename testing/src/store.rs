//! In-memory implementation of every storage trait.
//!
//! All state sits behind one mutex, which makes each trait call atomic the
//! same way a serializable transaction is. The guard is never held across an
//! `await`: each future does its work synchronously when polled.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use studyhall_core::error::StoreError;
use studyhall_core::membership::{MembershipIdentity, PeriodKey};
use studyhall_core::status::StatusChange;
use studyhall_core::store::{
    ApplyOutcome, AssignOutcome, DraftStore, InsertOutcome, MembershipStore, OccupancyQuery,
    ReservationStore, StoreFuture,
};
use studyhall_core::types::{
    DraftId, LifecycleStatus, PaymentStatus, RegistrationDraft, Reservation, ReservationId,
    ResourceType, Seat, SeatClass, SeatLabel, UserId,
};

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    contention_remaining: usize,
    failing_applies: HashSet<ReservationId>,
}

#[derive(Debug, Default)]
struct Inner {
    reservations: HashMap<ReservationId, Reservation>,
    seats: BTreeMap<(ResourceType, SeatLabel), SeatClass>,
    members: HashMap<UserId, MembershipIdentity>,
    counters: HashMap<PeriodKey, u32>,
    drafts: HashMap<DraftId, RegistrationDraft>,
    writes: usize,
    faults: Faults,
}

impl Inner {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.faults.unavailable {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    /// The earliest of the owner's other reservations holding a membership
    /// for dates overlapping `reservation` at `now`.
    fn membership_holder(
        &self,
        reservation: &Reservation,
        now: DateTime<Utc>,
        cash_window: Duration,
    ) -> Option<&Reservation> {
        self.reservations
            .values()
            .filter(|other| reservation.membership_clash(other, now, cash_window))
            .min_by_key(|other| (other.range.start(), other.id))
    }

    fn sorted_ids<'a>(
        records: impl Iterator<Item = &'a Reservation>,
        limit: usize,
    ) -> Vec<ReservationId> {
        let mut matching: Vec<&Reservation> = records.collect();
        matching.sort_by_key(|r| (r.created_at, r.id));
        matching.into_iter().take(limit).map(|r| r.id).collect()
    }
}

/// In-memory store for tests.
///
/// Clones share state. Fault injection hooks let tests simulate outages,
/// counter contention and per-record write failures.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    fn lock_ignoring_poison(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Insert a record as-is, bypassing every check (for seeding test state).
    pub fn seed(&self, reservation: Reservation) {
        self.lock_ignoring_poison()
            .reservations
            .insert(reservation.id, reservation);
    }

    /// Current snapshot of one record.
    #[must_use]
    pub fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.lock_ignoring_poison().reservations.get(&id).cloned()
    }

    /// Every record, oldest first.
    #[must_use]
    pub fn all_reservations(&self) -> Vec<Reservation> {
        let inner = self.lock_ignoring_poison();
        let mut all: Vec<Reservation> = inner.reservations.values().cloned().collect();
        all.sort_by_key(|r| (r.created_at, r.id));
        all
    }

    /// Every issued identity.
    #[must_use]
    pub fn identities(&self) -> Vec<MembershipIdentity> {
        let inner = self.lock_ignoring_poison();
        let mut all: Vec<MembershipIdentity> = inner.members.values().cloned().collect();
        all.sort_by(|a, b| (&a.period, a.sequence).cmp(&(&b.period, b.sequence)));
        all
    }

    /// Number of drafts held.
    #[must_use]
    pub fn draft_count(&self) -> usize {
        self.lock_ignoring_poison().drafts.len()
    }

    /// Number of successful mutating writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.lock_ignoring_poison().writes
    }

    /// Make every call fail with [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock_ignoring_poison().faults.unavailable = unavailable;
    }

    /// Make the next `attempts` identity assignments fail with [`StoreError::Contention`].
    pub fn fail_next_assignments(&self, attempts: usize) {
        self.lock_ignoring_poison().faults.contention_remaining = attempts;
    }

    /// Make every status change on `id` fail with [`StoreError::Unavailable`].
    pub fn fail_applies_for(&self, id: ReservationId) {
        self.lock_ignoring_poison().faults.failing_applies.insert(id);
    }

    /// Clear per-record write failures.
    pub fn clear_apply_failures(&self) {
        self.lock_ignoring_poison().faults.failing_applies.clear();
    }

    fn insert_now(
        &self,
        reservation: Reservation,
        today: NaiveDate,
        cash_window: Duration,
    ) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.lock()?;
        inner.check_available()?;

        let now = reservation.created_at;
        let active = inner.reservations.values().find(|r| {
            r.user_id == reservation.user_id
                && r.derived_lifecycle(today) == LifecycleStatus::Active
        });
        let holder = active.or_else(|| inner.membership_holder(&reservation, now, cash_window));
        if let Some(existing) = holder {
            return Ok(InsertOutcome::ActiveMembership {
                existing: existing.clone(),
            });
        }

        let holder = inner
            .reservations
            .values()
            .filter(|other| reservation.is_blocked_by(other, now, cash_window))
            .min_by_key(|other| (other.range.start(), other.id))
            .cloned();
        if let Some(holder) = holder {
            return Ok(InsertOutcome::SeatTaken { holder });
        }

        inner.writes += 1;
        inner
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(InsertOutcome::Inserted(reservation))
    }

    fn apply_now(
        &self,
        id: ReservationId,
        change: &StatusChange,
    ) -> Result<ApplyOutcome, StoreError> {
        let mut inner = self.lock()?;
        inner.check_available()?;
        if inner.faults.failing_applies.contains(&id) {
            return Err(StoreError::Unavailable(format!("injected write failure for {id}")));
        }

        let Some(current) = inner.reservations.get(&id).cloned() else {
            return Ok(ApplyOutcome::Missing);
        };
        if !change.permits(&current) {
            return Ok(ApplyOutcome::Rejected(current));
        }

        if let Some((at, cash_window)) = change.membership_recheck() {
            if let Some(existing) = inner.membership_holder(&current, at, cash_window).cloned() {
                let current = match change.lost_claim() {
                    Some(lost) => {
                        let failed = lost.apply_to(&current);
                        inner.writes += 1;
                        inner.reservations.insert(id, failed.clone());
                        failed
                    }
                    None => current,
                };
                return Ok(ApplyOutcome::MembershipHeld { current, existing });
            }
        }

        if let Some((at, cash_window)) = change.seat_recheck() {
            let holder = inner
                .reservations
                .values()
                .find(|other| current.is_blocked_by(other, at, cash_window))
                .cloned();
            if let (Some(holder), Some(lost)) = (holder, change.lost_claim()) {
                let failed = lost.apply_to(&current);
                inner.writes += 1;
                inner.reservations.insert(id, failed.clone());
                return Ok(ApplyOutcome::SeatTaken {
                    current: failed,
                    holder,
                });
            }
        }

        let next = change.apply_to(&current);
        inner.writes += 1;
        inner.reservations.insert(id, next.clone());
        Ok(ApplyOutcome::Applied(next))
    }

    fn assign_now(
        &self,
        user_id: UserId,
        period: PeriodKey,
        issued_at: DateTime<Utc>,
    ) -> Result<AssignOutcome, StoreError> {
        let mut inner = self.lock()?;
        inner.check_available()?;
        if inner.faults.contention_remaining > 0 {
            inner.faults.contention_remaining -= 1;
            return Err(StoreError::Contention(
                "injected counter contention".to_string(),
            ));
        }

        if let Some(existing) = inner.members.get(&user_id) {
            return Ok(AssignOutcome::Existing(existing.clone()));
        }

        let counter = inner.counters.entry(period.clone()).or_insert(0);
        *counter += 1;
        let identity = MembershipIdentity::new(user_id, period, *counter, issued_at);
        inner.members.insert(user_id, identity.clone());
        inner.writes += 1;
        Ok(AssignOutcome::Assigned(identity))
    }
}

impl ReservationStore for InMemoryStore {
    fn insert_if_free(
        &self,
        reservation: Reservation,
        today: NaiveDate,
        cash_window: Duration,
    ) -> StoreFuture<'_, InsertOutcome> {
        Box::pin(async move { self.insert_now(reservation, today, cash_window) })
    }

    fn get(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            let inner = self.lock()?;
            inner.check_available()?;
            Ok(inner.reservations.get(&id).cloned())
        })
    }

    fn find_by_user(&self, user_id: UserId) -> StoreFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            let inner = self.lock()?;
            inner.check_available()?;
            let mut found: Vec<Reservation> = inner
                .reservations
                .values()
                .filter(|r| r.user_id == user_id)
                .cloned()
                .collect();
            found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(found)
        })
    }

    fn occupying_overlaps(&self, query: OccupancyQuery) -> StoreFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            let inner = self.lock()?;
            inner.check_available()?;
            let mut found: Vec<Reservation> = inner
                .reservations
                .values()
                .filter(|r| query.matches(r))
                .cloned()
                .collect();
            found.sort_by(|a, b| (&a.seat, a.range.start()).cmp(&(&b.seat, b.range.start())));
            Ok(found)
        })
    }

    fn apply(&self, id: ReservationId, change: StatusChange) -> StoreFuture<'_, ApplyOutcome> {
        Box::pin(async move { self.apply_now(id, &change) })
    }

    fn stale_cash_holds(
        &self,
        now: DateTime<Utc>,
        cash_window: Duration,
        limit: usize,
    ) -> StoreFuture<'_, Vec<ReservationId>> {
        Box::pin(async move {
            let inner = self.lock()?;
            inner.check_available()?;
            Ok(Inner::sorted_ids(
                inner.reservations.values().filter(|r| {
                    r.payment_status == PaymentStatus::CashPending
                        && r.lifecycle != LifecycleStatus::Cancelled
                        && !r.cash_window_open(now, cash_window)
                }),
                limit,
            ))
        })
    }

    fn due_for_activation(
        &self,
        today: NaiveDate,
        limit: usize,
    ) -> StoreFuture<'_, Vec<ReservationId>> {
        Box::pin(async move {
            let inner = self.lock()?;
            inner.check_available()?;
            Ok(Inner::sorted_ids(
                inner.reservations.values().filter(|r| {
                    r.payment_status.is_paid()
                        && r.lifecycle == LifecycleStatus::NotYetActive
                        && r.range.contains(today)
                }),
                limit,
            ))
        })
    }

    fn due_for_expiry(
        &self,
        today: NaiveDate,
        limit: usize,
    ) -> StoreFuture<'_, Vec<ReservationId>> {
        Box::pin(async move {
            let inner = self.lock()?;
            inner.check_available()?;
            Ok(Inner::sorted_ids(
                inner.reservations.values().filter(|r| {
                    r.payment_status.is_paid()
                        && matches!(
                            r.lifecycle,
                            LifecycleStatus::NotYetActive | LifecycleStatus::Active
                        )
                        && today > r.range.end()
                }),
                limit,
            ))
        })
    }

    fn seats(&self, resource_type: ResourceType) -> StoreFuture<'_, Vec<Seat>> {
        Box::pin(async move {
            let inner = self.lock()?;
            inner.check_available()?;
            Ok(inner
                .seats
                .iter()
                .filter(|((rt, _), _)| *rt == resource_type)
                .map(|((rt, label), class)| Seat {
                    resource_type: rt.clone(),
                    label: label.clone(),
                    class: *class,
                })
                .collect())
        })
    }

    fn upsert_seats(&self, seats: Vec<Seat>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            inner.check_available()?;
            let mut added = 0;
            for seat in seats {
                if inner
                    .seats
                    .insert((seat.resource_type, seat.label), seat.class)
                    .is_none()
                {
                    added += 1;
                }
            }
            inner.writes += 1;
            Ok(added)
        })
    }
}

impl MembershipStore for InMemoryStore {
    fn identity_of(&self, user_id: UserId) -> StoreFuture<'_, Option<MembershipIdentity>> {
        Box::pin(async move {
            let inner = self.lock()?;
            inner.check_available()?;
            Ok(inner.members.get(&user_id).cloned())
        })
    }

    fn assign_identity(
        &self,
        user_id: UserId,
        period: PeriodKey,
        issued_at: DateTime<Utc>,
    ) -> StoreFuture<'_, AssignOutcome> {
        Box::pin(async move { self.assign_now(user_id, period, issued_at) })
    }

    fn counter_value(&self, period: PeriodKey) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let inner = self.lock()?;
            inner.check_available()?;
            Ok(inner.counters.get(&period).copied().unwrap_or(0))
        })
    }
}

impl DraftStore for InMemoryStore {
    fn save_draft(&self, draft: RegistrationDraft) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            inner.check_available()?;
            inner.drafts.insert(draft.id, draft);
            inner.writes += 1;
            Ok(())
        })
    }

    fn purge_expired_drafts(&self, now: DateTime<Utc>, limit: usize) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            inner.check_available()?;
            let expired: Vec<DraftId> = inner
                .drafts
                .values()
                .filter(|d| d.is_expired(now))
                .take(limit)
                .map(|d| d.id)
                .collect();
            for id in &expired {
                inner.drafts.remove(id);
            }
            if !expired.is_empty() {
                inner.writes += 1;
            }
            Ok(u64::try_from(expired.len()).unwrap_or(u64::MAX))
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use crate::fixtures::{ReservationBuilder, date, range, seat_label, standard, t0};
    use studyhall_core::types::PaymentMethod;

    #[tokio::test]
    async fn overlapping_insert_on_same_seat_is_refused() {
        let store = InMemoryStore::new();
        let window = Duration::hours(48);
        let first =
            ReservationBuilder::new(UserId::new(), range(date(2025, 1, 10), date(2025, 2, 9)))
            .seat(seat_label("B3"))
            .method(PaymentMethod::Cash)
            .build();
        let second =
            ReservationBuilder::new(UserId::new(), range(date(2025, 2, 1), date(2025, 2, 15)))
            .seat(seat_label("B3"))
            .method(PaymentMethod::Cash)
            .build();

        let today = date(2025, 1, 1);
        assert!(matches!(
            store.insert_if_free(first.clone(), today, window).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
        match store.insert_if_free(second, today, window).await.unwrap() {
            InsertOutcome::SeatTaken { holder } => assert_eq!(holder.id, first.id),
            other => panic!("expected SeatTaken, got {other:?}"),
        }
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn one_owner_cannot_hold_overlapping_dates_on_two_seats() {
        let store = InMemoryStore::new();
        let window = Duration::hours(48);
        let user = UserId::new();
        let first = ReservationBuilder::new(user, range(date(2025, 1, 10), date(2025, 1, 19)))
            .seat(seat_label("A1"))
            .method(PaymentMethod::Cash)
            .build();
        let second = ReservationBuilder::new(user, range(date(2025, 1, 15), date(2025, 1, 24)))
            .seat(seat_label("A2"))
            .method(PaymentMethod::Cash)
            .build();
        let today = date(2025, 1, 1);

        store.insert_if_free(first.clone(), today, window).await.unwrap();
        match store.insert_if_free(second, today, window).await.unwrap() {
            InsertOutcome::ActiveMembership { existing } => assert_eq!(existing.id, first.id),
            other => panic!("expected ActiveMembership, got {other:?}"),
        }

        let card = ReservationBuilder::new(user, range(date(2025, 1, 12), date(2025, 1, 13)))
            .seat(seat_label("B3"))
            .build();
        store.seed(card.clone());
        let pay = StatusChange::CompletePayment {
            reference: "pay_1".to_string(),
            at: t0(),
            cash_window: window,
        };
        match store.apply(card.id, pay).await.unwrap() {
            ApplyOutcome::MembershipHeld { current, existing } => {
                assert_eq!(current.payment_status, PaymentStatus::Failed);
                assert_eq!(existing.id, first.id);
            }
            other => panic!("expected MembershipHeld, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn injected_contention_runs_out() {
        let store = InMemoryStore::new();
        store.fail_next_assignments(1);
        let period = PeriodKey::for_instant(t0());
        let user = UserId::new();
        assert!(matches!(
            store.assign_identity(user, period.clone(), t0()).await,
            Err(StoreError::Contention(_))
        ));
        let identity = store
            .assign_identity(user, period.clone(), t0())
            .await
            .unwrap()
            .into_identity();
        assert_eq!(identity.identifier, "202501001");
        assert_eq!(store.counter_value(period).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn seats_are_scoped_by_resource_type() {
        let store = InMemoryStore::new();
        let premium = ResourceType::new("Premium").unwrap();
        let added = store
            .upsert_seats(vec![
                Seat {
                    resource_type: standard(),
                    label: seat_label("A1"),
                    class: SeatClass::Regular,
                },
                Seat {
                    resource_type: premium.clone(),
                    label: seat_label("P1"),
                    class: SeatClass::Premium,
                },
            ])
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(store.seats(premium).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get(ReservationId::new()).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.get(ReservationId::new()).await.unwrap().is_none());
    }
}
