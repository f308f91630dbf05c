//! Storage abstractions for reservations, membership counters and drafts.
//!
//! The engine never reads a snapshot, decides, and writes it back later. Every
//! mutation that depends on current state is handed to the store as a single
//! call ([`ReservationStore::insert_if_free`], [`ReservationStore::apply`],
//! [`MembershipStore::assign_identity`]) and the store is responsible for
//! performing the check and the write atomically.
//!
//! # Implementations
//!
//! - `PostgresStore` (in `studyhall-postgres`): production, serializable transactions
//! - `InMemoryStore` (in `studyhall-testing`): single mutex, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures so the engine can hold `Arc<dyn ReservationStore>`.

use crate::error::StoreError;
use crate::membership::{MembershipIdentity, PeriodKey};
use crate::status::StatusChange;
use crate::types::{
    DateRange, RegistrationDraft, Reservation, ReservationId, ResourceType, Seat, TimeSlot,
    UserId,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store methods
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Result of an atomic check-then-insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The reservation was written.
    Inserted(Reservation),
    /// An occupying reservation overlaps the seat; nothing was written.
    SeatTaken {
        /// The reservation holding the seat
        holder: Reservation,
    },
    /// The user already holds an active reservation, or one holding a
    /// membership for overlapping dates; nothing was written.
    ActiveMembership {
        /// The user's conflicting reservation
        existing: Reservation,
    },
}

/// Result of an atomic guarded status change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The guard held and the change was written.
    Applied(Reservation),
    /// The guard failed; the record is returned unchanged.
    Rejected(Reservation),
    /// A payment landed on a seat taken in the meantime. The record was
    /// written as failed.
    SeatTaken {
        /// The record after being marked failed
        current: Reservation,
        /// The reservation holding the seat
        holder: Reservation,
    },
    /// The owner holds another membership for overlapping dates. A payment
    /// is written as failed; any other change writes nothing.
    MembershipHeld {
        /// The record after the refusal
        current: Reservation,
        /// The owner's reservation holding those dates
        existing: Reservation,
    },
    /// No reservation with that ID.
    Missing,
}

/// Result of assigning a membership identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssignOutcome {
    /// A new identifier was issued by this call.
    Assigned(MembershipIdentity),
    /// The user already had one; the counter was not touched.
    Existing(MembershipIdentity),
}

impl AssignOutcome {
    /// The identity regardless of who issued it
    #[must_use]
    pub fn identity(&self) -> &MembershipIdentity {
        match self {
            Self::Assigned(identity) | Self::Existing(identity) => identity,
        }
    }

    /// Consumes the outcome
    #[must_use]
    pub fn into_identity(self) -> MembershipIdentity {
        match self {
            Self::Assigned(identity) | Self::Existing(identity) => identity,
        }
    }
}

/// Conflict query: which reservations occupy a resource type and time slot
/// over a range at a given instant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OccupancyQuery {
    /// Resource type
    pub resource_type: ResourceType,
    /// Time slot
    pub time_slot: TimeSlot,
    /// Range to intersect with
    pub range: DateRange,
    /// Instant occupancy is judged at (cash holds lapse)
    pub now: DateTime<Utc>,
    /// Cash collection window
    pub cash_window: Duration,
}

impl OccupancyQuery {
    /// Whether `reservation` is returned by this query
    #[must_use]
    pub fn matches(&self, reservation: &Reservation) -> bool {
        reservation.resource_type == self.resource_type
            && reservation.time_slot == self.time_slot
            && reservation.range.overlaps(&self.range)
            && reservation.is_occupying(self.now, self.cash_window)
    }
}

/// Reservation persistence and conflict queries.
pub trait ReservationStore: Send + Sync {
    /// Insert `reservation` unless its seat is occupied over an overlapping
    /// range, or its owner already holds an active reservation or another
    /// reservation holding a membership for overlapping dates (see
    /// [`Reservation::membership_clash`], judged at `reservation.created_at`).
    ///
    /// The checks and the insert happen atomically: of two concurrent calls
    /// for the same seat, or the same owner, and overlapping ranges, at most
    /// one returns [`InsertOutcome::Inserted`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    fn insert_if_free(
        &self,
        reservation: Reservation,
        today: NaiveDate,
        cash_window: Duration,
    ) -> StoreFuture<'_, InsertOutcome>;

    /// Fetch one reservation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    fn get(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>>;

    /// All reservations of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    fn find_by_user(&self, user_id: UserId) -> StoreFuture<'_, Vec<Reservation>>;

    /// Occupying reservations matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    fn occupying_overlaps(&self, query: OccupancyQuery) -> StoreFuture<'_, Vec<Reservation>>;

    /// Apply a guarded status change atomically.
    ///
    /// For changes with a [`StatusChange::membership_recheck`], the store
    /// first looks for another of the owner's reservations holding a
    /// membership for overlapping dates. For changes with a
    /// [`StatusChange::seat_recheck`], it then re-checks seat occupancy. When
    /// either is claimed it writes [`StatusChange::lost_claim`] instead, if
    /// there is one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    fn apply(&self, id: ReservationId, change: StatusChange) -> StoreFuture<'_, ApplyOutcome>;

    /// Cash holds older than the collection window at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    fn stale_cash_holds(
        &self,
        now: DateTime<Utc>,
        cash_window: Duration,
        limit: usize,
    ) -> StoreFuture<'_, Vec<ReservationId>>;

    /// Paid, not yet active reservations whose range contains `today`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    fn due_for_activation(
        &self,
        today: NaiveDate,
        limit: usize,
    ) -> StoreFuture<'_, Vec<ReservationId>>;

    /// Paid reservations not yet expired whose range ended before `today`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    fn due_for_expiry(&self, today: NaiveDate, limit: usize)
    -> StoreFuture<'_, Vec<ReservationId>>;

    /// Seat inventory of a resource type.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    fn seats(&self, resource_type: ResourceType) -> StoreFuture<'_, Vec<Seat>>;

    /// Add seats, updating the class of existing labels. Returns how many were new.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    fn upsert_seats(&self, seats: Vec<Seat>) -> StoreFuture<'_, usize>;
}

/// Per-user identifiers and per-period counters.
pub trait MembershipStore: Send + Sync {
    /// The user's identity, if one was issued.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    fn identity_of(&self, user_id: UserId) -> StoreFuture<'_, Option<MembershipIdentity>>;

    /// Atomically increment `period`'s counter and bind the new value to
    /// `user_id`, unless the user already has an identity.
    ///
    /// Counter increment and binding commit together or not at all, so no
    /// sequence number is consumed without being bound.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Contention`] on transient conflicts the caller
    /// may retry, other [`StoreError`]s if storage fails.
    fn assign_identity(
        &self,
        user_id: UserId,
        period: PeriodKey,
        issued_at: DateTime<Utc>,
    ) -> StoreFuture<'_, AssignOutcome>;

    /// Last value issued for `period` (0 if none).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    fn counter_value(&self, period: PeriodKey) -> StoreFuture<'_, u32>;
}

/// Temporary registration placeholders.
pub trait DraftStore: Send + Sync {
    /// Save a draft.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    fn save_draft(&self, draft: RegistrationDraft) -> StoreFuture<'_, ()>;

    /// Delete up to `limit` drafts expired at `now`. Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    fn purge_expired_drafts(&self, now: DateTime<Utc>, limit: usize) -> StoreFuture<'_, u64>;
}
