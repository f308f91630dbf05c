//! Error taxonomy for the reservation and membership engine.
//!
//! - [`ValidationError`]: malformed input, rejected before any storage access
//! - [`ConflictError`]: expected, user-facing booking conflicts
//! - [`StoreError`]: what storage backends report
//! - [`EngineError`]: everything an engine operation can return

use crate::types::{
    DateRange, DurationCode, LifecycleStatus, PaymentStatus, ReservationId, ResourceType,
    SeatLabel, TimeSlot,
};
use chrono::NaiveDate;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Malformed input. Always recoverable by the caller correcting it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required text field was blank.
    #[error("{field} must not be empty")]
    Empty {
        /// Field name
        field: &'static str,
    },

    /// A value outside a closed enumeration.
    #[error("unknown {field}: {value:?}")]
    UnknownValue {
        /// Field name
        field: &'static str,
        /// Offending text
        value: String,
    },

    /// `start > end`.
    #[error("start date {start} is after end date {end}")]
    InvertedRange {
        /// Requested start
        start: NaiveDate,
        /// Requested end
        end: NaiveDate,
    },

    /// Booking starts before today.
    #[error("start date {start} is in the past (today is {today})")]
    StartInPast {
        /// Requested start
        start: NaiveDate,
        /// Current day
        today: NaiveDate,
    },

    /// Range length does not match the duration code.
    #[error("date range {range} does not match duration {duration}")]
    DurationMismatch {
        /// Requested range
        range: DateRange,
        /// Requested duration
        duration: DurationCode,
        /// End date the duration implies, if computable
        expected_end: Option<NaiveDate>,
    },

    /// Preferred seat is not part of the resource type's inventory.
    #[error("seat {seat} is not part of the {resource_type} inventory")]
    UnknownSeat {
        /// Requested seat
        seat: SeatLabel,
        /// Resource type searched
        resource_type: ResourceType,
    },
}

/// Which kind of conflict occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// No seat free for the request
    NoCapacity,
    /// The requested seat is held by someone else
    SeatTaken,
    /// The user already holds an active membership
    ActiveMembershipExists,
}

impl ConflictKind {
    /// Metric label / log field value
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoCapacity => "no_capacity",
            Self::SeatTaken => "seat_taken",
            Self::ActiveMembershipExists => "active_membership_exists",
        }
    }
}

/// Booking conflicts. Frequent and user-facing; never a bug.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConflictError {
    /// Every seat is occupied over the requested range.
    #[error("no free {resource_type} seat in the {time_slot} slot for {range}")]
    NoCapacity {
        /// Resource type requested
        resource_type: ResourceType,
        /// Time slot requested
        time_slot: TimeSlot,
        /// Range requested
        range: DateRange,
    },

    /// The specific seat is held over an overlapping range.
    #[error("seat {seat} is already booked by {occupied_by} for {conflicting_range}")]
    SeatTaken {
        /// Seat requested
        seat: SeatLabel,
        /// Display name of the current holder
        occupied_by: String,
        /// Range of the holder's reservation
        conflicting_range: DateRange,
    },

    /// The user already holds an active reservation.
    #[error("an active membership already exists ({reservation_id})")]
    ActiveMembershipExists {
        /// The active reservation
        reservation_id: ReservationId,
    },
}

impl ConflictError {
    /// Conflict kind
    #[must_use]
    pub const fn kind(&self) -> ConflictKind {
        match self {
            Self::NoCapacity { .. } => ConflictKind::NoCapacity,
            Self::SeatTaken { .. } => ConflictKind::SeatTaken,
            Self::ActiveMembershipExists { .. } => ConflictKind::ActiveMembershipExists,
        }
    }
}

/// Errors reported by storage backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The persistence substrate cannot be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Transient contention (serialization failure, lock timeout, deadlock).
    #[error("storage contention: {0}")]
    Contention(String),

    /// Stored data could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_contention(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        Self::Corrupt(err.to_string())
    }
}

/// Everything an engine operation can fail with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed input.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Booking conflict.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Counter contention outlasted the retry budget. Retryable by the caller.
    #[error("membership sequence unavailable after {attempts} attempts")]
    SequenceExhausted {
        /// Attempts made
        attempts: usize,
    },

    /// The change is not legal from the record's current status.
    #[error("cannot {attempted} reservation {reservation_id} in status {payment_status}/{lifecycle}")]
    InvalidTransition {
        /// Target reservation
        reservation_id: ReservationId,
        /// Change that was attempted
        attempted: &'static str,
        /// Payment status found
        payment_status: PaymentStatus,
        /// Lifecycle status found
        lifecycle: LifecycleStatus,
    },

    /// No reservation with that ID.
    #[error("reservation {0} not found")]
    NotFound(ReservationId),

    /// Cash collection was already confirmed.
    #[error("reservation {0} is already finalized")]
    AlreadyFinalized(ReservationId),

    /// The actor lacks the capability for this operation.
    #[error("not permitted to {action}")]
    NotPermitted {
        /// Operation attempted
        action: &'static str,
    },

    /// Persistence is unreachable; the operation failed closed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl EngineError {
    /// Whether the caller should retry later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SequenceExhausted { .. } | Self::StorageUnavailable(_)
        )
    }

    /// Whether this is an expected, user-facing outcome rather than a fault.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Conflict(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}
