//! Domain types for the reservation and membership engine.
//!
//! Value objects (identifiers, seat labels, date ranges, money), the closed
//! enumerations the engine validates against (time slots, duration codes,
//! payment methods, statuses) and the [`Reservation`] record itself.

use crate::error::ValidationError;
use chrono::{DateTime, Days, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a user (supplied by the authentication collaborator)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Creates a new random `ReservationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ReservationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a registration draft
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DraftId(Uuid);

impl DraftId {
    /// Creates a new random `DraftId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `DraftId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DraftId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DraftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Actors
// ============================================================================

/// Role attached to a verified caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Regular member
    Member,
    /// Operator with admin capabilities
    Admin,
}

/// A verified `(user, role)` pair handed over by the authentication collaborator.
///
/// The engine trusts it as given.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Who is acting
    pub user_id: UserId,
    /// With which role
    pub role: Role,
}

impl Actor {
    /// A member acting on their own behalf
    #[must_use]
    pub const fn member(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Member,
        }
    }

    /// An admin
    #[must_use]
    pub const fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    /// The single capability check for admin-only operations.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    /// Whether this actor may act on a record owned by `owner`.
    #[must_use]
    pub fn may_act_for(&self, owner: UserId) -> bool {
        self.is_admin() || self.user_id == owner
    }
}

// ============================================================================
// Resources and seats
// ============================================================================

/// Membership tier a reservation is made under (e.g. "Standard")
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceType(String);

impl ResourceType {
    /// Creates a resource type from its name.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] if the name is blank.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::Empty {
                field: "resource_type",
            });
        }
        Ok(Self(name))
    }

    /// The tier name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Addressable seat label (e.g. "B3"); ordering is lexicographic
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeatLabel(String);

impl SeatLabel {
    /// Creates a seat label.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] if the label is blank.
    pub fn new(label: impl Into<String>) -> Result<Self, ValidationError> {
        let label = label.into().trim().to_string();
        if label.is_empty() {
            return Err(ValidationError::Empty { field: "seat" });
        }
        Ok(Self(label))
    }

    /// The label text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeatLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Seat class. `Regular` sorts before `Premium`, which is the allocation preference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SeatClass {
    /// Default seating
    Regular,
    /// Premium seating
    Premium,
}

impl SeatClass {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Premium => "premium",
        }
    }

    /// Parse from storage/user text.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownValue`] for anything else.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "regular" => Ok(Self::Regular),
            "premium" => Ok(Self::Premium),
            _ => Err(ValidationError::UnknownValue {
                field: "seat_class",
                value: s.to_string(),
            }),
        }
    }
}

/// A seat in the inventory of one resource type
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    /// Resource type whose pool this seat belongs to
    pub resource_type: ResourceType,
    /// Seat label
    pub label: SeatLabel,
    /// Seat class
    pub class: SeatClass,
}

// ============================================================================
// Time slots, durations and date ranges
// ============================================================================

/// Recurring daily window a reservation covers
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeSlot {
    /// Morning shift
    Morning,
    /// Afternoon shift
    Afternoon,
    /// Evening shift
    Evening,
    /// Night shift
    Night,
    /// Full day
    Day,
}

impl TimeSlot {
    /// Every slot, in display order
    pub const ALL: [Self; 5] = [
        Self::Morning,
        Self::Afternoon,
        Self::Evening,
        Self::Night,
        Self::Day,
    ];

    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
            Self::Day => "day",
        }
    }

    /// Parse case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownValue`] for text outside the enumeration.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|slot| slot.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnknownValue {
                field: "time_slot",
                value: s.to_string(),
            })
    }
}

impl FromStr for TimeSlot {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of a [`DurationCode`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DurationUnit {
    /// Calendar days
    Day,
    /// Blocks of seven days
    Week,
    /// Calendar months
    Month,
}

impl DurationUnit {
    const fn suffix(self) -> char {
        match self {
            Self::Day => 'd',
            Self::Week => 'w',
            Self::Month => 'm',
        }
    }
}

/// Requested booking length, written `<count><unit>` (`"15d"`, `"2w"`, `"1m"`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DurationCode {
    unit: DurationUnit,
    count: u32,
}

impl DurationCode {
    /// Largest accepted count for any unit
    pub const MAX_COUNT: u32 = 366;

    /// Creates a duration code.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownValue`] if `count` is zero or above [`Self::MAX_COUNT`].
    pub fn new(unit: DurationUnit, count: u32) -> Result<Self, ValidationError> {
        if count == 0 || count > Self::MAX_COUNT {
            return Err(ValidationError::UnknownValue {
                field: "duration",
                value: format!("{count}{}", unit.suffix()),
            });
        }
        Ok(Self { unit, count })
    }

    /// Shorthand for `count` days
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn days(count: u32) -> Result<Self, ValidationError> {
        Self::new(DurationUnit::Day, count)
    }

    /// Shorthand for `count` weeks
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn weeks(count: u32) -> Result<Self, ValidationError> {
        Self::new(DurationUnit::Week, count)
    }

    /// Shorthand for `count` months
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn months(count: u32) -> Result<Self, ValidationError> {
        Self::new(DurationUnit::Month, count)
    }

    /// Parse the textual form.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownValue`] for anything that is not `<n>d`, `<n>w` or `<n>m`.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let text = s.trim().to_ascii_lowercase();
        let unknown = || ValidationError::UnknownValue {
            field: "duration",
            value: s.to_string(),
        };

        let unit = match text.chars().last() {
            Some('d') => DurationUnit::Day,
            Some('w') => DurationUnit::Week,
            Some('m') => DurationUnit::Month,
            _ => return Err(unknown()),
        };
        let count: u32 = text[..text.len() - 1].parse().map_err(|_| unknown())?;
        Self::new(unit, count)
    }

    /// Unit of this duration
    #[must_use]
    pub const fn unit(&self) -> DurationUnit {
        self.unit
    }

    /// Number of units
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Inclusive end date of a booking of this length starting on `start`.
    ///
    /// Returns `None` when the date arithmetic leaves chrono's range.
    #[must_use]
    pub fn end_for(&self, start: NaiveDate) -> Option<NaiveDate> {
        let exclusive_end = match self.unit {
            DurationUnit::Day => start.checked_add_days(Days::new(u64::from(self.count))),
            DurationUnit::Week => start.checked_add_days(Days::new(u64::from(self.count) * 7)),
            DurationUnit::Month => start.checked_add_months(Months::new(self.count)),
        }?;
        exclusive_end.pred_opt()
    }
}

impl FromStr for DurationCode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DurationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

/// Inclusive whole-day date range `[start, end]`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Creates a range.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvertedRange`] if `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// First day (inclusive)
    #[must_use]
    pub const fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day (inclusive)
    #[must_use]
    pub const fn end(&self) -> NaiveDate {
        self.end
    }

    /// Standard interval overlap: `self.start <= other.end && self.end >= other.start`
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Whether `day` falls inside the range
    #[must_use]
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Number of days covered
    #[must_use]
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

// ============================================================================
// Money
// ============================================================================

/// Amount in minor currency units, to avoid floating point
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Amount in minor units
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

// ============================================================================
// Statuses
// ============================================================================

/// How the booking is paid for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Card through the payment gateway
    Card,
    /// UPI through the payment gateway
    Upi,
    /// Cash collected at the front desk
    Cash,
}

impl PaymentMethod {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Upi => "upi",
            Self::Cash => "cash",
        }
    }

    /// Parse from storage/user text.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownValue`] for unknown methods.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "card" => Ok(Self::Card),
            "upi" => Ok(Self::Upi),
            "cash" => Ok(Self::Cash),
            _ => Err(ValidationError::UnknownValue {
                field: "payment_method",
                value: s.to_string(),
            }),
        }
    }

    /// Payment status a fresh reservation starts in
    #[must_use]
    pub const fn initial_status(&self) -> PaymentStatus {
        match self {
            Self::Cash => PaymentStatus::CashPending,
            Self::Card | Self::Upi => PaymentStatus::Pending,
        }
    }
}

/// Payment status of a reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Awaiting the gateway callback
    Pending,
    /// Gateway reported success
    Completed,
    /// Awaiting cash collection (48-hour window)
    CashPending,
    /// Admin confirmed cash collection
    CashCollected,
    /// Gateway reported failure, or the seat was lost before payment landed
    Failed,
    /// Cash window lapsed without collection
    Expired,
}

impl PaymentStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::CashPending => "cash_pending",
            Self::CashCollected => "cash_collected",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    /// Parse from storage text.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownValue`] for unknown statuses.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "cash_pending" => Ok(Self::CashPending),
            "cash_collected" => Ok(Self::CashCollected),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            _ => Err(ValidationError::UnknownValue {
                field: "payment_status",
                value: s.to_string(),
            }),
        }
    }

    /// Money has been received (gateway or cash)
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        matches!(self, Self::Completed | Self::CashCollected)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStatus {
    /// Not started yet (or not paid yet)
    NotYetActive,
    /// Today is inside the paid date range
    Active,
    /// Over, or never became valid
    Expired,
    /// Withdrawn by the owner or an admin
    Cancelled,
}

impl LifecycleStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotYetActive => "not_yet_active",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from storage text.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownValue`] for unknown statuses.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "not_yet_active" => Ok(Self::NotYetActive),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ValidationError::UnknownValue {
                field: "lifecycle",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// The unit the engine manages: one seat, one time slot, one date range.
///
/// Instances handed out by stores are read-only snapshots. Changes go through
/// [`crate::status::StatusChange`] applied atomically by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique reservation identifier
    pub id: ReservationId,
    /// Owner
    pub user_id: UserId,
    /// Owner display name at booking time
    pub holder_name: String,
    /// Membership tier
    pub resource_type: ResourceType,
    /// Daily window
    pub time_slot: TimeSlot,
    /// Inclusive date range
    pub range: DateRange,
    /// Assigned seat (unset is a valid transient state)
    pub seat: Option<SeatLabel>,
    /// Amount to pay
    pub amount: Money,
    /// Payment method
    pub payment_method: PaymentMethod,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Stored lifecycle status, kept consistent by the sweeper
    pub lifecycle: LifecycleStatus,
    /// Opaque gateway payment reference
    pub external_reference: Option<String>,
    /// Free-form admin note
    pub note: Option<String>,
    /// Admin who confirmed cash collection
    pub confirmed_by: Option<UserId>,
    /// When cash collection was confirmed
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Who cancelled the reservation
    pub cancelled_by: Option<UserId>,
    /// Creation time; anchors the cash collection window
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Deadline for cash collection, if this is an open cash hold.
    #[must_use]
    pub fn cash_deadline(&self, window: Duration) -> Option<DateTime<Utc>> {
        (self.payment_status == PaymentStatus::CashPending
            && self.lifecycle != LifecycleStatus::Cancelled)
            .then(|| self.created_at + window)
    }

    /// Whether an open cash hold is still inside its collection window at `now`.
    #[must_use]
    pub fn cash_window_open(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.cash_deadline(window)
            .is_some_and(|deadline| now <= deadline)
    }

    /// Whether this reservation holds its seat for conflict purposes at `now`.
    ///
    /// Occupying: `completed`, `cash_collected`, or `cash_pending` inside the
    /// collection window. Cancelled and seatless reservations never occupy.
    #[must_use]
    pub fn is_occupying(&self, now: DateTime<Utc>, cash_window: Duration) -> bool {
        if self.seat.is_none() || self.lifecycle == LifecycleStatus::Cancelled {
            return false;
        }
        match self.payment_status {
            PaymentStatus::Completed | PaymentStatus::CashCollected => true,
            PaymentStatus::CashPending => self.cash_window_open(now, cash_window),
            PaymentStatus::Pending | PaymentStatus::Failed | PaymentStatus::Expired => false,
        }
    }

    /// Lifecycle status as it should be on `today`, from payment status and dates.
    #[must_use]
    pub fn derived_lifecycle(&self, today: NaiveDate) -> LifecycleStatus {
        if self.lifecycle == LifecycleStatus::Cancelled {
            return LifecycleStatus::Cancelled;
        }
        match self.payment_status {
            PaymentStatus::Failed | PaymentStatus::Expired => LifecycleStatus::Expired,
            PaymentStatus::Pending | PaymentStatus::CashPending => LifecycleStatus::NotYetActive,
            PaymentStatus::Completed | PaymentStatus::CashCollected => {
                if today < self.range.start() {
                    LifecycleStatus::NotYetActive
                } else if today > self.range.end() {
                    LifecycleStatus::Expired
                } else {
                    LifecycleStatus::Active
                }
            }
        }
    }

    /// Whether `other` blocks this reservation's seat: same resource type,
    /// time slot and seat, overlapping range, and `other` occupying at `now`.
    #[must_use]
    pub fn is_blocked_by(&self, other: &Self, now: DateTime<Utc>, cash_window: Duration) -> bool {
        self.id != other.id
            && self.seat.is_some()
            && self.seat == other.seat
            && self.resource_type == other.resource_type
            && self.time_slot == other.time_slot
            && self.range.overlaps(&other.range)
            && other.is_occupying(now, cash_window)
    }

    /// Whether this reservation claims its owner's membership for its dates
    /// at `now`: paid and not yet over, or a cash hold inside its window.
    #[must_use]
    pub fn holds_membership(&self, now: DateTime<Utc>, cash_window: Duration) -> bool {
        if matches!(
            self.lifecycle,
            LifecycleStatus::Cancelled | LifecycleStatus::Expired
        ) {
            return false;
        }
        match self.payment_status {
            PaymentStatus::Completed | PaymentStatus::CashCollected => true,
            PaymentStatus::CashPending => self.cash_window_open(now, cash_window),
            PaymentStatus::Pending | PaymentStatus::Failed | PaymentStatus::Expired => false,
        }
    }

    /// Whether `other` is another of the same owner's reservations holding
    /// a membership for dates overlapping this one at `now`.
    #[must_use]
    pub fn membership_clash(
        &self,
        other: &Self,
        now: DateTime<Utc>,
        cash_window: Duration,
    ) -> bool {
        self.id != other.id
            && self.user_id == other.user_id
            && self.range.overlaps(&other.range)
            && other.holds_membership(now, cash_window)
    }
}

// ============================================================================
// Registration drafts
// ============================================================================

/// Temporary placeholder for an unverified registration.
///
/// Drafts carry an explicit expiry so any engine instance can purge them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationDraft {
    /// Draft identifier
    pub id: DraftId,
    /// Contact the verification was sent to
    pub contact: String,
    /// When the draft was created
    pub created_at: DateTime<Utc>,
    /// When the draft may be purged
    pub expires_at: DateTime<Utc>,
}

impl RegistrationDraft {
    /// Creates a draft living for `ttl`
    #[must_use]
    pub fn new(contact: impl Into<String>, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: DraftId::new(),
            contact: contact.into(),
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// Whether the grace window has passed
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn month_duration_ends_the_day_before_the_same_date_next_month() {
        let one_month = DurationCode::months(1).unwrap();
        assert_eq!(one_month.end_for(date(2025, 1, 10)), Some(date(2025, 2, 9)));
        assert_eq!(one_month.end_for(date(2025, 2, 10)), Some(date(2025, 3, 9)));
    }

    #[test]
    fn day_and_week_durations() {
        assert_eq!(
            DurationCode::days(15).unwrap().end_for(date(2025, 2, 1)),
            Some(date(2025, 2, 15))
        );
        assert_eq!(
            DurationCode::days(1).unwrap().end_for(date(2025, 2, 1)),
            Some(date(2025, 2, 1))
        );
        assert_eq!(
            DurationCode::weeks(2).unwrap().end_for(date(2025, 2, 1)),
            Some(date(2025, 2, 14))
        );
    }

    #[test]
    fn duration_codes_parse_and_display() {
        assert_eq!(DurationCode::parse("15d").unwrap(), DurationCode::days(15).unwrap());
        assert_eq!(DurationCode::parse(" 3M ").unwrap(), DurationCode::months(3).unwrap());
        assert_eq!(DurationCode::weeks(2).unwrap().to_string(), "2w");
        assert!(DurationCode::parse("0d").is_err());
        assert!(DurationCode::parse("3y").is_err());
        assert!(DurationCode::parse("d").is_err());
        assert!(DurationCode::parse("").is_err());
    }

    #[test]
    fn time_slot_parsing_is_closed() {
        assert_eq!(TimeSlot::parse("Day").unwrap(), TimeSlot::Day);
        assert_eq!("EVENING".parse::<TimeSlot>().unwrap(), TimeSlot::Evening);
        assert!(matches!(
            TimeSlot::parse("brunch"),
            Err(ValidationError::UnknownValue { field: "time_slot", .. })
        ));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(DateRange::new(date(2025, 2, 2), date(2025, 2, 1)).is_err());
        assert_eq!(
            DateRange::new(date(2025, 2, 1), date(2025, 2, 1)).unwrap().days(),
            1
        );
    }

    #[test]
    fn adjacent_ranges_do_not_overlap() {
        let first = DateRange::new(date(2025, 1, 10), date(2025, 2, 9)).unwrap();
        let next = DateRange::new(date(2025, 2, 10), date(2025, 3, 9)).unwrap();
        let inside = DateRange::new(date(2025, 2, 1), date(2025, 2, 15)).unwrap();
        assert!(!first.overlaps(&next));
        assert!(first.overlaps(&inside));
        assert!(inside.overlaps(&next));
    }

    #[test]
    fn regular_seats_sort_before_premium() {
        let mut seats = vec![
            (SeatClass::Premium, SeatLabel::new("A1").unwrap()),
            (SeatClass::Regular, SeatLabel::new("B2").unwrap()),
            (SeatClass::Regular, SeatLabel::new("A9").unwrap()),
        ];
        seats.sort();
        let labels: Vec<_> = seats.iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(labels, ["A9", "B2", "A1"]);
    }

    #[test]
    fn statuses_round_trip_through_storage_text() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Completed,
            PaymentStatus::CashPending,
            PaymentStatus::CashCollected,
            PaymentStatus::Failed,
            PaymentStatus::Expired,
        ] {
            assert_eq!(PaymentStatus::parse(status.as_str()).unwrap(), status);
        }
        for status in [
            LifecycleStatus::NotYetActive,
            LifecycleStatus::Active,
            LifecycleStatus::Expired,
            LifecycleStatus::Cancelled,
        ] {
            assert_eq!(LifecycleStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric_and_matches_day_intersection(
            a in 0i64..60, alen in 0i64..40, b in 0i64..60, blen in 0i64..40
        ) {
            let base = date(2025, 1, 1);
            let r1 =
                DateRange::new(base + Duration::days(a), base + Duration::days(a + alen)).unwrap();
            let r2 =
                DateRange::new(base + Duration::days(b), base + Duration::days(b + blen)).unwrap();
            let shares_a_day = (a..=a + alen).any(|d| (b..=b + blen).contains(&d));
            prop_assert_eq!(r1.overlaps(&r2), shares_a_day);
            prop_assert_eq!(r1.overlaps(&r2), r2.overlaps(&r1));
        }
    }
}
