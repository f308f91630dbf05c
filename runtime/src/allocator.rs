//! Seat allocation.
//!
//! The allocator validates a booking request, picks candidate seats from the
//! inventory and hands each candidate to [`ReservationStore::insert_if_free`],
//! which performs the overlap check and the insert atomically. The occupancy
//! read beforehand only orders candidates; it is never trusted for
//! correctness.
//!
//! Seat preference without an explicit seat: `Regular` before `Premium`, then
//! label order.

use crate::engine::EngineEnvironment;
use crate::metrics::{ALLOCATIONS_TOTAL, ALLOCATION_CONFLICTS_TOTAL};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use studyhall_core::error::{ConflictError, EngineError, Result, ValidationError};
use studyhall_core::store::{InsertOutcome, OccupancyQuery};
use studyhall_core::types::{
    Actor, DateRange, DurationCode, LifecycleStatus, Money, PaymentMethod, PaymentStatus,
    Reservation, ReservationId, ResourceType, Seat, SeatClass, SeatLabel, TimeSlot, UserId,
};

/// Allocation settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// How long an uncollected cash booking holds its seat
    pub cash_window: Duration,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            cash_window: Duration::hours(48),
        }
    }
}

/// A request to book a seat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingRequest {
    /// Requesting user
    pub user_id: UserId,
    /// Display name recorded on the reservation
    pub holder_name: String,
    /// Membership tier
    pub resource_type: ResourceType,
    /// Daily window
    pub time_slot: TimeSlot,
    /// Requested length
    pub duration: DurationCode,
    /// First day
    pub start: NaiveDate,
    /// Last day (inclusive)
    pub end: NaiveDate,
    /// Specific seat, if the user picked one
    pub preferred_seat: Option<SeatLabel>,
    /// How the user will pay
    pub payment_method: PaymentMethod,
    /// Price
    pub amount: Money,
}

impl BookingRequest {
    /// Check the request against the calendar.
    ///
    /// # Errors
    ///
    /// [`ValidationError::InvertedRange`], [`ValidationError::StartInPast`] or
    /// [`ValidationError::DurationMismatch`].
    pub fn validate(&self, today: NaiveDate) -> std::result::Result<DateRange, ValidationError> {
        if self.holder_name.trim().is_empty() {
            return Err(ValidationError::Empty {
                field: "holder_name",
            });
        }
        let range = DateRange::new(self.start, self.end)?;
        if range.start() < today {
            return Err(ValidationError::StartInPast {
                start: range.start(),
                today,
            });
        }
        let expected_end = self.duration.end_for(range.start());
        if expected_end != Some(range.end()) {
            return Err(ValidationError::DurationMismatch {
                range,
                duration: self.duration,
                expected_end,
            });
        }
        Ok(range)
    }
}

/// One occupied seat in an occupancy listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OccupiedSeat {
    /// Seat
    pub seat: SeatLabel,
    /// Display name of the holder
    pub holder_name: String,
    /// Range held
    pub range: DateRange,
    /// Holding reservation
    pub reservation_id: ReservationId,
    /// Payment status that makes it occupying
    pub payment_status: PaymentStatus,
}

/// Books seats without ever letting two occupying reservations overlap.
#[derive(Clone, Debug)]
pub struct ReservationAllocator {
    env: EngineEnvironment,
    config: AllocatorConfig,
}

impl ReservationAllocator {
    /// Create an allocator.
    #[must_use]
    pub const fn new(env: EngineEnvironment, config: AllocatorConfig) -> Self {
        Self { env, config }
    }

    /// Book a seat for `request`.
    ///
    /// The new reservation starts `pending` (card/UPI) or `cash_pending`
    /// (cash). A `pending` booking does not hold its seat until payment lands.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Validation`] for malformed requests or an unknown preferred seat
    /// - [`ConflictError::ActiveMembershipExists`] if the user already has an active
    ///   reservation, or a paid booking or open cash hold overlapping the requested dates
    /// - [`ConflictError::SeatTaken`] if the preferred seat is held
    /// - [`ConflictError::NoCapacity`] if no seat is free
    /// - [`EngineError::StorageUnavailable`] if storage fails
    #[tracing::instrument(
        skip(self, request),
        fields(
            user_id = %request.user_id,
            resource_type = %request.resource_type,
            time_slot = %request.time_slot,
        )
    )]
    pub async fn allocate(&self, request: BookingRequest) -> Result<Reservation> {
        let now = self.env.clock.now();
        let result = self.try_allocate(request, now).await;

        match &result {
            Ok(reservation) => {
                metrics::counter!(ALLOCATIONS_TOTAL, "outcome" => "allocated").increment(1);
                tracing::info!(
                    reservation_id = %reservation.id,
                    seat = ?reservation.seat,
                    range = %reservation.range,
                    payment_status = %reservation.payment_status,
                    "Seat allocated"
                );
            }
            Err(EngineError::Conflict(conflict)) => {
                metrics::counter!(ALLOCATIONS_TOTAL, "outcome" => "conflict").increment(1);
                metrics::counter!(ALLOCATION_CONFLICTS_TOTAL, "kind" => conflict.kind().as_str())
                    .increment(1);
                tracing::info!(kind = conflict.kind().as_str(), %conflict, "Allocation refused");
            }
            Err(EngineError::Validation(error)) => {
                metrics::counter!(ALLOCATIONS_TOTAL, "outcome" => "rejected").increment(1);
                tracing::debug!(%error, "Allocation request invalid");
            }
            Err(error) => {
                metrics::counter!(ALLOCATIONS_TOTAL, "outcome" => "error").increment(1);
                tracing::error!(%error, "Allocation failed");
            }
        }
        result
    }

    async fn try_allocate(
        &self,
        request: BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let today = now.date_naive();
        let range = request.validate(today)?;

        let history = self.env.reservations.find_by_user(request.user_id).await?;
        if let Some(active) = history.iter().find(|r| {
            r.derived_lifecycle(today) == LifecycleStatus::Active
                || (r.range.overlaps(&range) && r.holds_membership(now, self.config.cash_window))
        }) {
            return Err(ConflictError::ActiveMembershipExists {
                reservation_id: active.id,
            }
            .into());
        }

        let mut inventory = self
            .env
            .reservations
            .seats(request.resource_type.clone())
            .await?;
        inventory.sort_by(|a, b| (a.class, &a.label).cmp(&(b.class, &b.label)));

        let candidates = match &request.preferred_seat {
            Some(preferred) => {
                if !inventory.iter().any(|seat| &seat.label == preferred) {
                    return Err(ValidationError::UnknownSeat {
                        seat: preferred.clone(),
                        resource_type: request.resource_type.clone(),
                    }
                    .into());
                }
                vec![preferred.clone()]
            }
            None => {
                let occupied = self
                    .env
                    .reservations
                    .occupying_overlaps(self.query(
                        &request.resource_type,
                        request.time_slot,
                        range,
                        now,
                    ))
                    .await?;
                inventory
                    .into_iter()
                    .filter(|seat| !occupied.iter().any(|r| r.seat.as_ref() == Some(&seat.label)))
                    .map(|seat| seat.label)
                    .collect()
            }
        };

        for seat in candidates {
            let reservation = Self::draft(&request, range, seat.clone(), now);
            match self
                .env
                .reservations
                .insert_if_free(reservation, today, self.config.cash_window)
                .await?
            {
                InsertOutcome::Inserted(reservation) => return Ok(reservation),
                InsertOutcome::ActiveMembership { existing } => {
                    return Err(ConflictError::ActiveMembershipExists {
                        reservation_id: existing.id,
                    }
                    .into());
                }
                InsertOutcome::SeatTaken { holder } => {
                    if request.preferred_seat.is_some() {
                        return Err(ConflictError::SeatTaken {
                            seat,
                            occupied_by: holder.holder_name,
                            conflicting_range: holder.range,
                        }
                        .into());
                    }
                    tracing::debug!(
                        %seat,
                        holder = %holder.id,
                        "Seat taken concurrently, trying next"
                    );
                }
            }
        }

        Err(ConflictError::NoCapacity {
            resource_type: request.resource_type,
            time_slot: request.time_slot,
            range,
        }
        .into())
    }

    fn query(
        &self,
        resource_type: &ResourceType,
        time_slot: TimeSlot,
        range: DateRange,
        now: DateTime<Utc>,
    ) -> OccupancyQuery {
        OccupancyQuery {
            resource_type: resource_type.clone(),
            time_slot,
            range,
            now,
            cash_window: self.config.cash_window,
        }
    }

    fn draft(
        request: &BookingRequest,
        range: DateRange,
        seat: SeatLabel,
        now: DateTime<Utc>,
    ) -> Reservation {
        Reservation {
            id: ReservationId::new(),
            user_id: request.user_id,
            holder_name: request.holder_name.trim().to_string(),
            resource_type: request.resource_type.clone(),
            time_slot: request.time_slot,
            range,
            seat: Some(seat),
            amount: request.amount,
            payment_method: request.payment_method,
            payment_status: request.payment_method.initial_status(),
            lifecycle: LifecycleStatus::NotYetActive,
            external_reference: None,
            note: None,
            confirmed_by: None,
            confirmed_at: None,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Seats held over `range`, ordered by seat then start date.
    ///
    /// # Errors
    ///
    /// [`EngineError::StorageUnavailable`] if storage fails.
    pub async fn occupancy(
        &self,
        resource_type: ResourceType,
        time_slot: TimeSlot,
        range: DateRange,
    ) -> Result<Vec<OccupiedSeat>> {
        let now = self.env.clock.now();
        let mut occupied: Vec<OccupiedSeat> = self
            .env
            .reservations
            .occupying_overlaps(self.query(&resource_type, time_slot, range, now))
            .await?
            .into_iter()
            .filter_map(|r| {
                Some(OccupiedSeat {
                    seat: r.seat?,
                    holder_name: r.holder_name,
                    range: r.range,
                    reservation_id: r.id,
                    payment_status: r.payment_status,
                })
            })
            .collect();
        occupied.sort_by(|a, b| (&a.seat, a.range.start()).cmp(&(&b.seat, b.range.start())));
        Ok(occupied)
    }

    /// Register seats for a resource type. Existing labels keep their
    /// bookings and take the new class. Returns how many labels were new.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotPermitted`] unless `actor` is an admin, or storage errors.
    pub async fn initialize_seats(
        &self,
        actor: Actor,
        resource_type: ResourceType,
        seats: Vec<(SeatLabel, SeatClass)>,
    ) -> Result<usize> {
        if !actor.is_admin() {
            return Err(EngineError::NotPermitted {
                action: "initialize seats",
            });
        }
        let requested = seats.len();
        let seats: Vec<Seat> = seats
            .into_iter()
            .map(|(label, class)| Seat {
                resource_type: resource_type.clone(),
                label,
                class,
            })
            .collect();
        let added = self.env.reservations.upsert_seats(seats).await?;
        tracing::info!(
            admin = %actor.user_id,
            %resource_type,
            requested,
            added,
            "Seat inventory initialized"
        );
        Ok(added)
    }
}
