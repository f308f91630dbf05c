//! Injected dependencies and the engine facade.
//!
//! [`EngineEnvironment`] bundles the clock, stores and notifier as trait
//! objects. [`MembershipEngine`] wires the allocator, issuer and payment
//! workflow over one environment and exposes the operations collaborators call.

use crate::allocator::{AllocatorConfig, BookingRequest, OccupiedSeat, ReservationAllocator};
use crate::issuer::SequenceIssuer;
use crate::retry::RetryPolicy;
use crate::sweeper::{LifecycleSweeper, SweeperConfig};
use crate::workflow::{PaymentOutcome, PaymentWorkflow};
use chrono::Duration;
use std::sync::Arc;
use studyhall_core::environment::Clock;
use studyhall_core::error::Result;
use studyhall_core::membership::MembershipIdentity;
use studyhall_core::notify::{Notification, Notifier};
use studyhall_core::store::{DraftStore, MembershipStore, ReservationStore};
use studyhall_core::types::{
    Actor, DateRange, RegistrationDraft, Reservation, ReservationId, ResourceType, SeatClass,
    SeatLabel, TimeSlot, UserId,
};

/// Dependencies every engine service runs against.
#[derive(Clone)]
pub struct EngineEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Reservation records and seat inventory
    pub reservations: Arc<dyn ReservationStore>,
    /// Identifiers and period counters
    pub memberships: Arc<dyn MembershipStore>,
    /// Registration drafts
    pub drafts: Arc<dyn DraftStore>,
    /// Outbound notifications
    pub notifier: Arc<dyn Notifier>,
}

impl EngineEnvironment {
    /// Environment backed by one store implementing every storage trait.
    #[must_use]
    pub fn with_store<S>(clock: Arc<dyn Clock>, store: Arc<S>, notifier: Arc<dyn Notifier>) -> Self
    where
        S: ReservationStore + MembershipStore + DraftStore + 'static,
    {
        Self {
            clock,
            reservations: Arc::clone(&store) as Arc<dyn ReservationStore>,
            memberships: Arc::clone(&store) as Arc<dyn MembershipStore>,
            drafts: store as Arc<dyn DraftStore>,
            notifier,
        }
    }

    /// Deliver a notification, logging instead of failing.
    pub(crate) async fn notify(&self, recipient: UserId, notification: Notification) {
        let kind = notification.kind();
        if let Err(error) = self.notifier.notify(recipient, notification).await {
            tracing::warn!(%recipient, kind, %error, "Notification not delivered");
        }
    }
}

impl std::fmt::Debug for EngineEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEnvironment").finish_non_exhaustive()
    }
}

/// The operations the reservation and membership core exposes.
#[derive(Clone, Debug)]
pub struct MembershipEngine {
    env: EngineEnvironment,
    allocator: ReservationAllocator,
    issuer: SequenceIssuer,
    workflow: PaymentWorkflow,
}

impl MembershipEngine {
    /// Wire the services over `env`.
    #[must_use]
    pub fn new(env: EngineEnvironment, config: AllocatorConfig, retry: RetryPolicy) -> Self {
        let issuer = SequenceIssuer::new(env.clone(), retry);
        let allocator = ReservationAllocator::new(env.clone(), config.clone());
        let workflow = PaymentWorkflow::new(env.clone(), issuer.clone(), config.cash_window);
        Self {
            env,
            allocator,
            issuer,
            workflow,
        }
    }

    /// Environment the engine runs against
    #[must_use]
    pub const fn environment(&self) -> &EngineEnvironment {
        &self.env
    }

    /// A sweeper sharing this engine's environment and issuer.
    #[must_use]
    pub fn sweeper(&self, config: SweeperConfig) -> LifecycleSweeper {
        LifecycleSweeper::new(self.env.clone(), self.issuer.clone(), config)
    }

    /// Book a seat. See [`ReservationAllocator::allocate`].
    ///
    /// # Errors
    ///
    /// Validation, conflict or storage errors.
    pub async fn allocate(&self, request: BookingRequest) -> Result<Reservation> {
        self.allocator.allocate(request).await
    }

    /// Issue (or return) the user's membership identifier.
    ///
    /// # Errors
    ///
    /// `SequenceExhausted` or `StorageUnavailable`; both retryable.
    pub async fn issue_identifier(&self, user_id: UserId) -> Result<MembershipIdentity> {
        self.issuer.issue_identifier(user_id).await
    }

    /// Admin confirms cash was collected.
    ///
    /// # Errors
    ///
    /// `NotPermitted`, `NotFound`, `AlreadyFinalized`, `InvalidTransition` or storage errors.
    pub async fn confirm_cash_collection(
        &self,
        reservation_id: ReservationId,
        admin: Actor,
        note: Option<String>,
    ) -> Result<Reservation> {
        self.workflow
            .confirm_cash_collection(reservation_id, admin, note)
            .await
    }

    /// Owner or admin cancels a booking that has not been paid.
    ///
    /// # Errors
    ///
    /// `NotPermitted`, `NotFound`, `InvalidTransition` or storage errors.
    pub async fn cancel(&self, reservation_id: ReservationId, actor: Actor) -> Result<Reservation> {
        self.workflow.cancel(reservation_id, actor).await
    }

    /// Payment gateway callback.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidTransition`, `SeatTaken` conflict or storage errors.
    pub async fn record_payment(
        &self,
        reservation_id: ReservationId,
        outcome: PaymentOutcome,
    ) -> Result<Reservation> {
        self.workflow.record_payment(reservation_id, outcome).await
    }

    /// Occupied seats over a range.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub async fn get_occupancy(
        &self,
        resource_type: ResourceType,
        time_slot: TimeSlot,
        range: DateRange,
    ) -> Result<Vec<OccupiedSeat>> {
        self.allocator
            .occupancy(resource_type, time_slot, range)
            .await
    }

    /// Admin sets up the seat inventory of a resource type.
    ///
    /// # Errors
    ///
    /// `NotPermitted` for non-admins, or storage errors.
    pub async fn initialize_seats(
        &self,
        actor: Actor,
        resource_type: ResourceType,
        seats: Vec<(SeatLabel, SeatClass)>,
    ) -> Result<usize> {
        self.allocator
            .initialize_seats(actor, resource_type, seats)
            .await
    }

    /// Record a registration draft that the sweeper purges after `ttl`.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub async fn open_registration_draft(
        &self,
        contact: impl Into<String>,
        ttl: Duration,
    ) -> Result<RegistrationDraft> {
        let draft = RegistrationDraft::new(contact, self.env.clock.now(), ttl);
        self.env.drafts.save_draft(draft.clone()).await?;
        tracing::debug!(
            draft_id = %draft.id,
            expires_at = %draft.expires_at,
            "Registration draft opened"
        );
        Ok(draft)
    }
}
