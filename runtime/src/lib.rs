//! # Studyhall Runtime
//!
//! Services of the reservation and membership engine.
//!
//! ## Core Components
//!
//! - **`ReservationAllocator`**: validates bookings and binds a free seat
//! - **`SequenceIssuer`**: issues each user one `YYYYMM` + sequence identifier
//! - **`PaymentWorkflow`**: payment callbacks, cash collection, cancellation
//! - **`LifecycleSweeper`**: periodic, idempotent time-driven transitions
//! - **`MembershipEngine`**: facade wiring the above over one environment
//!
//! ## Example
//!
//! ```ignore
//! use studyhall_runtime::{AllocatorConfig, EngineEnvironment, MembershipEngine};
//! use studyhall_runtime::retry::RetryPolicy;
//!
//! let env = EngineEnvironment::with_store(clock, store, notifier);
//! let engine = MembershipEngine::new(env, AllocatorConfig::default(), RetryPolicy::default());
//!
//! let reservation = engine.allocate(request).await?;
//! let identity = engine.issue_identifier(reservation.user_id).await?;
//! ```

/// Seat allocation and occupancy
pub mod allocator;

/// Environment and engine facade
pub mod engine;

/// Membership identifier issuance
pub mod issuer;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

/// Periodic lifecycle sweeper
pub mod sweeper;

/// Payment, cash collection and cancellation
pub mod workflow;

pub use allocator::{AllocatorConfig, BookingRequest, OccupiedSeat, ReservationAllocator};
pub use engine::{EngineEnvironment, MembershipEngine};
pub use issuer::SequenceIssuer;
pub use sweeper::{LifecycleSweeper, SweepReport, SweeperConfig, SweeperStatus};
pub use workflow::{PaymentOutcome, PaymentWorkflow};
