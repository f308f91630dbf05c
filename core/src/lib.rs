//! # Studyhall Core
//!
//! Domain types, status rules and storage traits for the studyhall
//! reservation and membership engine.
//!
//! ## Core Concepts
//!
//! - **Reservation**: one seat, one time slot, one inclusive date range
//! - **Occupying**: a reservation that blocks its seat for conflict purposes
//!   (`completed`, `cash_collected`, or `cash_pending` inside the 48-hour window)
//! - **`StatusChange`**: a guarded transition a store applies atomically
//! - **Membership identity**: `YYYYMM` + zero-padded sequence, issued once per user
//! - **Environment**: clock, stores and notifier injected as trait objects
//!
//! ## Architecture Principles
//!
//! - Check-and-write happens inside the store, never across an `await` in the engine
//! - Stores hand out read-only snapshots
//! - Calendar arithmetic is UTC
//!
//! ## Example
//!
//! ```
//! use studyhall_core::types::{DateRange, DurationCode};
//! use chrono::NaiveDate;
//!
//! let start = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
//! let one_month = DurationCode::parse("1m").unwrap();
//! let end = one_month.end_for(start).unwrap();
//! assert_eq!(end, NaiveDate::from_ymd_opt(2025, 2, 9).unwrap());
//! assert!(DateRange::new(start, end).is_ok());
//! ```

pub mod error;
pub mod membership;
pub mod notify;
pub mod status;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{ConflictError, ConflictKind, EngineError, Result, StoreError, ValidationError};
pub use membership::{MembershipIdentity, PeriodKey};
pub use status::StatusChange;

/// Environment module - injected dependencies
///
/// All external dependencies are abstracted behind traits and injected as
/// `Arc<dyn _>` so tests can swap in deterministic implementations.
pub mod environment {
    use chrono::{DateTime, NaiveDate, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use studyhall_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// assert_eq!(clock.today(), clock.now().date_naive());
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;

        /// Current UTC calendar day
        fn today(&self) -> NaiveDate {
            self.now().date_naive()
        }
    }

    /// Production clock
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
