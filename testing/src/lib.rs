//! # Studyhall Testing
//!
//! Testing utilities for the studyhall reservation engine.
//!
//! This crate provides:
//! - Deterministic clocks (`FixedClock`, `ManualClock`)
//! - `InMemoryStore`, implementing every storage trait with fault injection
//! - `RecordingNotifier`, capturing notifications
//! - Fixtures and proptest strategies for domain types
//!
//! ## Example
//!
//! ```
//! use studyhall_testing::{InMemoryStore, ManualClock, test_clock};
//! use studyhall_core::environment::Clock;
//! use chrono::Duration;
//!
//! let clock = ManualClock::new(test_clock().now());
//! clock.advance(Duration::hours(49));
//! let store = InMemoryStore::new();
//! assert_eq!(store.write_count(), 0);
//! ```

use chrono::{DateTime, Utc};
use studyhall_core::environment::Clock;

pub mod fixtures;
mod notifier;
mod store;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use studyhall_testing::mocks::FixedClock;
    /// use studyhall_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock a test moves forward explicitly
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the engine.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            let mut guard = self
                .time
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard = time;
        }

        /// Move forward by `by`
        pub fn advance(&self, by: Duration) {
            let mut guard = self
                .time
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .time
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use chrono::{Duration, NaiveDate};
    use proptest::prelude::*;
    use studyhall_core::types::DateRange;

    /// Ranges starting within `horizon_days` of `base`, at most `max_len_days` long.
    pub fn date_range(
        base: NaiveDate,
        horizon_days: i64,
        max_len_days: i64,
    ) -> impl Strategy<Value = DateRange> {
        (0..horizon_days, 0..max_len_days).prop_filter_map(
            "range leaves the calendar",
            move |(offset, len)| {
                let start = base + Duration::days(offset);
                DateRange::new(start, start + Duration::days(len)).ok()
            },
        )
    }
}

/// Install a `tracing` subscriber writing to the test harness output.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use notifier::RecordingNotifier;
pub use store::InMemoryStore;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(test_clock().now());
        let handle = clock.clone();
        handle.advance(Duration::hours(49));
        assert_eq!(clock.now(), test_clock().now() + Duration::hours(49));
        assert_eq!(clock.today().to_string(), "2025-01-03");
    }
}
