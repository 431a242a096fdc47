//! # Marquee Testing
//!
//! Testing utilities for the Marquee scheduling engines.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - The [`ReducerTest`] given/when/then harness
//! - In-memory stores honouring the same compare-and-set contracts as the
//!   Postgres implementations
//! - Fault injection ([`FlakyLedger`]) and recording collaborators
//! - proptest strategies for schedule inputs
//!
//! ## Example
//!
//! ```ignore
//! use marquee_testing::{test_clock, InMemoryLedger, RecordingNotifier};
//!
//! #[tokio::test]
//! async fn approval_publishes_showtime() {
//!     let ledger = Arc::new(InMemoryLedger::new());
//!     let workflow = ApprovalWorkflow::new(environment(&ledger));
//!
//!     let receipt = workflow.propose(proposal()).await.unwrap();
//!     workflow.approve(receipt.request_id, admin()).await.unwrap();
//!
//!     assert_eq!(ledger.published().len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use marquee_core::environment::Clock;

pub mod collaborators;
pub mod ledger;

/// Mock implementations of the clock.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use marquee_testing::mocks::FixedClock;
    /// use marquee_core::environment::Clock;
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

    /// Clock that only moves when told to.
    ///
    /// Entitlement expiry is a function of elapsed time, so tests grant at one
    /// instant and check access after [`ManualClock::advance`].
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start the clock at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward (or backward, for a negative delta)
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, delta: chrono::TimeDelta) {
            let mut time = self.time.lock().unwrap();
            *time += delta;
        }

        /// Jump to an absolute instant
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, instant: DateTime<Utc>) {
            *self.time.lock().unwrap() = instant;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2024-05-01 09:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2024-05-01T09:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// proptest strategies for schedule inputs.
pub mod properties {
    use chrono::NaiveTime;
    use proptest::prelude::*;

    /// Start times on a five-minute grid within one day
    pub fn start_time() -> impl Strategy<Value = NaiveTime> {
        (0u32..288).prop_map(|step| {
            let minutes = step * 5;
            NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).unwrap_or(NaiveTime::MIN)
        })
    }

    /// Plausible feature runtimes in minutes
    pub fn runtime_minutes() -> impl Strategy<Value = u32> {
        60u32..=210
    }
}

// Re-export commonly used items
pub use collaborators::{
    InMemoryEntitlementStore, InMemoryRegistrationStore, RecordingNotifier, StaticMovieCatalog,
};
pub use ledger::{FlakyLedger, InMemoryLedger};
pub use mocks::{test_clock, FixedClock, ManualClock};
pub use reducer_test::ReducerTest;
