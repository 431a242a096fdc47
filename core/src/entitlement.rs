//! Streaming entitlements.
//!
//! An entitlement is created once, after payment confirmation, and never
//! mutated. Expiry is a pure function of elapsed time: a rental grants access
//! while whole days elapsed since purchase are fewer than its duration, a
//! purchase grants access forever.

use crate::ledger::{LedgerError, StoreFuture};
use crate::types::{MovieId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rent or buy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntitlementKind {
    /// Time-boxed access
    Rent {
        /// Days of access from purchase
        days: u32,
    },
    /// Permanent access
    Buy,
}

impl EntitlementKind {
    /// Stable storage label
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Rent { .. } => "rent",
            Self::Buy => "buy",
        }
    }

    /// Rental duration, `None` for purchases
    #[must_use]
    pub const fn rent_duration_days(&self) -> Option<u32> {
        match self {
            Self::Rent { days } => Some(*days),
            Self::Buy => None,
        }
    }
}

/// A user's access right to a streamed movie
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingEntitlement {
    /// Entitled user
    pub user_id: UserId,
    /// Movie the entitlement covers
    pub movie_id: MovieId,
    /// Rent or buy
    pub kind: EntitlementKind,
    /// When payment was confirmed
    pub purchased_at: DateTime<Utc>,
}

impl StreamingEntitlement {
    /// Whole days elapsed since purchase, never negative.
    #[must_use]
    pub fn elapsed_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.purchased_at).num_days().max(0)
    }

    /// Days of access left.
    ///
    /// `max(0, days - elapsed)` for rentals; purchases report 0 because the
    /// figure is irrelevant to them (see [`Self::has_access`]).
    #[must_use]
    pub fn remaining_days(&self, now: DateTime<Utc>) -> u32 {
        match self.kind {
            EntitlementKind::Rent { days } => {
                let remaining = i64::from(days) - self.elapsed_days(now);
                u32::try_from(remaining.max(0)).unwrap_or(0)
            },
            EntitlementKind::Buy => 0,
        }
    }

    /// Whether playback is allowed at `now`
    #[must_use]
    pub fn has_access(&self, now: DateTime<Utc>) -> bool {
        match self.kind {
            EntitlementKind::Buy => true,
            EntitlementKind::Rent { .. } => self.remaining_days(now) > 0,
        }
    }
}

/// Persistence for entitlements, keyed by (user, movie).
pub trait EntitlementStore: Send + Sync {
    /// Persist an entitlement and return the one in force for its key.
    ///
    /// An earlier rental is replaced. A purchase on record is kept as is and
    /// returned instead; the check and the write are one atomic step, so
    /// concurrent grants cannot downgrade a purchase.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the write fails.
    fn record_entitlement(
        &self,
        entitlement: StreamingEntitlement,
    ) -> StoreFuture<'_, StreamingEntitlement, LedgerError>;

    /// Latest entitlement for (user, movie).
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the store cannot be read.
    fn fetch_entitlement(
        &self,
        user_id: UserId,
        movie_id: MovieId,
    ) -> StoreFuture<'_, Option<StreamingEntitlement>, LedgerError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap()
    }

    fn rental(days: u32) -> StreamingEntitlement {
        StreamingEntitlement {
            user_id: UserId::new(),
            movie_id: MovieId::new(),
            kind: EntitlementKind::Rent { days },
            purchased_at: t0(),
        }
    }

    #[test]
    fn three_day_rental_expires_on_day_three() {
        let rent = rental(3);
        assert_eq!(rent.remaining_days(t0()), 3);
        assert_eq!(rent.remaining_days(t0() + Duration::days(2)), 1);
        assert!(rent.has_access(t0() + Duration::days(2)));
        assert_eq!(rent.remaining_days(t0() + Duration::days(3)), 0);
        assert!(!rent.has_access(t0() + Duration::days(3)));
    }

    #[test]
    fn access_holds_until_the_last_instant() {
        let rent = rental(3);
        let almost = t0() + Duration::days(3) - Duration::seconds(1);
        assert_eq!(rent.remaining_days(almost), 1);
        assert!(rent.has_access(almost));
    }

    #[test]
    fn clock_skew_before_purchase_counts_as_zero_elapsed() {
        let rent = rental(2);
        assert_eq!(rent.remaining_days(t0() - Duration::hours(5)), 2);
    }

    #[test]
    fn purchase_never_expires() {
        let bought = StreamingEntitlement {
            kind: EntitlementKind::Buy,
            ..rental(1)
        };
        assert!(bought.has_access(t0() + Duration::days(10_000)));
        assert_eq!(bought.kind.rent_duration_days(), None);
    }

    proptest! {
        #[test]
        fn remaining_days_never_increase(days in 1u32..60, a in 0i64..10_000, b in 0i64..10_000) {
            let rent = rental(days);
            let (earlier, later) = if a <= b { (a, b) } else { (b, a) };
            let r1 = rent.remaining_days(t0() + Duration::hours(earlier));
            let r2 = rent.remaining_days(t0() + Duration::hours(later));
            prop_assert!(r2 <= r1);
        }

        #[test]
        fn rental_reaches_zero_exactly_at_its_duration(days in 1u32..60) {
            let rent = rental(days);
            let expiry = t0() + Duration::days(i64::from(days));
            prop_assert_eq!(rent.remaining_days(expiry), 0);
            prop_assert_eq!(rent.remaining_days(expiry - Duration::seconds(1)), 1);
        }
    }
}
