//! Streaming entitlement tracker.
//!
//! Entitlements are granted after payment confirmation and never mutated;
//! access is recomputed from the clock on every check.

use crate::error::EntitlementError;
use marquee_core::entitlement::{EntitlementKind, EntitlementStore, StreamingEntitlement};
use marquee_core::environment::Clock;
use marquee_core::types::{MovieId, UserId};
use marquee_runtime::metrics::EntitlementMetrics;
use std::sync::Arc;

/// Grants and checks rent/buy access.
#[derive(Clone)]
pub struct EntitlementTracker {
    store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
}

impl EntitlementTracker {
    /// Create a tracker over `store`
    #[must_use]
    pub fn new(store: Arc<dyn EntitlementStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record access purchased now.
    ///
    /// A purchase already on record is kept: renting a movie the user owns
    /// returns the existing purchase unchanged.
    ///
    /// # Errors
    ///
    /// - [`EntitlementError::InvalidRentDuration`] for a zero-day rental
    /// - [`EntitlementError::Store`] if the store fails
    #[tracing::instrument(skip(self, kind), fields(kind = kind.label()))]
    pub async fn grant(
        &self,
        user_id: UserId,
        movie_id: MovieId,
        kind: EntitlementKind,
    ) -> Result<StreamingEntitlement, EntitlementError> {
        if let EntitlementKind::Rent { days: 0 } = kind {
            return Err(EntitlementError::InvalidRentDuration(0));
        }

        let entitlement = StreamingEntitlement {
            user_id,
            movie_id,
            kind,
            purchased_at: self.clock.now(),
        };
        let in_force = self.store.record_entitlement(entitlement.clone()).await?;
        if in_force != entitlement {
            tracing::debug!(%user_id, %movie_id, "Movie already owned, keeping purchase");
            return Ok(in_force);
        }
        EntitlementMetrics::record_grant(kind.label());
        tracing::info!(%user_id, %movie_id, "Entitlement granted");
        Ok(in_force)
    }

    /// Whether `entitlement` allows playback now
    #[must_use]
    pub fn has_access(&self, entitlement: &StreamingEntitlement) -> bool {
        entitlement.has_access(self.clock.now())
    }

    /// Days of rental left now; 0 for purchases
    #[must_use]
    pub fn remaining_days(&self, entitlement: &StreamingEntitlement) -> u32 {
        entitlement.remaining_days(self.clock.now())
    }

    /// Look up the user's entitlement and check it against the clock.
    ///
    /// No entitlement means no access.
    ///
    /// # Errors
    ///
    /// Returns [`EntitlementError::Store`] if the store cannot be read.
    #[tracing::instrument(skip(self))]
    pub async fn check_access(&self, user_id: UserId, movie_id: MovieId) -> Result<bool, EntitlementError> {
        let entitlement = self.store.fetch_entitlement(user_id, movie_id).await?;
        let granted = entitlement.as_ref().is_some_and(|e| self.has_access(e));
        EntitlementMetrics::record_access_check(granted);
        tracing::debug!(granted, "Access checked");
        Ok(granted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use marquee_testing::{test_clock, InMemoryEntitlementStore, ManualClock};

    fn tracker(clock: Arc<ManualClock>) -> (EntitlementTracker, Arc<InMemoryEntitlementStore>) {
        let store = Arc::new(InMemoryEntitlementStore::new());
        (EntitlementTracker::new(store.clone(), clock), store)
    }

    #[tokio::test]
    async fn rental_expires_after_its_days() {
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let (tracker, _) = tracker(clock.clone());
        let (user, movie) = (UserId::new(), MovieId::new());

        let rent = tracker
            .grant(user, movie, EntitlementKind::Rent { days: 3 })
            .await
            .unwrap();
        assert_eq!(tracker.remaining_days(&rent), 3);

        clock.advance(TimeDelta::days(2));
        assert!(tracker.check_access(user, movie).await.unwrap());
        assert_eq!(tracker.remaining_days(&rent), 1);

        clock.advance(TimeDelta::days(1));
        assert!(!tracker.check_access(user, movie).await.unwrap());
        assert_eq!(tracker.remaining_days(&rent), 0);
    }

    #[tokio::test]
    async fn zero_day_rental_is_refused() {
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let (tracker, store) = tracker(clock);

        let result = tracker
            .grant(UserId::new(), MovieId::new(), EntitlementKind::Rent { days: 0 })
            .await;

        assert_eq!(result, Err(EntitlementError::InvalidRentDuration(0)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn renting_an_owned_movie_keeps_the_purchase() {
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let (tracker, _) = tracker(clock.clone());
        let (user, movie) = (UserId::new(), MovieId::new());

        tracker.grant(user, movie, EntitlementKind::Buy).await.unwrap();
        let second = tracker
            .grant(user, movie, EntitlementKind::Rent { days: 2 })
            .await
            .unwrap();
        assert_eq!(second.kind, EntitlementKind::Buy);

        clock.advance(TimeDelta::days(400));
        assert!(tracker.check_access(user, movie).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_rent_and_buy_leave_the_purchase() {
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let (tracker, store) = tracker(clock);
        let (user, movie) = (UserId::new(), MovieId::new());

        let (bought, rented) = tokio::join!(
            tracker.grant(user, movie, EntitlementKind::Buy),
            tracker.grant(user, movie, EntitlementKind::Rent { days: 2 }),
        );
        assert_eq!(bought.unwrap().kind, EntitlementKind::Buy);
        assert!(rented.is_ok());

        let stored = store.fetch_entitlement(user, movie).await.unwrap().unwrap();
        assert_eq!(stored.kind, EntitlementKind::Buy);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn no_entitlement_means_no_access() {
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let (tracker, _) = tracker(clock);
        assert!(!tracker.check_access(UserId::new(), MovieId::new()).await.unwrap());
    }
}
