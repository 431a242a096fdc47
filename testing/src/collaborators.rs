//! In-memory collaborators: registration and entitlement stores, notifier,
//! movie catalog.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

use marquee_core::catalog::{CatalogError, MovieCatalog, MovieDetails};
use marquee_core::entitlement::{EntitlementKind, EntitlementStore, StreamingEntitlement};
use marquee_core::ledger::{LedgerError, StoreFuture};
use marquee_core::notify::{Notification, Notifier, NotifyError};
use marquee_core::registration::{
    RegistrationOutcome, RegistrationStore, RegistrationTransition,
};
use marquee_core::types::{
    MovieId, OwnerRegistrationRequest, RegistrationId, RequestStatus, Role, UserId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Notifier that records every delivery attempt.
///
/// Can be switched to fail, to check that a lost notification never undoes
/// the decision it reports.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Create a notifier that delivers successfully
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a notifier whose deliveries all fail
    #[must_use]
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.failing.store(true, Ordering::SeqCst);
        notifier
    }

    /// Notifications delivered so far (failed attempts excluded)
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) -> StoreFuture<'_, (), NotifyError> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(NotifyError::DeliveryFailed("push gateway unreachable".into()));
            }
            self.sent.lock().unwrap().push(notification);
            Ok(())
        })
    }
}

/// Movie catalog backed by a fixed map.
#[derive(Clone, Debug, Default)]
pub struct StaticMovieCatalog {
    movies: Arc<Mutex<HashMap<MovieId, MovieDetails>>>,
}

impl StaticMovieCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a movie and return its id
    pub fn add(&self, title: &str, runtime_minutes: u32) -> MovieId {
        let id = MovieId::new();
        self.movies.lock().unwrap().insert(
            id,
            MovieDetails {
                title: title.to_string(),
                runtime_minutes,
            },
        );
        id
    }
}

impl MovieCatalog for StaticMovieCatalog {
    fn movie_details(&self, movie_id: MovieId) -> StoreFuture<'_, MovieDetails, CatalogError> {
        Box::pin(async move {
            self.movies
                .lock()
                .unwrap()
                .get(&movie_id)
                .cloned()
                .ok_or(CatalogError::MovieNotFound(movie_id))
        })
    }
}

#[derive(Debug, Default)]
struct RegistrationState {
    registrations: HashMap<RegistrationId, OwnerRegistrationRequest>,
    submission_order: Vec<RegistrationId>,
    roles: HashMap<UserId, Role>,
}

/// In-memory registration store with user roles.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRegistrationStore {
    state: Arc<Mutex<RegistrationState>>,
}

impl InMemoryRegistrationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a role directly, e.g. to seed approvers
    pub fn grant_role(&self, user_id: UserId, role: Role) {
        self.state.lock().unwrap().roles.insert(user_id, role);
    }

    fn apply_transition(
        &self,
        registration_id: RegistrationId,
        transition: RegistrationTransition,
    ) -> Result<RegistrationOutcome, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let registration = state
            .registrations
            .get_mut(&registration_id)
            .ok_or_else(|| LedgerError::RequestNotFound(registration_id.to_string()))?;

        if !registration.status.is_pending() {
            return Ok(RegistrationOutcome::AlreadyDecided(registration.status.clone()));
        }

        registration.status = transition.target_status();
        let promote = matches!(registration.status, RequestStatus::Approved(_));

        let decided = registration.clone();
        if promote {
            // Promotion never demotes an admin
            let role = state.roles.entry(decided.submitted_by).or_insert(Role::Viewer);
            if *role == Role::Viewer {
                *role = Role::TheatreOwner;
            }
        }
        Ok(RegistrationOutcome::Committed(decided))
    }
}

impl RegistrationStore for InMemoryRegistrationStore {
    fn create_registration(
        &self,
        registration: OwnerRegistrationRequest,
    ) -> StoreFuture<'_, RegistrationId, LedgerError> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let id = registration.id;
            if state.registrations.insert(id, registration).is_none() {
                state.submission_order.push(id);
            }
            Ok(id)
        })
    }

    fn load_registration(
        &self,
        registration_id: RegistrationId,
    ) -> StoreFuture<'_, Option<OwnerRegistrationRequest>, LedgerError> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .unwrap()
                .registrations
                .get(&registration_id)
                .cloned())
        })
    }

    fn list_pending_registrations(
        &self,
    ) -> StoreFuture<'_, Vec<OwnerRegistrationRequest>, LedgerError> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            let mut pending: Vec<_> = state
                .submission_order
                .iter()
                .filter_map(|id| state.registrations.get(id))
                .filter(|registration| registration.status.is_pending())
                .cloned()
                .collect();
            pending.sort_by_key(|registration| registration.submitted_at);
            Ok(pending)
        })
    }

    fn transition_registration(
        &self,
        registration_id: RegistrationId,
        transition: RegistrationTransition,
    ) -> StoreFuture<'_, RegistrationOutcome, LedgerError> {
        Box::pin(async move { self.apply_transition(registration_id, transition) })
    }

    fn role_of(&self, user_id: UserId) -> StoreFuture<'_, Role, LedgerError> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .unwrap()
                .roles
                .get(&user_id)
                .copied()
                .unwrap_or(Role::Viewer))
        })
    }
}

/// In-memory entitlement store keyed by (user, movie).
#[derive(Clone, Debug, Default)]
pub struct InMemoryEntitlementStore {
    entitlements: Arc<Mutex<HashMap<(UserId, MovieId), StreamingEntitlement>>>,
}

impl InMemoryEntitlementStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entitlements
    #[must_use]
    pub fn len(&self) -> usize {
        self.entitlements.lock().unwrap().len()
    }

    /// Whether no entitlement is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entitlements.lock().unwrap().is_empty()
    }
}

impl EntitlementStore for InMemoryEntitlementStore {
    fn record_entitlement(
        &self,
        entitlement: StreamingEntitlement,
    ) -> StoreFuture<'_, StreamingEntitlement, LedgerError> {
        Box::pin(async move {
            let mut entitlements = self.entitlements.lock().unwrap();
            let slot = entitlements
                .entry((entitlement.user_id, entitlement.movie_id))
                .or_insert_with(|| entitlement.clone());
            if slot.kind != EntitlementKind::Buy {
                *slot = entitlement;
            }
            Ok(slot.clone())
        })
    }

    fn fetch_entitlement(
        &self,
        user_id: UserId,
        movie_id: MovieId,
    ) -> StoreFuture<'_, Option<StreamingEntitlement>, LedgerError> {
        Box::pin(async move {
            Ok(self
                .entitlements
                .lock()
                .unwrap()
                .get(&(user_id, movie_id))
                .cloned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::types::{DecisionId, OwnerProfile};
    use chrono::Utc;

    fn profile() -> OwnerProfile {
        OwnerProfile {
            business_name: "Lakeside Cinemas".to_string(),
            contact_name: "R. Okafor".to_string(),
            contact_email: "ops@lakeside.example".to_string(),
            phone: "+1 555 0100".to_string(),
            city: "Duluth".to_string(),
        }
    }

    #[tokio::test]
    async fn approval_promotes_submitter() {
        let store = InMemoryRegistrationStore::new();
        let owner = UserId::new();
        let registration = OwnerRegistrationRequest::pending(owner, profile(), Utc::now());
        let id = store.create_registration(registration).await.unwrap();
        assert_eq!(store.role_of(owner).await.unwrap(), Role::Viewer);

        let transition = RegistrationTransition::Approve {
            approved_by: UserId::new(),
            approved_at: Utc::now(),
            decision_id: DecisionId::new(),
        };
        let outcome = store.transition_registration(id, transition.clone()).await.unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Committed(_)));
        assert_eq!(store.role_of(owner).await.unwrap(), Role::TheatreOwner);

        let again = store.transition_registration(id, transition).await.unwrap();
        assert!(matches!(
            again,
            RegistrationOutcome::AlreadyDecided(RequestStatus::Approved(_))
        ));
    }

    #[tokio::test]
    async fn recorded_purchase_is_never_replaced_by_a_rental() {
        let store = InMemoryEntitlementStore::new();
        let (user_id, movie_id) = (UserId::new(), MovieId::new());
        let rental = |days| StreamingEntitlement {
            user_id,
            movie_id,
            kind: EntitlementKind::Rent { days },
            purchased_at: Utc::now(),
        };

        let first = store.record_entitlement(rental(2)).await.unwrap();
        assert_eq!(first.kind, EntitlementKind::Rent { days: 2 });

        let bought = store
            .record_entitlement(StreamingEntitlement {
                kind: EntitlementKind::Buy,
                ..rental(0)
            })
            .await
            .unwrap();
        assert_eq!(bought.kind, EntitlementKind::Buy);

        let kept = store.record_entitlement(rental(7)).await.unwrap();
        assert_eq!(kept, bought);
        assert_eq!(
            store.fetch_entitlement(user_id, movie_id).await.unwrap(),
            Some(bought)
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn failing_notifier_records_nothing() {
        let notifier = RecordingNotifier::failing();
        let result = notifier
            .notify(Notification {
                recipient: UserId::new(),
                subject: marquee_core::notify::NotificationSubject::Registration(
                    RegistrationId::new(),
                ),
                decision: marquee_core::notify::DecisionNotice::Approved,
            })
            .await;
        assert!(result.is_err());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn unknown_movie_is_reported() {
        let catalog = StaticMovieCatalog::new();
        let known = catalog.add("Arrival", 116);
        assert_eq!(catalog.movie_details(known).await.unwrap().runtime_minutes, 116);

        let missing = MovieId::new();
        assert_eq!(
            catalog.movie_details(missing).await,
            Err(CatalogError::MovieNotFound(missing))
        );
    }
}
