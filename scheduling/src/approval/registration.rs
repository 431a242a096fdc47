//! Theatre-owner registration approval.
//!
//! Same lifecycle as showtime requests without the conflict recheck: approval
//! promotes the submitter to theatre owner inside the store's atomic unit.

use super::{notice_for, notify_submitter, Decision};
use crate::error::ApprovalError;
use marquee_core::environment::Clock;
use marquee_core::ledger::LedgerError;
use marquee_core::notify::{Notification, NotificationSubject, Notifier};
use marquee_core::registration::{RegistrationOutcome, RegistrationStore, RegistrationTransition};
use marquee_core::types::{
    DecisionId, OwnerRegistrationRequest, RegistrationId, RequestStatus, UserId,
};
use marquee_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
use marquee_runtime::metrics::ApprovalMetrics;
use marquee_runtime::retry::{retry_with_predicate, RetryPolicy};
use marquee_runtime::{run_detached, DriverError};
use std::sync::Arc;

/// Actions for the registration approval reducer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationAction {
    // Commands
    /// Create a pending registration
    Submit {
        /// Registration to create, status `Pending`
        registration: OwnerRegistrationRequest,
    },
    /// Approve and promote
    Approve {
        /// Registration to approve
        registration_id: RegistrationId,
        /// Approver
        approver: UserId,
    },
    /// Reject with a reason
    Reject {
        /// Registration to reject
        registration_id: RegistrationId,
        /// Approver
        approver: UserId,
        /// Reason shown to the submitter
        reason: String,
    },

    // Feedback
    /// The registration was stored
    Submitted {
        /// Stored registration
        registration_id: RegistrationId,
    },
    /// The registration to decide was read
    Loaded {
        /// Registration as stored
        registration: OwnerRegistrationRequest,
    },
    /// No registration exists with this id
    Missing {
        /// Requested id
        registration_id: RegistrationId,
    },
    /// The decision committed
    Committed {
        /// Registration in its decided state
        registration: OwnerRegistrationRequest,
    },
    /// Another decision committed first
    AlreadyDecided {
        /// Status that won
        status: RequestStatus,
    },
    /// A store call kept failing
    StoreFailed {
        /// Attempts made
        attempts: usize,
        /// Last error
        error: LedgerError,
    },
    /// The detached commit task died
    CommitAborted {
        /// Task failure
        error: DriverError,
    },
}

/// Successful result of a registration command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationResult {
    /// A pending registration was created
    Submitted(RegistrationId),
    /// A registration was approved or rejected
    Decided(OwnerRegistrationRequest),
}

/// Session state for one registration command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrationState {
    /// Decision being applied
    pub decision: Option<Decision>,
    /// Final result, set once
    pub outcome: Option<Result<RegistrationResult, ApprovalError>>,
}

/// Environment dependencies for the registration reducer
#[derive(Clone)]
pub struct RegistrationEnvironment {
    /// Registration and role store
    pub store: Arc<dyn RegistrationStore>,
    /// Submitter notifications
    pub notifier: Arc<dyn Notifier>,
    /// Clock for decision timestamps
    pub clock: Arc<dyn Clock>,
    /// Retry policy for store calls
    pub retry: RetryPolicy,
}

/// Reducer for owner registrations
#[derive(Clone, Debug, Default)]
pub struct RegistrationReducer;

type Effects = SmallVec<[Effect<RegistrationAction>; 4]>;

impl RegistrationReducer {
    /// Creates a new `RegistrationReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn finish(
        state: &mut RegistrationState,
        outcome: Result<RegistrationResult, ApprovalError>,
    ) -> Effects {
        state.outcome = Some(outcome);
        SmallVec::new()
    }

    fn store_failed(failure: marquee_runtime::retry::RetryFailure<LedgerError>) -> RegistrationAction {
        RegistrationAction::StoreFailed {
            attempts: failure.attempts,
            error: failure.error,
        }
    }

    fn create(env: &RegistrationEnvironment, registration: OwnerRegistrationRequest) -> Effect<RegistrationAction> {
        let store = Arc::clone(&env.store);
        let policy = env.retry.clone();
        Effect::future(async move {
            let created = retry_with_predicate(
                &policy,
                "create_registration",
                || store.create_registration(registration.clone()),
                LedgerError::is_transient,
            )
            .await;
            Some(created.map_or_else(Self::store_failed, |registration_id| {
                RegistrationAction::Submitted { registration_id }
            }))
        })
    }

    fn load(env: &RegistrationEnvironment, registration_id: RegistrationId) -> Effect<RegistrationAction> {
        let store = Arc::clone(&env.store);
        let policy = env.retry.clone();
        Effect::future(async move {
            let loaded = retry_with_predicate(
                &policy,
                "load_registration",
                || store.load_registration(registration_id),
                LedgerError::is_transient,
            )
            .await;
            Some(match loaded {
                Ok(Some(registration)) => RegistrationAction::Loaded { registration },
                Ok(None) => RegistrationAction::Missing { registration_id },
                Err(failure) => Self::store_failed(failure),
            })
        })
    }

    fn commit(
        env: &RegistrationEnvironment,
        registration: OwnerRegistrationRequest,
        transition: RegistrationTransition,
    ) -> Effect<RegistrationAction> {
        let store = Arc::clone(&env.store);
        let policy = env.retry.clone();
        Effect::future(async move {
            let settled = run_detached(async move {
                let result = retry_with_predicate(
                    &policy,
                    "transition_registration",
                    || store.transition_registration(registration.id, transition.clone()),
                    LedgerError::is_transient,
                )
                .await;
                match result {
                    Ok(RegistrationOutcome::Committed(registration)) => {
                        RegistrationAction::Committed { registration }
                    },
                    Ok(RegistrationOutcome::AlreadyDecided(status))
                        if transition.already_applied(&status) =>
                    {
                        let mut registration = registration;
                        registration.status = status;
                        RegistrationAction::Committed { registration }
                    },
                    Ok(RegistrationOutcome::AlreadyDecided(status)) => {
                        RegistrationAction::AlreadyDecided { status }
                    },
                    Err(failure) => Self::store_failed(failure),
                }
            })
            .await;
            Some(settled.unwrap_or_else(|error| RegistrationAction::CommitAborted { error }))
        })
    }
}

impl Reducer for RegistrationReducer {
    type State = RegistrationState;
    type Action = RegistrationAction;
    type Environment = RegistrationEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            RegistrationAction::Submit { registration } => {
                if !registration.status.is_pending() {
                    return Self::finish(
                        state,
                        Err(ApprovalError::InvalidTransition {
                            current: registration.status,
                        }),
                    );
                }
                smallvec![Self::create(env, registration)]
            },

            RegistrationAction::Approve {
                registration_id,
                approver,
            } => {
                state.decision = Some(Decision::Approve { approver });
                smallvec![Self::load(env, registration_id)]
            },

            RegistrationAction::Reject {
                registration_id,
                approver,
                reason,
            } => {
                if reason.trim().is_empty() {
                    return Self::finish(state, Err(ApprovalError::EmptyRejectionReason));
                }
                state.decision = Some(Decision::Reject { approver, reason });
                smallvec![Self::load(env, registration_id)]
            },

            RegistrationAction::Submitted { registration_id } => {
                ApprovalMetrics::record_submission("registration");
                tracing::info!(%registration_id, "Owner registration submitted");
                Self::finish(state, Ok(RegistrationResult::Submitted(registration_id)))
            },

            RegistrationAction::Loaded { registration } => {
                if !registration.status.is_pending() {
                    ApprovalMetrics::record_lost_race("registration");
                    return Self::finish(
                        state,
                        Err(ApprovalError::InvalidTransition {
                            current: registration.status,
                        }),
                    );
                }
                let now = env.clock.now();
                let transition = match &state.decision {
                    Some(Decision::Approve { approver }) => RegistrationTransition::Approve {
                        approved_by: *approver,
                        approved_at: now,
                        decision_id: DecisionId::new(),
                    },
                    Some(Decision::Reject { approver, reason }) => RegistrationTransition::Reject {
                        rejected_by: *approver,
                        rejected_at: now,
                        reason: reason.clone(),
                        decision_id: DecisionId::new(),
                    },
                    None => return SmallVec::new(),
                };
                smallvec![Self::commit(env, registration, transition)]
            },

            RegistrationAction::Missing { registration_id } => Self::finish(
                state,
                Err(ApprovalError::RequestNotFound(registration_id.to_string())),
            ),

            RegistrationAction::Committed { registration } => {
                ApprovalMetrics::record_decision("registration", registration.status.label());
                tracing::info!(
                    registration_id = %registration.id,
                    status = %registration.status,
                    "Owner registration decided"
                );
                let effect = match notice_for(&registration.status) {
                    Some(decision) => {
                        let notifier = Arc::clone(&env.notifier);
                        let notification = Notification {
                            recipient: registration.submitted_by,
                            subject: NotificationSubject::Registration(registration.id),
                            decision,
                        };
                        Effect::future(async move {
                            notify_submitter(notifier.as_ref(), notification).await;
                            None
                        })
                    },
                    None => Effect::None,
                };
                state.outcome = Some(Ok(RegistrationResult::Decided(registration)));
                smallvec![effect]
            },

            RegistrationAction::AlreadyDecided { status } => {
                ApprovalMetrics::record_lost_race("registration");
                tracing::warn!(%status, "Lost registration decision race");
                Self::finish(state, Err(ApprovalError::InvalidTransition { current: status }))
            },

            RegistrationAction::StoreFailed { attempts, error } => {
                tracing::error!(attempts, %error, "Registration store failure");
                Self::finish(state, Err(ApprovalError::from_store(attempts, error)))
            },

            RegistrationAction::CommitAborted { error } => {
                tracing::error!(%error, "Registration commit task failed");
                Self::finish(state, Err(ApprovalError::Driver(error)))
            },
        }
    }
}
