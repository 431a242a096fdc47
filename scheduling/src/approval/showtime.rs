//! Showtime request approval.
//!
//! One session per command. The reducer decides, effects talk to the
//! ledger, and every store answer comes back as a feedback action:
//!
//! ```text
//! Approve ─▶ load ─▶ RequestLoaded ─▶ recheck ─▶ Rechecked ─▶ commit ─▶ Committed ─▶ notify
//!                         │                          │                    ├▶ AlreadyDecided
//!                         └▶ (not pending)           └▶ (hard: stale)     └▶ Stale
//! Reject  ─▶ load ─▶ RequestLoaded ───────────────────────────▶ commit ─▶ Committed ─▶ notify
//! Submit  ─▶ create ─▶ Submitted
//! ```
//!
//! The commit runs on a detached task: once the compare-and-set is issued it
//! completes even if the caller stops waiting.

use super::{notice_for, notify_submitter, Decision, SubmissionReceipt};
use crate::config::SchedulingConfig;
use crate::conflict::ConflictDetector;
use crate::error::ApprovalError;
use marquee_core::environment::Clock;
use marquee_core::ledger::{LedgerError, ShowtimeLedger, ShowtimeTransition, TransitionOutcome};
use marquee_core::notify::{Notification, NotificationSubject, Notifier};
use marquee_core::types::{
    ConflictResult, DecisionId, PublishedShowtime, RequestId, RequestStatus, ShowtimeRequest,
    UserId,
};
use marquee_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
use marquee_runtime::metrics::ApprovalMetrics;
use marquee_runtime::retry::retry_with_predicate;
use marquee_runtime::{run_detached, DriverError};
use std::sync::Arc;

// ============================================================================
// Actions (Commands + Feedback)
// ============================================================================

/// Actions for the showtime approval reducer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShowtimeApprovalAction {
    // Commands
    /// Create a pending request after a conflict check
    Submit {
        /// Request to create, status `Pending`
        request: ShowtimeRequest,
        /// Result of the check performed just before
        conflict: ConflictResult,
    },

    /// Approve a pending request
    Approve {
        /// Request to approve
        request_id: RequestId,
        /// Approver
        approver: UserId,
    },

    /// Reject a pending request
    Reject {
        /// Request to reject
        request_id: RequestId,
        /// Approver
        approver: UserId,
        /// Reason shown to the submitter
        reason: String,
    },

    // Feedback
    /// The pending request was stored
    Submitted {
        /// Stored request
        request_id: RequestId,
    },

    /// The request to decide was read
    RequestLoaded {
        /// Request as stored
        request: ShowtimeRequest,
    },

    /// No request exists with this id
    RequestMissing {
        /// Requested id
        request_id: RequestId,
    },

    /// The request was checked against the current ledger
    Rechecked {
        /// Check result, the request's own entry excluded
        conflict: ConflictResult,
    },

    /// The decision committed
    Committed {
        /// Request in its decided state
        request: ShowtimeRequest,
    },

    /// Another decision committed first
    AlreadyDecided {
        /// Status that won
        status: RequestStatus,
    },

    /// The store refused the approval: an overlapping showtime is approved
    Stale {
        /// Conflict with the blocking showtime
        conflict: ConflictResult,
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

// ============================================================================
// State
// ============================================================================

/// Successful result of a showtime command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShowtimeOutcome {
    /// A pending request was created
    Submitted(SubmissionReceipt),
    /// A request was approved or rejected
    Decided(ShowtimeRequest),
}

/// Session state for one showtime command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShowtimeApprovalState {
    /// Decision being applied
    pub decision: Option<Decision>,
    /// Request being submitted or decided
    pub request: Option<ShowtimeRequest>,
    /// Soft conflict to hand back on submission
    pub advisory: Option<ConflictResult>,
    /// Final result, set once
    pub outcome: Option<Result<ShowtimeOutcome, ApprovalError>>,
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the showtime approval reducer
#[derive(Clone)]
pub struct ShowtimeApprovalEnvironment {
    /// Showtime ledger
    pub ledger: Arc<dyn ShowtimeLedger>,
    /// Detector used for the approval-time recheck
    pub detector: ConflictDetector,
    /// Submitter notifications
    pub notifier: Arc<dyn Notifier>,
    /// Clock for decision timestamps
    pub clock: Arc<dyn Clock>,
    /// Buffer and retry settings
    pub config: Arc<SchedulingConfig>,
}

impl ShowtimeApprovalEnvironment {
    /// Creates a new `ShowtimeApprovalEnvironment`; the detector reads the same ledger
    #[must_use]
    pub fn new(
        ledger: Arc<dyn ShowtimeLedger>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: Arc<SchedulingConfig>,
    ) -> Self {
        let detector = ConflictDetector::new(Arc::clone(&ledger), Arc::clone(&config));
        Self {
            ledger,
            detector,
            notifier,
            clock,
            config,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for showtime submission and approval
#[derive(Clone, Debug, Default)]
pub struct ShowtimeApprovalReducer;

type Effects = SmallVec<[Effect<ShowtimeApprovalAction>; 4]>;

impl ShowtimeApprovalReducer {
    /// Creates a new `ShowtimeApprovalReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn finish(
        state: &mut ShowtimeApprovalState,
        outcome: Result<ShowtimeOutcome, ApprovalError>,
    ) -> Effects {
        state.outcome = Some(outcome);
        SmallVec::new()
    }

    fn create(env: &ShowtimeApprovalEnvironment, request: ShowtimeRequest) -> Effect<ShowtimeApprovalAction> {
        let ledger = Arc::clone(&env.ledger);
        let policy = env.config.commit_retry_policy();
        let occupied = request.interval(env.config.buffer_minutes);
        Effect::future(async move {
            let created = retry_with_predicate(
                &policy,
                "create_pending_request",
                || ledger.create_pending_request(request.clone(), occupied),
                LedgerError::is_transient,
            )
            .await;
            Some(match created {
                Ok(request_id) => ShowtimeApprovalAction::Submitted { request_id },
                Err(failure) => ShowtimeApprovalAction::StoreFailed {
                    attempts: failure.attempts,
                    error: failure.error,
                },
            })
        })
    }

    fn load(env: &ShowtimeApprovalEnvironment, request_id: RequestId) -> Effect<ShowtimeApprovalAction> {
        let ledger = Arc::clone(&env.ledger);
        let policy = env.config.commit_retry_policy();
        Effect::future(async move {
            let loaded = retry_with_predicate(
                &policy,
                "load_request",
                || ledger.load_request(request_id),
                LedgerError::is_transient,
            )
            .await;
            Some(match loaded {
                Ok(Some(request)) => ShowtimeApprovalAction::RequestLoaded { request },
                Ok(None) => ShowtimeApprovalAction::RequestMissing { request_id },
                Err(failure) => ShowtimeApprovalAction::StoreFailed {
                    attempts: failure.attempts,
                    error: failure.error,
                },
            })
        })
    }

    fn recheck(env: &ShowtimeApprovalEnvironment, request: ShowtimeRequest) -> Effect<ShowtimeApprovalAction> {
        let detector = env.detector.clone();
        let policy = env.config.commit_retry_policy();
        Effect::future(async move {
            let checked = retry_with_predicate(
                &policy,
                "recheck",
                || detector.recheck(&request),
                LedgerError::is_transient,
            )
            .await;
            Some(match checked {
                Ok(conflict) => ShowtimeApprovalAction::Rechecked { conflict },
                Err(failure) => ShowtimeApprovalAction::StoreFailed {
                    attempts: failure.attempts,
                    error: failure.error,
                },
            })
        })
    }

    fn commit(
        env: &ShowtimeApprovalEnvironment,
        request: ShowtimeRequest,
        transition: ShowtimeTransition,
    ) -> Effect<ShowtimeApprovalAction> {
        let ledger = Arc::clone(&env.ledger);
        let detector = env.detector.clone();
        let policy = env.config.commit_retry_policy();
        Effect::future(async move {
            let request_id = request.id;
            let settled = run_detached(async move {
                let result = retry_with_predicate(
                    &policy,
                    "transition_request",
                    || ledger.transition_request(request_id, transition.clone()),
                    LedgerError::is_transient,
                )
                .await;

                match result {
                    Ok(TransitionOutcome::Committed(request)) => {
                        ShowtimeApprovalAction::Committed { request }
                    },
                    Ok(TransitionOutcome::AlreadyDecided(status))
                        if transition.already_applied(&status) =>
                    {
                        // An earlier attempt landed but its acknowledgement was lost
                        tracing::debug!(%request_id, "Commit found its own decision already applied");
                        let mut request = request;
                        request.status = status;
                        ShowtimeApprovalAction::Committed { request }
                    },
                    Ok(TransitionOutcome::AlreadyDecided(status)) => {
                        ShowtimeApprovalAction::AlreadyDecided { status }
                    },
                    Ok(TransitionOutcome::Stale { blocking }) => {
                        let conflict = match detector.recheck(&request).await {
                            Ok(conflict) if conflict.has_conflict => conflict,
                            _ => ConflictResult::hard(&blocking, None),
                        };
                        ShowtimeApprovalAction::Stale { conflict }
                    },
                    Err(failure) => ShowtimeApprovalAction::StoreFailed {
                        attempts: failure.attempts,
                        error: failure.error,
                    },
                }
            })
            .await;
            Some(settled.unwrap_or_else(|error| ShowtimeApprovalAction::CommitAborted { error }))
        })
    }

    fn notify(env: &ShowtimeApprovalEnvironment, request: &ShowtimeRequest) -> Effect<ShowtimeApprovalAction> {
        let Some(decision) = notice_for(&request.status) else {
            return Effect::None;
        };
        let notifier = Arc::clone(&env.notifier);
        let notification = Notification {
            recipient: request.submitted_by,
            subject: NotificationSubject::Showtime(request.id),
            decision,
        };
        Effect::future(async move {
            notify_submitter(notifier.as_ref(), notification).await;
            None
        })
    }
}

impl Reducer for ShowtimeApprovalReducer {
    type State = ShowtimeApprovalState;
    type Action = ShowtimeApprovalAction;
    type Environment = ShowtimeApprovalEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Commands ==========
            ShowtimeApprovalAction::Submit { request, conflict } => {
                if conflict.has_conflict {
                    return Self::finish(state, Err(ApprovalError::HardConflict(conflict)));
                }
                if !request.is_pending() {
                    return Self::finish(
                        state,
                        Err(ApprovalError::InvalidTransition {
                            current: request.status,
                        }),
                    );
                }
                state.advisory = conflict.is_pending.then_some(conflict);
                state.request = Some(request.clone());
                smallvec![Self::create(env, request)]
            },

            ShowtimeApprovalAction::Approve {
                request_id,
                approver,
            } => {
                state.decision = Some(Decision::Approve { approver });
                smallvec![Self::load(env, request_id)]
            },

            ShowtimeApprovalAction::Reject {
                request_id,
                approver,
                reason,
            } => {
                if reason.trim().is_empty() {
                    return Self::finish(state, Err(ApprovalError::EmptyRejectionReason));
                }
                state.decision = Some(Decision::Reject { approver, reason });
                smallvec![Self::load(env, request_id)]
            },

            // ========== Feedback ==========
            ShowtimeApprovalAction::Submitted { request_id } => {
                ApprovalMetrics::record_submission("showtime");
                tracing::info!(
                    %request_id,
                    soft_conflict = state.advisory.is_some(),
                    "Showtime request submitted"
                );
                let receipt = SubmissionReceipt {
                    request_id,
                    advisory: state.advisory.take(),
                };
                Self::finish(state, Ok(ShowtimeOutcome::Submitted(receipt)))
            },

            ShowtimeApprovalAction::RequestLoaded { request } => {
                if !request.is_pending() {
                    ApprovalMetrics::record_lost_race("showtime");
                    tracing::warn!(request_id = %request.id, status = %request.status, "Request already decided");
                    return Self::finish(
                        state,
                        Err(ApprovalError::InvalidTransition {
                            current: request.status,
                        }),
                    );
                }
                let effect = match &state.decision {
                    Some(Decision::Approve { .. }) => Self::recheck(env, request.clone()),
                    Some(Decision::Reject { approver, reason }) => {
                        let transition = ShowtimeTransition::Reject {
                            rejected_by: *approver,
                            rejected_at: env.clock.now(),
                            reason: reason.clone(),
                            decision_id: DecisionId::new(),
                        };
                        Self::commit(env, request.clone(), transition)
                    },
                    None => return SmallVec::new(),
                };
                state.request = Some(request);
                smallvec![effect]
            },

            ShowtimeApprovalAction::RequestMissing { request_id } => {
                Self::finish(state, Err(ApprovalError::RequestNotFound(request_id.to_string())))
            },

            ShowtimeApprovalAction::Rechecked { conflict } => {
                if conflict.has_conflict {
                    ApprovalMetrics::record_stale();
                    tracing::warn!(
                        occupied_by = conflict.conflicting_movie_title.as_deref(),
                        "Approval refused: request is stale"
                    );
                    return Self::finish(state, Err(ApprovalError::StaleRequest(conflict)));
                }
                let (Some(request), Some(Decision::Approve { approver })) =
                    (&state.request, &state.decision)
                else {
                    return SmallVec::new();
                };
                let now = env.clock.now();
                let transition = ShowtimeTransition::Approve {
                    approved_by: *approver,
                    approved_at: now,
                    decision_id: DecisionId::new(),
                    showtime: PublishedShowtime::from_request(request, env.config.buffer_minutes, now),
                };
                smallvec![Self::commit(env, request.clone(), transition)]
            },

            ShowtimeApprovalAction::Committed { request } => {
                ApprovalMetrics::record_decision("showtime", request.status.label());
                tracing::info!(request_id = %request.id, status = %request.status, "Showtime request decided");
                let effect = Self::notify(env, &request);
                state.outcome = Some(Ok(ShowtimeOutcome::Decided(request.clone())));
                state.request = Some(request);
                smallvec![effect]
            },

            ShowtimeApprovalAction::AlreadyDecided { status } => {
                ApprovalMetrics::record_lost_race("showtime");
                tracing::warn!(%status, "Lost decision race");
                Self::finish(state, Err(ApprovalError::InvalidTransition { current: status }))
            },

            ShowtimeApprovalAction::Stale { conflict } => {
                ApprovalMetrics::record_stale();
                tracing::warn!(
                    occupied_by = conflict.conflicting_movie_title.as_deref(),
                    "Approval refused by the ledger: request is stale"
                );
                Self::finish(state, Err(ApprovalError::StaleRequest(conflict)))
            },

            ShowtimeApprovalAction::StoreFailed { attempts, error } => {
                tracing::error!(attempts, %error, "Showtime store failure");
                Self::finish(state, Err(ApprovalError::from_store(attempts, error)))
            },

            ShowtimeApprovalAction::CommitAborted { error } => {
                tracing::error!(%error, "Showtime commit task failed");
                Self::finish(state, Err(ApprovalError::Driver(error)))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use marquee_core::types::{
        Approval, MovieId, ScreenFormat, ScreenId, ShowtimeProposal, TheatreId, TierPricing,
    };
    use marquee_testing::reducer_test::assertions;
    use marquee_testing::{test_clock, InMemoryLedger, RecordingNotifier, ReducerTest};

    fn environment() -> ShowtimeApprovalEnvironment {
        ShowtimeApprovalEnvironment::new(
            Arc::new(InMemoryLedger::new()),
            Arc::new(RecordingNotifier::new()),
            Arc::new(test_clock()),
            Arc::new(SchedulingConfig::default()),
        )
    }

    fn request() -> ShowtimeRequest {
        ShowtimeRequest::pending(
            ShowtimeProposal {
                theatre_id: TheatreId::new(),
                screen_id: ScreenId::new(),
                movie_id: MovieId::new(),
                date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                start_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                format: ScreenFormat::Imax,
                languages: vec!["English".to_string()],
                pricing: TierPricing {
                    silver: 300,
                    gold: 450,
                    platinum: 700,
                },
                submitted_by: UserId::new(),
            },
            "Oppenheimer".to_string(),
            180,
            test_clock().now(),
        )
    }

    #[test]
    fn hard_conflict_blocks_submission() {
        let hard = ConflictResult {
            has_conflict: true,
            ..ConflictResult::clear()
        };
        ReducerTest::new(ShowtimeApprovalReducer::new())
            .with_env(environment())
            .given_state(ShowtimeApprovalState::default())
            .when_action(ShowtimeApprovalAction::Submit {
                request: request(),
                conflict: hard.clone(),
            })
            .then_state(move |state| {
                assert_eq!(state.outcome, Some(Err(ApprovalError::HardConflict(hard))));
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn soft_conflict_is_kept_as_advisory() {
        let soft = ConflictResult {
            is_pending: true,
            conflicting_movie_title: Some("Arrival".to_string()),
            ..ConflictResult::clear()
        };
        ReducerTest::new(ShowtimeApprovalReducer::new())
            .with_env(environment())
            .given_state(ShowtimeApprovalState::default())
            .when_action(ShowtimeApprovalAction::Submit {
                request: request(),
                conflict: soft.clone(),
            })
            .then_state(move |state| {
                assert_eq!(state.advisory, Some(soft));
                assert!(state.outcome.is_none());
            })
            .then_effects(|effects| assertions::assert_has_future_effect(effects))
            .run();
    }

    #[test]
    fn blank_reason_is_refused_before_any_io() {
        ReducerTest::new(ShowtimeApprovalReducer::new())
            .with_env(environment())
            .given_state(ShowtimeApprovalState::default())
            .when_action(ShowtimeApprovalAction::Reject {
                request_id: RequestId::new(),
                approver: UserId::new(),
                reason: "   ".to_string(),
            })
            .then_state(|state| {
                assert_eq!(state.outcome, Some(Err(ApprovalError::EmptyRejectionReason)));
                assert!(state.decision.is_none());
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn decided_request_reports_current_status() {
        let mut decided = request();
        let status = RequestStatus::Approved(Approval {
            approved_by: UserId::new(),
            approved_at: test_clock().now(),
            decision_id: DecisionId::new(),
        });
        decided.status = status.clone();

        ReducerTest::new(ShowtimeApprovalReducer::new())
            .with_env(environment())
            .given_state(ShowtimeApprovalState::default())
            .given_actions(vec![ShowtimeApprovalAction::Reject {
                request_id: decided.id,
                approver: UserId::new(),
                reason: "Maintenance".to_string(),
            }])
            .when_action(ShowtimeApprovalAction::RequestLoaded { request: decided })
            .then_state(move |state| {
                assert_eq!(
                    state.outcome,
                    Some(Err(ApprovalError::InvalidTransition { current: status }))
                );
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn approval_rechecks_before_committing() {
        let pending = request();
        ReducerTest::new(ShowtimeApprovalReducer::new())
            .with_env(environment())
            .given_state(ShowtimeApprovalState::default())
            .given_actions(vec![ShowtimeApprovalAction::Approve {
                request_id: pending.id,
                approver: UserId::new(),
            }])
            .when_action(ShowtimeApprovalAction::RequestLoaded {
                request: pending.clone(),
            })
            .then_state(move |state| {
                assert_eq!(state.request.as_ref(), Some(&pending));
                assert!(state.outcome.is_none());
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn hard_recheck_leaves_request_pending_as_stale() {
        let pending = request();
        let blocking = ConflictResult {
            has_conflict: true,
            conflicting_movie_title: Some("Barbie".to_string()),
            ..ConflictResult::clear()
        };
        ReducerTest::new(ShowtimeApprovalReducer::new())
            .with_env(environment())
            .given_state(ShowtimeApprovalState::default())
            .given_actions(vec![
                ShowtimeApprovalAction::Approve {
                    request_id: pending.id,
                    approver: UserId::new(),
                },
                ShowtimeApprovalAction::RequestLoaded { request: pending },
            ])
            .when_action(ShowtimeApprovalAction::Rechecked {
                conflict: blocking.clone(),
            })
            .then_state(move |state| {
                let outcome = state.outcome.clone().unwrap();
                assert_eq!(outcome, Err(ApprovalError::StaleRequest(blocking)));
                assert!(outcome.unwrap_err().is_recoverable());
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn committed_decision_notifies_submitter() {
        let mut approved = request();
        approved.status = RequestStatus::Approved(Approval {
            approved_by: UserId::new(),
            approved_at: test_clock().now(),
            decision_id: DecisionId::new(),
        });
        ReducerTest::new(ShowtimeApprovalReducer::new())
            .with_env(environment())
            .given_state(ShowtimeApprovalState::default())
            .when_action(ShowtimeApprovalAction::Committed {
                request: approved.clone(),
            })
            .then_state(move |state| {
                assert_eq!(
                    state.outcome,
                    Some(Ok(ShowtimeOutcome::Decided(approved)))
                );
            })
            .then_effects(|effects| assertions::assert_has_future_effect(effects))
            .run();
    }
}
