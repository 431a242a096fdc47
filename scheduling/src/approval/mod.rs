//! Approval workflow for showtime requests and theatre-owner registrations.
//!
//! Both request kinds follow the same lifecycle:
//!
//! ```text
//!            approve
//! Pending ────────────▶ Approved
//!    │
//!    └────────────────▶ Rejected(reason)
//!            reject
//! ```
//!
//! Leaving `Pending` is a compare-and-set in the store, so two approvers
//! racing on one request see exactly one winner. Showtime approvals also
//! re-check the current ledger; an overlap approved since submission makes
//! the request stale and leaves it pending.
//!
//! [`ApprovalWorkflow`] is the entry point. Each call runs one command through
//! its reducer on a [`Driver`] and returns the session's outcome.

pub mod registration;
pub mod showtime;

use crate::config::SchedulingConfig;
use crate::conflict::ConflictDetector;
use crate::error::ApprovalError;
use chrono::{NaiveDate, NaiveTime};
use marquee_core::catalog::MovieCatalog;
use marquee_core::environment::Clock;
use marquee_core::ledger::ShowtimeLedger;
use marquee_core::notify::{DecisionNotice, Notification, Notifier};
use marquee_core::registration::RegistrationStore;
use marquee_core::types::{
    ConflictResult, OwnerProfile, OwnerRegistrationRequest, RegistrationId, RequestId,
    RequestStatus, Role, ScreenId, ShowtimeProposal, ShowtimeRequest, UserId,
};
use marquee_runtime::metrics::ApprovalMetrics;
use marquee_runtime::Driver;
use registration::{
    RegistrationAction, RegistrationEnvironment, RegistrationReducer, RegistrationResult,
    RegistrationState,
};
use showtime::{
    ShowtimeApprovalAction, ShowtimeApprovalEnvironment, ShowtimeApprovalReducer,
    ShowtimeApprovalState, ShowtimeOutcome,
};
use std::sync::Arc;

/// Decision an approver is applying
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Approve the request
    Approve {
        /// Approver
        approver: UserId,
    },
    /// Reject the request
    Reject {
        /// Approver
        approver: UserId,
        /// Non-empty reason
        reason: String,
    },
}

/// Returned when a showtime request is created
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionReceipt {
    /// Id of the pending request
    pub request_id: RequestId,
    /// Soft conflict with other pending requests, if any
    pub advisory: Option<ConflictResult>,
}

/// Notice for a decided status; `None` while pending.
pub(crate) fn notice_for(status: &RequestStatus) -> Option<DecisionNotice> {
    match status {
        RequestStatus::Pending => None,
        RequestStatus::Approved(_) => Some(DecisionNotice::Approved),
        RequestStatus::Rejected(rejection) => Some(DecisionNotice::Rejected {
            reason: rejection.reason.clone(),
        }),
    }
}

/// Deliver a decision notice. Failures are logged and counted, never returned.
pub(crate) async fn notify_submitter(notifier: &dyn Notifier, notification: Notification) {
    let recipient = notification.recipient;
    if let Err(error) = notifier.notify(notification).await {
        ApprovalMetrics::record_notification_failure();
        tracing::warn!(%recipient, %error, "Failed to notify submitter");
    }
}

/// Collaborators the workflow is wired to
#[derive(Clone)]
pub struct ApprovalDependencies {
    /// Showtime ledger
    pub ledger: Arc<dyn ShowtimeLedger>,
    /// Owner registrations and roles
    pub registrations: Arc<dyn RegistrationStore>,
    /// Submitter notifications
    pub notifier: Arc<dyn Notifier>,
    /// Movie titles and runtimes
    pub catalog: Arc<dyn MovieCatalog>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// Entry point for submitting and deciding requests.
///
/// Stateless between calls; share it behind an `Arc` and call it from as many
/// sessions as needed.
pub struct ApprovalWorkflow {
    showtimes: Driver<ShowtimeApprovalReducer>,
    registrations: Driver<RegistrationReducer>,
    catalog: Arc<dyn MovieCatalog>,
    clock: Arc<dyn Clock>,
}

impl ApprovalWorkflow {
    /// Wire a workflow to its collaborators
    #[must_use]
    pub fn new(deps: ApprovalDependencies, config: SchedulingConfig) -> Self {
        let config = Arc::new(config);
        let max_steps = config.max_feedback_steps;

        let showtime_env = ShowtimeApprovalEnvironment::new(
            deps.ledger,
            Arc::clone(&deps.notifier),
            Arc::clone(&deps.clock),
            Arc::clone(&config),
        );
        let registration_env = RegistrationEnvironment {
            store: deps.registrations,
            notifier: deps.notifier,
            clock: Arc::clone(&deps.clock),
            retry: config.commit_retry_policy(),
        };

        Self {
            showtimes: Driver::new(ShowtimeApprovalReducer::new(), showtime_env)
                .with_max_steps(max_steps),
            registrations: Driver::new(RegistrationReducer::new(), registration_env)
                .with_max_steps(max_steps),
            catalog: deps.catalog,
            clock: deps.clock,
        }
    }

    /// Detector reading the same ledger as the workflow
    #[must_use]
    pub fn detector(&self) -> &ConflictDetector {
        &self.showtimes.environment().detector
    }

    // ========================================================================
    // Showtime requests
    // ========================================================================

    /// Check a proposed showtime against the current ledger.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::StoreFailure`] if the ledger cannot be read.
    pub async fn check_conflict(
        &self,
        screen_id: ScreenId,
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: u32,
    ) -> Result<ConflictResult, ApprovalError> {
        Ok(self
            .detector()
            .check_conflict(screen_id, date, start_time, duration_minutes)
            .await?)
    }

    /// Candidate slots still open for a showtime of this length.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::StoreFailure`] if the ledger cannot be read.
    pub async fn free_slots(
        &self,
        screen_id: ScreenId,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<NaiveTime>, ApprovalError> {
        Ok(self.detector().free_slots(screen_id, date, duration_minutes).await?)
    }

    /// Resolve the movie, check for conflicts and submit in one call.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::Catalog`] if the movie cannot be resolved
    /// - [`ApprovalError::HardConflict`] if an approved showtime overlaps
    /// - [`ApprovalError::StoreFailure`] if the ledger keeps failing
    #[tracing::instrument(skip(self, proposal), fields(screen = %proposal.screen_id, date = %proposal.date))]
    pub async fn propose(&self, proposal: ShowtimeProposal) -> Result<SubmissionReceipt, ApprovalError> {
        let movie = self.catalog.movie_details(proposal.movie_id).await?;
        let conflict = self
            .check_conflict(
                proposal.screen_id,
                proposal.date,
                proposal.start_time,
                movie.runtime_minutes,
            )
            .await?;
        let request = ShowtimeRequest::pending(
            proposal,
            movie.title,
            movie.runtime_minutes,
            self.clock.now(),
        );
        self.submit(request, &conflict).await
    }

    /// Create a pending request from a check the caller just ran.
    ///
    /// The check is trusted here and repeated at approval time.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::HardConflict`] if `conflict` reports one
    /// - [`ApprovalError::InvalidTransition`] if `request` is not pending
    /// - [`ApprovalError::StoreFailure`] if the ledger keeps failing
    #[tracing::instrument(skip(self, request, conflict), fields(request = %request.id))]
    pub async fn submit(
        &self,
        request: ShowtimeRequest,
        conflict: &ConflictResult,
    ) -> Result<SubmissionReceipt, ApprovalError> {
        let action = ShowtimeApprovalAction::Submit {
            request,
            conflict: conflict.clone(),
        };
        match self.drive_showtime(action).await? {
            ShowtimeOutcome::Submitted(receipt) => Ok(receipt),
            ShowtimeOutcome::Decided(_) => Err(ApprovalError::Incomplete),
        }
    }

    /// Approve a pending showtime request and publish it.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::StaleRequest`] if an overlapping showtime was
    ///   approved since submission; the request stays pending
    /// - [`ApprovalError::InvalidTransition`] if the request was already decided
    /// - [`ApprovalError::RequestNotFound`] for an unknown id
    /// - [`ApprovalError::StoreFailure`] if the ledger keeps failing
    #[tracing::instrument(skip(self))]
    pub async fn approve(
        &self,
        request_id: RequestId,
        approver: UserId,
    ) -> Result<ShowtimeRequest, ApprovalError> {
        self.decide_showtime(ShowtimeApprovalAction::Approve {
            request_id,
            approver,
        })
        .await
    }

    /// Reject a pending showtime request.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::EmptyRejectionReason`] for a blank reason
    /// - [`ApprovalError::InvalidTransition`] if the request was already decided
    /// - [`ApprovalError::RequestNotFound`] for an unknown id
    /// - [`ApprovalError::StoreFailure`] if the ledger keeps failing
    #[tracing::instrument(skip(self, reason))]
    pub async fn reject(
        &self,
        request_id: RequestId,
        approver: UserId,
        reason: impl Into<String>,
    ) -> Result<ShowtimeRequest, ApprovalError> {
        self.decide_showtime(ShowtimeApprovalAction::Reject {
            request_id,
            approver,
            reason: reason.into(),
        })
        .await
    }

    /// Pending showtime requests, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::StoreFailure`] if the ledger cannot be read.
    #[tracing::instrument(skip(self))]
    pub async fn pending_showtime_requests(&self) -> Result<Vec<ShowtimeRequest>, ApprovalError> {
        Ok(self.showtimes.environment().ledger.list_pending_requests().await?)
    }

    async fn decide_showtime(
        &self,
        action: ShowtimeApprovalAction,
    ) -> Result<ShowtimeRequest, ApprovalError> {
        match self.drive_showtime(action).await? {
            ShowtimeOutcome::Decided(request) => Ok(request),
            ShowtimeOutcome::Submitted(_) => Err(ApprovalError::Incomplete),
        }
    }

    async fn drive_showtime(
        &self,
        action: ShowtimeApprovalAction,
    ) -> Result<ShowtimeOutcome, ApprovalError> {
        let mut state = ShowtimeApprovalState::default();
        self.showtimes.run(&mut state, action).await?;
        state.outcome.unwrap_or(Err(ApprovalError::Incomplete))
    }

    // ========================================================================
    // Owner registrations
    // ========================================================================

    /// Ask to become a theatre owner.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::StoreFailure`] if the store keeps failing.
    #[tracing::instrument(skip(self, profile), fields(business = %profile.business_name))]
    pub async fn submit_registration(
        &self,
        submitted_by: UserId,
        profile: OwnerProfile,
    ) -> Result<RegistrationId, ApprovalError> {
        let registration = OwnerRegistrationRequest::pending(submitted_by, profile, self.clock.now());
        match self
            .drive_registration(RegistrationAction::Submit { registration })
            .await?
        {
            RegistrationResult::Submitted(id) => Ok(id),
            RegistrationResult::Decided(_) => Err(ApprovalError::Incomplete),
        }
    }

    /// Approve a registration; the submitter becomes a theatre owner.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::InvalidTransition`] if already decided
    /// - [`ApprovalError::RequestNotFound`] for an unknown id
    /// - [`ApprovalError::StoreFailure`] if the store keeps failing
    #[tracing::instrument(skip(self))]
    pub async fn approve_registration(
        &self,
        registration_id: RegistrationId,
        approver: UserId,
    ) -> Result<OwnerRegistrationRequest, ApprovalError> {
        self.decide_registration(RegistrationAction::Approve {
            registration_id,
            approver,
        })
        .await
    }

    /// Reject a registration.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::EmptyRejectionReason`] for a blank reason
    /// - [`ApprovalError::InvalidTransition`] if already decided
    /// - [`ApprovalError::RequestNotFound`] for an unknown id
    /// - [`ApprovalError::StoreFailure`] if the store keeps failing
    #[tracing::instrument(skip(self, reason))]
    pub async fn reject_registration(
        &self,
        registration_id: RegistrationId,
        approver: UserId,
        reason: impl Into<String>,
    ) -> Result<OwnerRegistrationRequest, ApprovalError> {
        self.decide_registration(RegistrationAction::Reject {
            registration_id,
            approver,
            reason: reason.into(),
        })
        .await
    }

    /// Pending registrations, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::StoreFailure`] if the store cannot be read.
    #[tracing::instrument(skip(self))]
    pub async fn pending_registrations(&self) -> Result<Vec<OwnerRegistrationRequest>, ApprovalError> {
        Ok(self
            .registrations
            .environment()
            .store
            .list_pending_registrations()
            .await?)
    }

    /// Current role of a user.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::StoreFailure`] if the store cannot be read.
    pub async fn role_of(&self, user_id: UserId) -> Result<Role, ApprovalError> {
        Ok(self.registrations.environment().store.role_of(user_id).await?)
    }

    async fn decide_registration(
        &self,
        action: RegistrationAction,
    ) -> Result<OwnerRegistrationRequest, ApprovalError> {
        match self.drive_registration(action).await? {
            RegistrationResult::Decided(registration) => Ok(registration),
            RegistrationResult::Submitted(_) => Err(ApprovalError::Incomplete),
        }
    }

    async fn drive_registration(
        &self,
        action: RegistrationAction,
    ) -> Result<RegistrationResult, ApprovalError> {
        let mut state = RegistrationState::default();
        self.registrations.run(&mut state, action).await?;
        state.outcome.unwrap_or(Err(ApprovalError::Incomplete))
    }
}
