//! Theatre-owner registration store contract.
//!
//! Mirrors the showtime ledger's lifecycle: a registration is created pending
//! and leaves `Pending` only through a compare-and-set. Approval promotes the
//! submitter to [`Role::TheatreOwner`](crate::types::Role::TheatreOwner) in
//! the same atomic unit, so an approved registration never exists without the
//! role it grants.

use crate::ledger::{LedgerError, StoreFuture};
use crate::types::{
    Approval, DecisionId, OwnerRegistrationRequest, RegistrationId, Rejection, RequestStatus, Role,
    UserId,
};
use chrono::{DateTime, Utc};

/// A decision to apply to a pending registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationTransition {
    /// Approve and promote the submitter
    Approve {
        /// Approver
        approved_by: UserId,
        /// Decision time
        approved_at: DateTime<Utc>,
        /// Shared by every retry of this commit
        decision_id: DecisionId,
    },
    /// Reject with a reason
    Reject {
        /// Approver
        rejected_by: UserId,
        /// Decision time
        rejected_at: DateTime<Utc>,
        /// Non-empty reason
        reason: String,
        /// Shared by every retry of this commit
        decision_id: DecisionId,
    },
}

impl RegistrationTransition {
    /// Status the registration holds once this transition commits
    #[must_use]
    pub fn target_status(&self) -> RequestStatus {
        match self {
            Self::Approve {
                approved_by,
                approved_at,
                decision_id,
            } => RequestStatus::Approved(Approval {
                approved_by: *approved_by,
                approved_at: *approved_at,
                decision_id: *decision_id,
            }),
            Self::Reject {
                rejected_by,
                rejected_at,
                reason,
                decision_id,
            } => RequestStatus::Rejected(Rejection {
                rejected_by: *rejected_by,
                rejected_at: *rejected_at,
                reason: reason.clone(),
                decision_id: *decision_id,
            }),
        }
    }

    /// Identifier shared by every attempt of this commit
    #[must_use]
    pub const fn decision_id(&self) -> DecisionId {
        match self {
            Self::Approve { decision_id, .. } | Self::Reject { decision_id, .. } => *decision_id,
        }
    }

    /// Whether `status` was written by this very decision
    #[must_use]
    pub fn already_applied(&self, status: &RequestStatus) -> bool {
        let same_kind = matches!(
            (self, status),
            (Self::Approve { .. }, RequestStatus::Approved(_))
                | (Self::Reject { .. }, RequestStatus::Rejected(_))
        );
        same_kind && status.decision_id() == Some(self.decision_id())
    }
}

/// Result of a compare-and-set on registration status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The transition committed; carries the registration in its new state
    Committed(OwnerRegistrationRequest),
    /// The registration was no longer pending; carries the status that won
    AlreadyDecided(RequestStatus),
}

/// Keyed store of owner registrations and user roles.
pub trait RegistrationStore: Send + Sync {
    /// Persist a new pending registration.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the write fails.
    fn create_registration(
        &self,
        registration: OwnerRegistrationRequest,
    ) -> StoreFuture<'_, RegistrationId, LedgerError>;

    /// Load a registration by id.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the store cannot be read.
    fn load_registration(
        &self,
        registration_id: RegistrationId,
    ) -> StoreFuture<'_, Option<OwnerRegistrationRequest>, LedgerError>;

    /// Pending registrations, oldest submission first.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the store cannot be read.
    fn list_pending_registrations(
        &self,
    ) -> StoreFuture<'_, Vec<OwnerRegistrationRequest>, LedgerError>;

    /// Atomically move a registration out of `Pending`; approval also grants
    /// the theatre-owner role.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::RequestNotFound`] for an unknown id, or another
    /// [`LedgerError`] if the unit could not be committed.
    fn transition_registration(
        &self,
        registration_id: RegistrationId,
        transition: RegistrationTransition,
    ) -> StoreFuture<'_, RegistrationOutcome, LedgerError>;

    /// Current role of a user (`Viewer` when unknown).
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the store cannot be read.
    fn role_of(&self, user_id: UserId) -> StoreFuture<'_, Role, LedgerError>;
}
