//! Showtime ledger contract.
//!
//! The ledger is the keyed record source the engines read and write: per
//! (screen, date) it holds the approved and pending intervals, and per request
//! the full [`ShowtimeRequest`]. Every mutation of a request's status goes
//! through [`ShowtimeLedger::transition_request`], a compare-and-set on
//! `Pending` that the store performs atomically. No caller ever holds a lock
//! across calls.
//!
//! # Implementations
//!
//! - `PostgresLedger` (in `marquee-postgres`): conditional updates inside a
//!   transaction, serialized per (screen, date) with an advisory lock
//! - `InMemoryLedger` (in `marquee-testing`): fast, deterministic testing

use crate::interval::Interval;
use crate::types::{
    Approval, DecisionId, LedgerEntry, PublishedShowtime, Rejection, RequestId, RequestStatus,
    ScreenId, ShowtimeRequest, UserId,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by store contracts
pub type StoreFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Errors that can occur during ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The store could not be reached (timeout, connection refused).
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// The store answered with an error.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored record could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No request exists with this id.
    #[error("Request not found: {0}")]
    RequestNotFound(String),
}

impl LedgerError {
    /// Whether repeating the same operation may succeed.
    ///
    /// Only infrastructure failures qualify; a missing request or an
    /// undecodable record will fail the same way again.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Database(_))
    }
}

/// A decision to apply to a pending showtime request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShowtimeTransition {
    /// Approve and publish
    Approve {
        /// Approver
        approved_by: UserId,
        /// Decision time
        approved_at: DateTime<Utc>,
        /// Shared by every retry of this commit
        decision_id: DecisionId,
        /// Showtime to publish in the same atomic unit
        showtime: PublishedShowtime,
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

impl ShowtimeTransition {
    /// The status the request holds once this transition commits
    #[must_use]
    pub fn target_status(&self) -> RequestStatus {
        match self {
            Self::Approve {
                approved_by,
                approved_at,
                decision_id,
                ..
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

    /// Whether `status` was written by this very decision.
    ///
    /// Used to recognise a commit that landed on an earlier attempt whose
    /// acknowledgement was lost. A separate decision with the same approver
    /// and outcome does not match.
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

/// Result of a compare-and-set on request status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition committed; carries the request in its new state
    Committed(ShowtimeRequest),
    /// The request was no longer pending; carries the status that won
    AlreadyDecided(RequestStatus),
    /// Approval refused: an approved interval now overlaps this request
    Stale {
        /// The approved entry that blocks the slot
        blocking: LedgerEntry,
    },
}

/// Keyed store of showtime requests and per-(screen, date) occupancy.
///
/// # Atomicity
///
/// An `Approve` transition must, as one indivisible unit:
///
/// 1. verify the request is still `Pending` (else `AlreadyDecided`)
/// 2. verify no *other* approved interval on the same (screen, date)
///    overlaps the request's interval (else `Stale`, nothing written)
/// 3. mark the request approved, turn its pending interval into an approved
///    one and publish the showtime
///
/// A `Reject` transition verifies `Pending`, records the rejection and drops
/// the pending interval. Any error leaves the request exactly as it was.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the ledger can be shared as
/// `Arc<dyn ShowtimeLedger>` inside effects.
pub trait ShowtimeLedger: Send + Sync {
    /// All approved and pending intervals for a (screen, date), ordered by start.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the store cannot be read.
    fn list_intervals(
        &self,
        screen_id: ScreenId,
        date: NaiveDate,
    ) -> StoreFuture<'_, Vec<LedgerEntry>, LedgerError>;

    /// Persist a new pending request occupying `occupied`.
    ///
    /// The caller sizes the interval, buffer included; the ledger stores it
    /// as given.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the write fails.
    fn create_pending_request(
        &self,
        request: ShowtimeRequest,
        occupied: Interval,
    ) -> StoreFuture<'_, RequestId, LedgerError>;

    /// Load a request by id.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the store cannot be read.
    fn load_request(
        &self,
        request_id: RequestId,
    ) -> StoreFuture<'_, Option<ShowtimeRequest>, LedgerError>;

    /// Pending requests across all screens, oldest submission first.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the store cannot be read.
    fn list_pending_requests(&self) -> StoreFuture<'_, Vec<ShowtimeRequest>, LedgerError>;

    /// Atomically move a request out of `Pending`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::RequestNotFound`] for an unknown id, or another
    /// [`LedgerError`] if the unit could not be committed. Losing the race
    /// is not an error: it is reported as [`TransitionOutcome::AlreadyDecided`].
    fn transition_request(
        &self,
        request_id: RequestId,
        transition: ShowtimeTransition,
    ) -> StoreFuture<'_, TransitionOutcome, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(LedgerError::Unavailable("timeout".into()).is_transient());
        assert!(LedgerError::Database("deadlock".into()).is_transient());
        assert!(!LedgerError::RequestNotFound("r".into()).is_transient());
        assert!(!LedgerError::Serialization("bad json".into()).is_transient());
    }

    #[test]
    fn rejection_applied_only_by_the_same_decision() {
        let admin = UserId::new();
        let at = Utc::now();
        let decision_id = DecisionId::new();
        let transition = ShowtimeTransition::Reject {
            rejected_by: admin,
            rejected_at: at,
            reason: "Overlaps maintenance".to_string(),
            decision_id,
        };
        let same = RequestStatus::Rejected(Rejection {
            rejected_by: admin,
            rejected_at: at,
            reason: "Overlaps maintenance".to_string(),
            decision_id,
        });
        let other = RequestStatus::Approved(Approval {
            approved_by: UserId::new(),
            approved_at: at,
            decision_id: DecisionId::new(),
        });
        assert!(transition.already_applied(&same));
        assert!(!transition.already_applied(&other));
        assert_eq!(transition.target_status(), same);
    }

    #[test]
    fn same_approver_in_another_decision_is_not_a_retry() {
        let admin = UserId::new();
        let at = Utc::now();
        let earlier = RequestStatus::Rejected(Rejection {
            rejected_by: admin,
            rejected_at: at,
            reason: "Overlaps maintenance".to_string(),
            decision_id: DecisionId::new(),
        });
        let second_click = ShowtimeTransition::Reject {
            rejected_by: admin,
            rejected_at: at,
            reason: "Overlaps maintenance".to_string(),
            decision_id: DecisionId::new(),
        };
        assert!(!second_click.already_applied(&earlier));
    }
}
