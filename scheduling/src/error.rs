//! Error types for the scheduling engines.

use marquee_core::catalog::CatalogError;
use marquee_core::ledger::LedgerError;
use marquee_core::types::{ConflictResult, RequestStatus};
use marquee_runtime::DriverError;
use thiserror::Error;

/// Errors surfaced by the approval workflow.
///
/// Conflicts found while *checking* are values ([`ConflictResult`]); they
/// only become errors when a caller tries to submit or approve through them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    /// The proposal overlaps an approved showtime; change time or screen.
    #[error("Proposed showtime overlaps an approved showtime")]
    HardConflict(ConflictResult),

    /// An overlapping showtime was approved after this request was submitted.
    ///
    /// The request stays pending; the approver should reject it or ask for a
    /// new slot.
    #[error("Request is stale: an overlapping showtime was approved since submission")]
    StaleRequest(ConflictResult),

    /// The request was already decided, possibly by a concurrent approver.
    #[error("Request already decided: {current}")]
    InvalidTransition {
        /// Status that won
        current: RequestStatus,
    },

    /// A rejection needs a non-empty reason.
    #[error("Rejection reason must not be empty")]
    EmptyRejectionReason,

    /// No request or registration exists with this id.
    #[error("Request not found: {0}")]
    RequestNotFound(String),

    /// The store kept failing; nothing was changed.
    #[error("Store failure after {attempts} attempt(s): {source}")]
    StoreFailure {
        /// Attempts made
        attempts: usize,
        /// Last store error
        #[source]
        source: LedgerError,
    },

    /// Movie metadata could not be resolved.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The command could not be driven to completion.
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// The command finished without producing an outcome.
    #[error("Command finished without an outcome")]
    Incomplete,
}

impl ApprovalError {
    /// Map a store error after `attempts` tries.
    #[must_use]
    pub fn from_store(attempts: usize, error: LedgerError) -> Self {
        match error {
            LedgerError::RequestNotFound(id) => Self::RequestNotFound(id),
            source => Self::StoreFailure { attempts, source },
        }
    }

    /// Whether the approver can resolve this by refreshing and deciding again.
    ///
    /// Stale requests and already-decided requests are normal outcomes of
    /// concurrent approvers, not failures.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::StaleRequest(_) | Self::InvalidTransition { .. })
    }
}

impl From<LedgerError> for ApprovalError {
    fn from(error: LedgerError) -> Self {
        Self::from_store(1, error)
    }
}

/// Errors surfaced by the entitlement tracker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    /// A rental must last at least one day.
    #[error("Rent duration must be at least one day, got {0}")]
    InvalidRentDuration(u32),

    /// The entitlement store failed.
    #[error("Entitlement store error: {0}")]
    Store(#[from] LedgerError),
}
