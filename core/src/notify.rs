//! Outcome notifications for submitters.
//!
//! Delivery is fire-and-forget from the engines' point of view: a failed
//! notification is logged and never rolls back the decision it reports.

use crate::ledger::StoreFuture;
use crate::types::{RegistrationId, RequestId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from a notification channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The channel refused or dropped the message
    #[error("Notification delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Which request a notification is about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationSubject {
    /// A showtime request
    Showtime(RequestId),
    /// An owner registration
    Registration(RegistrationId),
}

/// Decision being reported
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionNotice {
    /// The request was approved
    Approved,
    /// The request was rejected
    Rejected {
        /// Reason given by the approver
        reason: String,
    },
}

/// Message for a submitter about their request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Submitter to notify
    pub recipient: UserId,
    /// Request decided
    pub subject: NotificationSubject,
    /// Decision taken
    pub decision: DecisionNotice,
}

/// Delivery channel for [`Notification`]s (push, toast, email).
pub trait Notifier: Send + Sync {
    /// Deliver a notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if delivery fails.
    fn notify(&self, notification: Notification) -> StoreFuture<'_, (), NotifyError>;
}
