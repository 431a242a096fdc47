//! Domain types for showtime scheduling.
//!
//! Identifiers, request lifecycles, ledger entries and conflict results.
//! Status is a closed set of variants: a rejection reason only exists inside
//! [`RequestStatus::Rejected`], and a published showtime shares its id with
//! the request it was promoted from.

use crate::interval::Interval;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a theatre
    TheatreId
);
uuid_id!(
    /// Unique identifier for a screen (auditorium), the unit of scheduling exclusivity
    ScreenId
);
uuid_id!(
    /// Unique identifier for a movie in the metadata catalog
    MovieId
);
uuid_id!(
    /// Unique identifier for a showtime request
    RequestId
);
uuid_id!(
    /// Unique identifier for a theatre-owner registration request
    RegistrationId
);
uuid_id!(
    /// Unique identifier for a published showtime
    ShowtimeId
);
uuid_id!(
    /// Identifies one decision attempt; retries of the same commit share it
    DecisionId
);
uuid_id!(
    /// Unique identifier for a user (submitter, approver or viewer)
    UserId
);

impl ShowtimeId {
    /// The showtime a request is published as once approved.
    #[must_use]
    pub const fn for_request(request_id: RequestId) -> Self {
        Self(*request_id.as_uuid())
    }
}

// ============================================================================
// Showtime attributes
// ============================================================================

/// Projection format chosen for a showtime
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScreenFormat {
    /// Standard 2D projection
    TwoD,
    /// Stereoscopic 3D
    ThreeD,
    /// IMAX
    Imax,
    /// 4DX motion seats
    FourDx,
}

impl ScreenFormat {
    /// Stable storage label
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TwoD => "2D",
            Self::ThreeD => "3D",
            Self::Imax => "IMAX",
            Self::FourDx => "4DX",
        }
    }

    /// Parse a storage label
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "2D" => Some(Self::TwoD),
            "3D" => Some(Self::ThreeD),
            "IMAX" => Some(Self::Imax),
            "4DX" => Some(Self::FourDx),
            _ => None,
        }
    }
}

/// Ticket price per seating tier, in minor currency units
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TierPricing {
    /// Silver (front rows)
    pub silver: u32,
    /// Gold (middle rows)
    pub gold: u32,
    /// Platinum (recliners)
    pub platinum: u32,
}

// ============================================================================
// Request lifecycle
// ============================================================================

/// Record of an approval decision
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    /// Approver who decided
    pub approved_by: UserId,
    /// When the decision committed
    pub approved_at: DateTime<Utc>,
    /// Decision that produced this approval
    pub decision_id: DecisionId,
}

/// Record of a rejection decision
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Approver who decided
    pub rejected_by: UserId,
    /// When the decision committed
    pub rejected_at: DateTime<Utc>,
    /// Non-empty explanation shown to the submitter
    pub reason: String,
    /// Decision that produced this rejection
    pub decision_id: DecisionId,
}

/// Lifecycle status shared by showtime and owner-registration requests.
///
/// `Pending` is the only non-terminal state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Awaiting an approver
    Pending,
    /// Approved (terminal)
    Approved(Approval),
    /// Rejected with a reason (terminal)
    Rejected(Rejection),
}

impl RequestStatus {
    /// Whether the request still awaits a decision
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Whether the request has been decided
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    /// Short label for logs and storage
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved(_) => "approved",
            Self::Rejected(_) => "rejected",
        }
    }

    /// The decision that ended `Pending`, if any
    #[must_use]
    pub const fn decision_id(&self) -> Option<DecisionId> {
        match self {
            Self::Pending => None,
            Self::Approved(approval) => Some(approval.decision_id),
            Self::Rejected(rejection) => Some(rejection.decision_id),
        }
    }

    /// The rejection reason, present only for rejected requests
    #[must_use]
    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            Self::Rejected(rejection) => Some(&rejection.reason),
            _ => None,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(rejection) => write!(f, "rejected ({})", rejection.reason),
            other => f.write_str(other.label()),
        }
    }
}

/// What a theatre owner fills in to propose a showtime
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowtimeProposal {
    /// Theatre owning the screen
    pub theatre_id: TheatreId,
    /// Screen to occupy
    pub screen_id: ScreenId,
    /// Movie to screen
    pub movie_id: MovieId,
    /// Calendar date of the screening
    pub date: NaiveDate,
    /// Local start time
    pub start_time: NaiveTime,
    /// Projection format
    pub format: ScreenFormat,
    /// Audio/subtitle languages offered
    pub languages: Vec<String>,
    /// Per-tier pricing
    pub pricing: TierPricing,
    /// Owner submitting the proposal
    pub submitted_by: UserId,
}

/// A proposed showtime travelling through the approval workflow
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowtimeRequest {
    /// Request identifier
    pub id: RequestId,
    /// Theatre owning the screen
    pub theatre_id: TheatreId,
    /// Screen to occupy
    pub screen_id: ScreenId,
    /// Movie to screen
    pub movie_id: MovieId,
    /// Movie title as resolved at submission
    pub movie_title: String,
    /// Runtime in minutes, buffer excluded
    pub movie_duration_minutes: u32,
    /// Calendar date of the screening
    pub date: NaiveDate,
    /// Local start time
    pub start_time: NaiveTime,
    /// Projection format
    pub format: ScreenFormat,
    /// Audio/subtitle languages offered
    pub languages: Vec<String>,
    /// Per-tier pricing
    pub pricing: TierPricing,
    /// Lifecycle status
    pub status: RequestStatus,
    /// Owner who submitted the request
    pub submitted_by: UserId,
    /// When the request was created
    pub submitted_at: DateTime<Utc>,
}

impl ShowtimeRequest {
    /// Build a pending request from a proposal and the resolved movie details.
    #[must_use]
    pub fn pending(
        proposal: ShowtimeProposal,
        movie_title: String,
        movie_duration_minutes: u32,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            theatre_id: proposal.theatre_id,
            screen_id: proposal.screen_id,
            movie_id: proposal.movie_id,
            movie_title,
            movie_duration_minutes,
            date: proposal.date,
            start_time: proposal.start_time,
            format: proposal.format,
            languages: proposal.languages,
            pricing: proposal.pricing,
            status: RequestStatus::Pending,
            submitted_by: proposal.submitted_by,
            submitted_at,
        }
    }

    /// Interval this request occupies with the given turnover buffer
    #[must_use]
    pub fn interval(&self, buffer_minutes: u32) -> Interval {
        Interval::for_showtime(
            self.date,
            self.start_time,
            self.movie_duration_minutes,
            buffer_minutes,
        )
    }

    /// Whether the request still awaits a decision
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.status.is_pending()
    }
}

/// A bookable showtime, materialized when a request is approved
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedShowtime {
    /// Showtime identifier (equal to the request id)
    pub id: ShowtimeId,
    /// Request this showtime was promoted from
    pub request_id: RequestId,
    /// Theatre owning the screen
    pub theatre_id: TheatreId,
    /// Screen occupied
    pub screen_id: ScreenId,
    /// Movie screened
    pub movie_id: MovieId,
    /// Movie title
    pub movie_title: String,
    /// Calendar date
    pub date: NaiveDate,
    /// Local start time
    pub start_time: NaiveTime,
    /// Occupied range, buffer included
    pub interval: Interval,
    /// Projection format
    pub format: ScreenFormat,
    /// Languages offered
    pub languages: Vec<String>,
    /// Per-tier pricing
    pub pricing: TierPricing,
    /// When it became bookable
    pub published_at: DateTime<Utc>,
}

impl PublishedShowtime {
    /// Describe the showtime a request becomes on approval.
    #[must_use]
    pub fn from_request(
        request: &ShowtimeRequest,
        buffer_minutes: u32,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ShowtimeId::for_request(request.id),
            request_id: request.id,
            theatre_id: request.theatre_id,
            screen_id: request.screen_id,
            movie_id: request.movie_id,
            movie_title: request.movie_title.clone(),
            date: request.date,
            start_time: request.start_time,
            interval: request.interval(buffer_minutes),
            format: request.format,
            languages: request.languages.clone(),
            pricing: request.pricing,
            published_at,
        }
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// Whether a ledger interval is committed or merely requested
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OccupancyStatus {
    /// Approved and published; blocks the screen
    Approved,
    /// Awaiting a decision; advisory only
    Pending,
}

/// One occupied interval in a (screen, date) ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Request (and, once approved, showtime) occupying the interval
    pub request_id: RequestId,
    /// Title of the occupying movie
    pub movie_title: String,
    /// Occupied range, buffer included
    pub interval: Interval,
    /// Approved or pending
    pub status: OccupancyStatus,
}

// ============================================================================
// Conflict results
// ============================================================================

/// Severity of a conflict check outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Nothing overlaps
    Clear,
    /// Only a pending request overlaps; submission allowed with a warning
    Soft,
    /// An approved showtime overlaps; submission refused
    Hard,
}

/// Outcome of checking a proposed interval against a ledger.
///
/// Derived on every check and never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResult {
    /// Overlaps an approved interval
    pub has_conflict: bool,
    /// Overlaps only a pending interval
    pub is_pending: bool,
    /// Title of the occupying movie
    pub conflicting_movie_title: Option<String>,
    /// Start of the occupying interval
    pub occupied_from: Option<NaiveDateTime>,
    /// End of the occupying interval, buffer included
    pub occupied_until: Option<NaiveDateTime>,
    /// First candidate slot that fits, computed for hard conflicts only
    pub next_available_slot: Option<NaiveTime>,
}

impl ConflictResult {
    /// No overlap at all
    #[must_use]
    pub fn clear() -> Self {
        Self::default()
    }

    /// Overlap with an approved interval
    #[must_use]
    pub fn hard(blocking: &LedgerEntry, next_available_slot: Option<NaiveTime>) -> Self {
        Self {
            has_conflict: true,
            is_pending: false,
            conflicting_movie_title: Some(blocking.movie_title.clone()),
            occupied_from: Some(blocking.interval.start()),
            occupied_until: Some(blocking.interval.end()),
            next_available_slot,
        }
    }

    /// Overlap with a pending interval only
    #[must_use]
    pub fn soft(competing: &LedgerEntry) -> Self {
        Self {
            has_conflict: false,
            is_pending: true,
            conflicting_movie_title: Some(competing.movie_title.clone()),
            occupied_from: Some(competing.interval.start()),
            occupied_until: Some(competing.interval.end()),
            next_available_slot: None,
        }
    }

    /// Severity of this result
    #[must_use]
    pub const fn kind(&self) -> ConflictKind {
        if self.has_conflict {
            ConflictKind::Hard
        } else if self.is_pending {
            ConflictKind::Soft
        } else {
            ConflictKind::Clear
        }
    }
}

// ============================================================================
// Owner registration
// ============================================================================

/// Roles a user can hold
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Regular customer
    Viewer,
    /// Approved theatre owner; may propose showtimes
    TheatreOwner,
    /// Approver
    Admin,
}

impl Role {
    /// Stable storage label
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::TheatreOwner => "theatre_owner",
            Self::Admin => "admin",
        }
    }

    /// Parse a storage label
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "viewer" => Some(Self::Viewer),
            "theatre_owner" => Some(Self::TheatreOwner),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Business details submitted with an owner registration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerProfile {
    /// Registered business name
    pub business_name: String,
    /// Contact person
    pub contact_name: String,
    /// Contact email
    pub contact_email: String,
    /// Contact phone
    pub phone: String,
    /// City of operation
    pub city: String,
}

/// Request to be promoted to the theatre-owner role
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRegistrationRequest {
    /// Registration identifier
    pub id: RegistrationId,
    /// User asking for promotion
    pub submitted_by: UserId,
    /// Business details
    pub profile: OwnerProfile,
    /// Lifecycle status
    pub status: RequestStatus,
    /// When the registration was created
    pub submitted_at: DateTime<Utc>,
}

impl OwnerRegistrationRequest {
    /// Build a pending registration
    #[must_use]
    pub fn pending(submitted_by: UserId, profile: OwnerProfile, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id: RegistrationId::new(),
            submitted_by,
            profile,
            status: RequestStatus::Pending,
            submitted_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(status: OccupancyStatus) -> LedgerEntry {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        LedgerEntry {
            request_id: RequestId::new(),
            movie_title: "Dune".to_string(),
            interval: Interval::for_showtime(date, NaiveTime::from_hms_opt(18, 0, 0).unwrap(), 120, 15),
            status,
        }
    }

    #[test]
    fn conflict_kinds() {
        assert_eq!(ConflictResult::clear().kind(), ConflictKind::Clear);
        assert_eq!(
            ConflictResult::soft(&entry(OccupancyStatus::Pending)).kind(),
            ConflictKind::Soft
        );
        let hard = ConflictResult::hard(&entry(OccupancyStatus::Approved), None);
        assert_eq!(hard.kind(), ConflictKind::Hard);
        assert_eq!(hard.conflicting_movie_title.as_deref(), Some("Dune"));
        assert!(!hard.is_pending);
    }

    #[test]
    fn showtime_id_follows_request_id() {
        let request_id = RequestId::new();
        assert_eq!(
            ShowtimeId::for_request(request_id).as_uuid(),
            request_id.as_uuid()
        );
    }

    #[test]
    fn only_rejected_status_carries_reason() {
        let rejected = RequestStatus::Rejected(Rejection {
            rejected_by: UserId::new(),
            rejected_at: Utc::now(),
            reason: "Screen under maintenance".to_string(),
            decision_id: DecisionId::new(),
        });
        assert_eq!(rejected.rejection_reason(), Some("Screen under maintenance"));
        assert!(rejected.is_terminal());
        assert_eq!(RequestStatus::Pending.rejection_reason(), None);
        assert_eq!(rejected.to_string(), "rejected (Screen under maintenance)");
    }

    #[test]
    fn format_labels_round_trip() {
        for format in [ScreenFormat::TwoD, ScreenFormat::ThreeD, ScreenFormat::Imax, ScreenFormat::FourDx] {
            assert_eq!(ScreenFormat::parse(format.as_str()), Some(format));
        }
        assert_eq!(ScreenFormat::parse("8K"), None);
    }
}
