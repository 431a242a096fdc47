//! Row decoding shared by the stores.

use crate::store_error;
use chrono::{DateTime, Utc};
use marquee_core::interval::Interval;
use marquee_core::ledger::LedgerError;
use marquee_core::types::{
    Approval, DecisionId, LedgerEntry, OccupancyStatus, RequestId, Rejection, RequestStatus,
    UserId,
};
use sqlx::postgres::{PgRow, Postgres};
use sqlx::types::Uuid;
use sqlx::Row;

/// Read one column, mapping failures to [`LedgerError::Serialization`].
pub(crate) fn column<T>(row: &PgRow, name: &str) -> Result<T, LedgerError>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(|e| store_error(name, &e))
}

pub(crate) fn to_db_int(value: u32, what: &str) -> Result<i32, LedgerError> {
    i32::try_from(value).map_err(|_| LedgerError::Serialization(format!("{what} out of range: {value}")))
}

pub(crate) fn from_db_int(value: i32, what: &str) -> Result<u32, LedgerError> {
    u32::try_from(value).map_err(|_| LedgerError::Serialization(format!("{what} out of range: {value}")))
}

/// Columns a status is stored in
pub(crate) struct StatusColumns<'a> {
    pub label: &'static str,
    pub decided_by: Option<Uuid>,
    pub decided_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<&'a str>,
    pub decision_id: Option<Uuid>,
}

impl<'a> StatusColumns<'a> {
    pub(crate) fn of(status: &'a RequestStatus) -> Self {
        match status {
            RequestStatus::Pending => Self {
                label: status.label(),
                decided_by: None,
                decided_at: None,
                rejection_reason: None,
                decision_id: None,
            },
            RequestStatus::Approved(approval) => Self {
                label: status.label(),
                decided_by: Some(*approval.approved_by.as_uuid()),
                decided_at: Some(approval.approved_at),
                rejection_reason: None,
                decision_id: Some(*approval.decision_id.as_uuid()),
            },
            RequestStatus::Rejected(rejection) => Self {
                label: status.label(),
                decided_by: Some(*rejection.rejected_by.as_uuid()),
                decided_at: Some(rejection.rejected_at),
                rejection_reason: Some(&rejection.reason),
                decision_id: Some(*rejection.decision_id.as_uuid()),
            },
        }
    }
}

/// Rebuild a status from `status`, the `decided_*` columns, `decision_id`
/// and `rejection_reason`.
pub(crate) fn status_from_row(row: &PgRow) -> Result<RequestStatus, LedgerError> {
    let label: String = column(row, "status")?;
    let decided_by: Option<Uuid> = column(row, "decided_by")?;
    let decided_at: Option<DateTime<Utc>> = column(row, "decided_at")?;
    let decision_id: Option<Uuid> = column(row, "decision_id")?;
    let decided = decided_by
        .zip(decided_at)
        .zip(decision_id)
        .map(|((by, at), id)| (UserId::from_uuid(by), at, DecisionId::from_uuid(id)));

    match (label.as_str(), decided) {
        ("pending", _) => Ok(RequestStatus::Pending),
        ("approved", Some((approved_by, approved_at, decision_id))) => {
            Ok(RequestStatus::Approved(Approval {
                approved_by,
                approved_at,
                decision_id,
            }))
        },
        ("rejected", Some((rejected_by, rejected_at, decision_id))) => {
            let reason: Option<String> = column(row, "rejection_reason")?;
            let reason = reason
                .ok_or_else(|| LedgerError::Serialization("rejected row without a reason".into()))?;
            Ok(RequestStatus::Rejected(Rejection {
                rejected_by,
                rejected_at,
                reason,
                decision_id,
            }))
        },
        (other, _) => Err(LedgerError::Serialization(format!(
            "inconsistent status columns: {other}"
        ))),
    }
}

/// Stored interval from `occupied_from` / `occupied_until`
pub(crate) fn interval_from_row(row: &PgRow) -> Result<Interval, LedgerError> {
    Interval::new(column(row, "occupied_from")?, column(row, "occupied_until")?)
        .map_err(|e| LedgerError::Serialization(e.to_string()))
}

/// Ledger entry from `id`, `movie_title`, `status` and the interval columns
pub(crate) fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, LedgerError> {
    let label: String = column(row, "status")?;
    let status = match label.as_str() {
        "approved" => OccupancyStatus::Approved,
        "pending" => OccupancyStatus::Pending,
        other => {
            return Err(LedgerError::Serialization(format!(
                "{other} request in ledger"
            )));
        },
    };
    Ok(LedgerEntry {
        request_id: RequestId::from_uuid(column(row, "id")?),
        movie_title: column(row, "movie_title")?,
        interval: interval_from_row(row)?,
        status,
    })
}
