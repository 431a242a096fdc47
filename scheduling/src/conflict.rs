//! Conflict detection for proposed showtimes.
//!
//! A proposal is checked against every approved and pending interval on its
//! (screen, date):
//!
//! - overlap with an approved interval is a **hard** conflict and comes with a
//!   next-slot suggestion drawn from the candidate slot list
//! - overlap with pending intervals only is a **soft** conflict, reported as
//!   advisory
//! - otherwise the proposal is clear
//!
//! Conflicts are values, never errors. The detector reads the ledger and
//! writes nothing, so callers may fire a check on every form edit and drop
//! the future whenever a newer input supersedes it.

use crate::config::SchedulingConfig;
use chrono::{NaiveDate, NaiveTime};
use marquee_core::interval::Interval;
use marquee_core::ledger::{LedgerError, ShowtimeLedger};
use marquee_core::types::{
    ConflictKind, ConflictResult, LedgerEntry, OccupancyStatus, RequestId, ScreenId,
    ShowtimeRequest,
};
use marquee_runtime::metrics::ConflictMetrics;
use std::sync::Arc;
use std::time::Instant;

/// Checks proposed showtimes against a screen's ledger.
#[derive(Clone)]
pub struct ConflictDetector {
    ledger: Arc<dyn ShowtimeLedger>,
    config: Arc<SchedulingConfig>,
}

impl ConflictDetector {
    /// Create a detector reading from `ledger`
    #[must_use]
    pub fn new(ledger: Arc<dyn ShowtimeLedger>, config: Arc<SchedulingConfig>) -> Self {
        Self { ledger, config }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    /// Check a proposed showtime against the current ledger.
    ///
    /// The buffer is added internally; `duration_minutes` is the runtime alone.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] only if the ledger cannot be read.
    #[tracing::instrument(skip(self), fields(screen = %screen_id))]
    pub async fn check_conflict(
        &self,
        screen_id: ScreenId,
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: u32,
    ) -> Result<ConflictResult, LedgerError> {
        let started = Instant::now();
        let entries = self.ledger.list_intervals(screen_id, date).await?;
        let result = evaluate(&self.config, date, start_time, duration_minutes, &entries);
        record(&result, started);
        Ok(result)
    }

    /// Re-check a stored request against the current ledger, ignoring its own
    /// pending entry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] only if the ledger cannot be read.
    #[tracing::instrument(skip(self, request), fields(request = %request.id))]
    pub async fn recheck(&self, request: &ShowtimeRequest) -> Result<ConflictResult, LedgerError> {
        let started = Instant::now();
        let entries = self.ledger.list_intervals(request.screen_id, request.date).await?;
        let others = without_request(entries, request.id);
        let result = evaluate(
            &self.config,
            request.date,
            request.start_time,
            request.movie_duration_minutes,
            &others,
        );
        record(&result, started);
        Ok(result)
    }

    /// Every candidate slot a showtime of this length could take.
    ///
    /// A slot qualifies when its interval ends by closing time and overlaps no
    /// approved interval. Pending requests do not remove slots.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] only if the ledger cannot be read.
    #[tracing::instrument(skip(self), fields(screen = %screen_id))]
    pub async fn free_slots(
        &self,
        screen_id: ScreenId,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<NaiveTime>, LedgerError> {
        let entries = self.ledger.list_intervals(screen_id, date).await?;
        let slots = fitting_slots(&self.config, date, duration_minutes, &entries, None).collect();
        Ok(slots)
    }
}

fn record(result: &ConflictResult, started: Instant) {
    let kind = result.kind();
    let label = match kind {
        ConflictKind::Clear => "clear",
        ConflictKind::Soft => "soft",
        ConflictKind::Hard => "hard",
    };
    ConflictMetrics::record_check(label, started.elapsed());
    if kind == ConflictKind::Hard {
        ConflictMetrics::record_suggestion(result.next_available_slot.is_some());
    }
    tracing::debug!(
        outcome = label,
        occupied_by = result.conflicting_movie_title.as_deref(),
        next_slot = ?result.next_available_slot,
        "Conflict check complete"
    );
}

fn without_request(entries: Vec<LedgerEntry>, request_id: RequestId) -> Vec<LedgerEntry> {
    entries
        .into_iter()
        .filter(|entry| entry.request_id != request_id)
        .collect()
}

/// Classify a proposed showtime against ledger entries.
///
/// Pure; this is the whole detector minus the ledger read.
#[must_use]
pub fn evaluate(
    config: &SchedulingConfig,
    date: NaiveDate,
    start_time: NaiveTime,
    duration_minutes: u32,
    entries: &[LedgerEntry],
) -> ConflictResult {
    let proposed = Interval::for_showtime(date, start_time, duration_minutes, config.buffer_minutes);

    if let Some(blocking) = earliest_overlap(&proposed, entries, OccupancyStatus::Approved) {
        let next = fitting_slots(config, date, duration_minutes, entries, Some(start_time)).next();
        return ConflictResult::hard(blocking, next);
    }

    if let Some(competing) = earliest_overlap(&proposed, entries, OccupancyStatus::Pending) {
        return ConflictResult::soft(competing);
    }

    ConflictResult::clear()
}

/// First candidate at or after `from` that fits, if any.
#[must_use]
pub fn next_available_slot(
    config: &SchedulingConfig,
    date: NaiveDate,
    from: NaiveTime,
    duration_minutes: u32,
    entries: &[LedgerEntry],
) -> Option<NaiveTime> {
    fitting_slots(config, date, duration_minutes, entries, Some(from)).next()
}

fn earliest_overlap<'a>(
    proposed: &Interval,
    entries: &'a [LedgerEntry],
    status: OccupancyStatus,
) -> Option<&'a LedgerEntry> {
    entries
        .iter()
        .filter(|entry| entry.status == status && entry.interval.overlaps(proposed))
        .min_by_key(|entry| entry.interval.start())
}

fn fitting_slots<'a>(
    config: &'a SchedulingConfig,
    date: NaiveDate,
    duration_minutes: u32,
    entries: &'a [LedgerEntry],
    from: Option<NaiveTime>,
) -> impl Iterator<Item = NaiveTime> + 'a {
    let closing = config.closing_at(date);
    config
        .candidate_slots
        .iter()
        .copied()
        .filter(move |slot| from.is_none_or(|from| *slot >= from))
        .filter(move |slot| {
            let candidate = Interval::for_showtime(date, *slot, duration_minutes, config.buffer_minutes);
            candidate.ends_by(closing)
                && !entries.iter().any(|entry| {
                    entry.status == OccupancyStatus::Approved && entry.interval.overlaps(&candidate)
                })
        })
}
