//! In-memory showtime ledger and a fault-injecting wrapper.
//!
//! - [`InMemoryLedger`]: HashMap-backed ledger whose transitions run under a
//!   single lock, giving the same all-or-nothing compare-and-set the
//!   Postgres ledger gets from a transaction
//! - [`FlakyLedger`]: wraps any ledger and fails a scripted number of calls

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

use marquee_core::interval::Interval;
use marquee_core::ledger::{
    LedgerError, ShowtimeLedger, ShowtimeTransition, StoreFuture, TransitionOutcome,
};
use marquee_core::types::{
    Approval, DecisionId, LedgerEntry, OccupancyStatus, PublishedShowtime, RequestId,
    RequestStatus, ScreenId, ShowtimeRequest, UserId,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct LedgerState {
    requests: HashMap<RequestId, ShowtimeRequest>,
    submission_order: Vec<RequestId>,
    published: HashMap<RequestId, PublishedShowtime>,
    occupied: HashMap<RequestId, Interval>,
}

impl LedgerState {
    fn entries(&self, screen_id: ScreenId, date: NaiveDate) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .submission_order
            .iter()
            .filter_map(|id| self.requests.get(id))
            .filter(|request| request.screen_id == screen_id && request.date == date)
            .filter_map(|request| {
                let status = match &request.status {
                    RequestStatus::Pending => OccupancyStatus::Pending,
                    RequestStatus::Approved(_) => OccupancyStatus::Approved,
                    RequestStatus::Rejected(_) => return None,
                };
                Some(LedgerEntry {
                    request_id: request.id,
                    movie_title: request.movie_title.clone(),
                    interval: *self.occupied.get(&request.id)?,
                    status,
                })
            })
            .collect();
        entries.sort_by_key(|entry| entry.interval.start());
        entries
    }
}

/// In-memory ledger for fast, deterministic testing.
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// inspection while the engine owns another.
///
/// # Example
///
/// ```
/// use marquee_testing::InMemoryLedger;
///
/// let ledger = InMemoryLedger::new();
/// assert!(ledger.published().is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    /// Create an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
        }
    }

    /// Seed an already-approved, published showtime sized with `buffer_minutes`.
    ///
    /// Bypasses the overlap check so tests can set up any ledger shape.
    pub fn insert_approved(
        &self,
        mut request: ShowtimeRequest,
        buffer_minutes: u32,
        approved_by: UserId,
        approved_at: DateTime<Utc>,
    ) -> RequestId {
        let showtime = PublishedShowtime::from_request(&request, buffer_minutes, approved_at);
        request.status = RequestStatus::Approved(Approval {
            approved_by,
            approved_at,
            decision_id: DecisionId::new(),
        });
        let id = request.id;
        let mut state = self.state.lock().unwrap();
        state.submission_order.push(id);
        state.requests.insert(id, request);
        state.occupied.insert(id, showtime.interval);
        state.published.insert(id, showtime);
        id
    }

    /// Interval a request currently holds, as stored
    #[must_use]
    pub fn occupied_interval(&self, request_id: RequestId) -> Option<Interval> {
        let state = self.state.lock().unwrap();
        state.occupied.get(&request_id).copied()
    }

    /// Every published showtime
    #[must_use]
    pub fn published(&self) -> Vec<PublishedShowtime> {
        let state = self.state.lock().unwrap();
        let mut published: Vec<_> = state.published.values().cloned().collect();
        published.sort_by_key(|showtime| showtime.interval.start());
        published
    }

    /// Current status of a request
    #[must_use]
    pub fn status_of(&self, request_id: RequestId) -> Option<RequestStatus> {
        let state = self.state.lock().unwrap();
        state.requests.get(&request_id).map(|r| r.status.clone())
    }

    /// Intervals of approved entries on a (screen, date)
    #[must_use]
    pub fn approved_intervals(&self, screen_id: ScreenId, date: NaiveDate) -> Vec<Interval> {
        let state = self.state.lock().unwrap();
        state
            .entries(screen_id, date)
            .into_iter()
            .filter(|entry| entry.status == OccupancyStatus::Approved)
            .map(|entry| entry.interval)
            .collect()
    }

    fn apply_transition(
        &self,
        request_id: RequestId,
        transition: &ShowtimeTransition,
    ) -> Result<TransitionOutcome, LedgerError> {
        let mut state = self.state.lock().unwrap();

        let Some(request) = state.requests.get(&request_id) else {
            return Err(LedgerError::RequestNotFound(request_id.to_string()));
        };
        if !request.status.is_pending() {
            return Ok(TransitionOutcome::AlreadyDecided(request.status.clone()));
        }

        if let ShowtimeTransition::Approve { showtime, .. } = transition {
            let blocking = state
                .entries(request.screen_id, request.date)
                .into_iter()
                .find(|entry| {
                    entry.status == OccupancyStatus::Approved
                        && entry.request_id != request_id
                        && entry.interval.overlaps(&showtime.interval)
                });
            if let Some(blocking) = blocking {
                return Ok(TransitionOutcome::Stale { blocking });
            }
            state.occupied.insert(request_id, showtime.interval);
            state.published.insert(request_id, showtime.clone());
        }

        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or_else(|| LedgerError::RequestNotFound(request_id.to_string()))?;
        request.status = transition.target_status();
        Ok(TransitionOutcome::Committed(request.clone()))
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ShowtimeLedger for InMemoryLedger {
    fn list_intervals(
        &self,
        screen_id: ScreenId,
        date: NaiveDate,
    ) -> StoreFuture<'_, Vec<LedgerEntry>, LedgerError> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            Ok(state.entries(screen_id, date))
        })
    }

    fn create_pending_request(
        &self,
        request: ShowtimeRequest,
        occupied: Interval,
    ) -> StoreFuture<'_, RequestId, LedgerError> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let id = request.id;
            // A retried create must not overwrite a request decided meanwhile
            if !state.requests.contains_key(&id) {
                state.requests.insert(id, request);
                state.occupied.insert(id, occupied);
                state.submission_order.push(id);
            }
            Ok(id)
        })
    }

    fn load_request(
        &self,
        request_id: RequestId,
    ) -> StoreFuture<'_, Option<ShowtimeRequest>, LedgerError> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            Ok(state.requests.get(&request_id).cloned())
        })
    }

    fn list_pending_requests(&self) -> StoreFuture<'_, Vec<ShowtimeRequest>, LedgerError> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            let mut pending: Vec<ShowtimeRequest> = state
                .submission_order
                .iter()
                .filter_map(|id| state.requests.get(id))
                .filter(|request| request.is_pending())
                .cloned()
                .collect();
            // Stable sort keeps submission order for equal timestamps
            pending.sort_by_key(|request| request.submitted_at);
            Ok(pending)
        })
    }

    fn transition_request(
        &self,
        request_id: RequestId,
        transition: ShowtimeTransition,
    ) -> StoreFuture<'_, TransitionOutcome, LedgerError> {
        Box::pin(async move { self.apply_transition(request_id, &transition) })
    }
}

/// Ledger wrapper that fails a scripted number of calls.
///
/// Two transition failure modes are distinguished:
/// - [`FlakyLedger::fail_transitions`]: the call fails before reaching the
///   store, nothing is written
/// - [`FlakyLedger::lose_acknowledgements`]: the store commits, then the
///   caller sees an error, as when a connection drops after `COMMIT`
pub struct FlakyLedger<L> {
    inner: L,
    failing_reads: AtomicUsize,
    failing_transitions: AtomicUsize,
    lost_acknowledgements: AtomicUsize,
    transition_calls: AtomicUsize,
}

impl<L: ShowtimeLedger> FlakyLedger<L> {
    /// Wrap a ledger; no faults until scripted
    #[must_use]
    pub const fn new(inner: L) -> Self {
        Self {
            inner,
            failing_reads: AtomicUsize::new(0),
            failing_transitions: AtomicUsize::new(0),
            lost_acknowledgements: AtomicUsize::new(0),
            transition_calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` interval reads
    #[must_use]
    pub fn fail_reads(self, count: usize) -> Self {
        self.failing_reads.store(count, Ordering::SeqCst);
        self
    }

    /// Fail the next `count` transitions without applying them
    #[must_use]
    pub fn fail_transitions(self, count: usize) -> Self {
        self.failing_transitions.store(count, Ordering::SeqCst);
        self
    }

    /// Apply the next `count` transitions but report them as failed
    #[must_use]
    pub fn lose_acknowledgements(self, count: usize) -> Self {
        self.lost_acknowledgements.store(count, Ordering::SeqCst);
        self
    }

    /// Transition calls received so far, failed ones included
    #[must_use]
    pub fn transition_calls(&self) -> usize {
        self.transition_calls.load(Ordering::SeqCst)
    }

    /// The wrapped ledger
    #[must_use]
    pub const fn inner(&self) -> &L {
        &self.inner
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl<L: ShowtimeLedger> ShowtimeLedger for FlakyLedger<L> {
    fn list_intervals(
        &self,
        screen_id: ScreenId,
        date: NaiveDate,
    ) -> StoreFuture<'_, Vec<LedgerEntry>, LedgerError> {
        if take_one(&self.failing_reads) {
            return Box::pin(async { Err(LedgerError::Unavailable("injected read timeout".into())) });
        }
        self.inner.list_intervals(screen_id, date)
    }

    fn create_pending_request(
        &self,
        request: ShowtimeRequest,
        occupied: Interval,
    ) -> StoreFuture<'_, RequestId, LedgerError> {
        self.inner.create_pending_request(request, occupied)
    }

    fn load_request(
        &self,
        request_id: RequestId,
    ) -> StoreFuture<'_, Option<ShowtimeRequest>, LedgerError> {
        self.inner.load_request(request_id)
    }

    fn list_pending_requests(&self) -> StoreFuture<'_, Vec<ShowtimeRequest>, LedgerError> {
        self.inner.list_pending_requests()
    }

    fn transition_request(
        &self,
        request_id: RequestId,
        transition: ShowtimeTransition,
    ) -> StoreFuture<'_, TransitionOutcome, LedgerError> {
        self.transition_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if take_one(&self.failing_transitions) {
                return Err(LedgerError::Unavailable("injected connection reset".into()));
            }
            let outcome = self.inner.transition_request(request_id, transition).await?;
            if take_one(&self.lost_acknowledgements) {
                return Err(LedgerError::Unavailable("injected lost acknowledgement".into()));
            }
            Ok(outcome)
        })
    }
}
