//! Prometheus metrics for observability and monitoring.
//!
//! Recorder structs group the metrics each engine emits:
//! - conflict checks and slot suggestions
//! - submissions, decisions, stale approvals and lost races
//! - entitlement grants and access checks
//! - store retries
//! - driver actions and effects
//!
//! Recording is always safe: without an installed recorder the `metrics`
//! macros are no-ops. Embedding applications call
//! [`MetricsExporter::install`] once at startup.
//!
//! # Example
//!
//! ```rust,no_run
//! use marquee_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // Serve this from the application's /metrics route
//! let text = exporter.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder installed into the global `metrics` facade.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder that is already installed (another exporter, or an earlier
    /// test) is tolerated with a warning; [`Self::render`] then returns `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                register_metrics();
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "marquee_conflict_checks_total",
        "Conflict checks performed, labelled by outcome (clear, soft, hard)"
    );
    describe_histogram!(
        "marquee_conflict_check_duration_seconds",
        "Time taken to evaluate a proposed interval against a ledger"
    );
    describe_counter!(
        "marquee_slot_suggestions_total",
        "Hard conflicts, labelled by whether a next slot was found"
    );

    describe_counter!(
        "marquee_requests_submitted_total",
        "Requests created pending, labelled by kind (showtime, registration)"
    );
    describe_counter!(
        "marquee_decisions_total",
        "Committed decisions, labelled by kind and decision"
    );
    describe_counter!(
        "marquee_stale_approvals_total",
        "Approvals refused because an overlapping showtime was approved first"
    );
    describe_counter!(
        "marquee_lost_races_total",
        "Decisions that found the request already decided"
    );
    describe_counter!(
        "marquee_notification_failures_total",
        "Submitter notifications that failed to deliver"
    );

    describe_counter!(
        "marquee_entitlements_granted_total",
        "Entitlements granted, labelled by kind (rent, buy)"
    );
    describe_counter!(
        "marquee_access_checks_total",
        "Playback access checks, labelled by result"
    );

    describe_counter!("marquee_retry_attempts_total", "Store operation retries");
    describe_counter!(
        "marquee_retry_successes_total",
        "Store operations that succeeded after retrying"
    );
    describe_counter!(
        "marquee_retry_exhausted_total",
        "Store operations that failed after exhausting retries"
    );

    describe_counter!(
        "marquee_driver_actions_total",
        "Actions reduced by the driver"
    );
    describe_histogram!(
        "marquee_driver_reduce_duration_seconds",
        "Time taken by a single reduce call"
    );
    describe_histogram!(
        "marquee_driver_effect_duration_seconds",
        "Time taken by a single future effect"
    );
    describe_counter!(
        "marquee_driver_feedback_limit_total",
        "Driver runs aborted for exceeding the step bound"
    );
}

/// Conflict detector metrics recorder.
pub struct ConflictMetrics;

impl ConflictMetrics {
    /// Record a completed check.
    pub fn record_check(outcome: &'static str, duration: Duration) {
        counter!("marquee_conflict_checks_total", "outcome" => outcome).increment(1);
        histogram!("marquee_conflict_check_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record whether a hard conflict came with a suggestion.
    pub fn record_suggestion(found: bool) {
        let label = if found { "found" } else { "none" };
        counter!("marquee_slot_suggestions_total", "result" => label).increment(1);
    }
}

/// Approval workflow metrics recorder.
pub struct ApprovalMetrics;

impl ApprovalMetrics {
    /// Record a pending request being created.
    pub fn record_submission(kind: &'static str) {
        counter!("marquee_requests_submitted_total", "kind" => kind).increment(1);
    }

    /// Record a committed decision.
    pub fn record_decision(kind: &'static str, decision: &'static str) {
        counter!("marquee_decisions_total", "kind" => kind, "decision" => decision).increment(1);
    }

    /// Record an approval refused as stale.
    pub fn record_stale() {
        counter!("marquee_stale_approvals_total").increment(1);
    }

    /// Record a decision that lost the compare-and-set.
    pub fn record_lost_race(kind: &'static str) {
        counter!("marquee_lost_races_total", "kind" => kind).increment(1);
    }

    /// Record a failed submitter notification.
    pub fn record_notification_failure() {
        counter!("marquee_notification_failures_total").increment(1);
    }
}

/// Entitlement tracker metrics recorder.
pub struct EntitlementMetrics;

impl EntitlementMetrics {
    /// Record a granted entitlement.
    pub fn record_grant(kind: &'static str) {
        counter!("marquee_entitlements_granted_total", "kind" => kind).increment(1);
    }

    /// Record an access check.
    pub fn record_access_check(granted: bool) {
        let label = if granted { "granted" } else { "denied" };
        counter!("marquee_access_checks_total", "result" => label).increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt(operation: &'static str) {
        counter!("marquee_retry_attempts_total", "operation" => operation).increment(1);
    }

    /// Record a successful retry.
    pub fn record_success(operation: &'static str) {
        counter!("marquee_retry_successes_total", "operation" => operation).increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted(operation: &'static str) {
        counter!("marquee_retry_exhausted_total", "operation" => operation).increment(1);
    }
}

/// Driver metrics recorder.
pub struct DriverMetrics;

impl DriverMetrics {
    /// Record a reduced action.
    pub fn record_action(duration: Duration) {
        counter!("marquee_driver_actions_total").increment(1);
        histogram!("marquee_driver_reduce_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an executed future effect.
    pub fn record_effect(duration: Duration) {
        histogram!("marquee_driver_effect_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a run aborted at the step bound.
    pub fn record_feedback_limit() {
        counter!("marquee_driver_feedback_limit_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_exporter_is_a_noop() {
        ConflictMetrics::record_check("clear", Duration::from_micros(40));
        ApprovalMetrics::record_decision("showtime", "approved");
        EntitlementMetrics::record_access_check(false);
        assert!(MetricsExporter::new().render().is_none());
    }

    #[test]
    fn exporter_renders_recorded_metrics() {
        let mut exporter = MetricsExporter::new();
        assert!(exporter.install().is_ok());

        ConflictMetrics::record_check("hard", Duration::from_millis(1));
        ConflictMetrics::record_suggestion(true);
        ApprovalMetrics::record_stale();
        RetryMetrics::record_attempt("transition_request");

        // Another test binary may already own the global recorder
        if let Some(rendered) = exporter.render() {
            assert!(rendered.contains("marquee_conflict_checks_total"));
            assert!(rendered.contains("marquee_stale_approvals_total"));
            assert!(rendered.contains("marquee_retry_attempts_total"));
        }
    }
}
