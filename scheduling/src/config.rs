//! Configuration for the scheduling engines.
//!
//! Loads configuration from environment variables with sensible defaults.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use marquee_core::interval::DEFAULT_BUFFER_MINUTES;
use marquee_runtime::retry::RetryPolicy;
use marquee_runtime::DEFAULT_MAX_STEPS;
use serde::{Deserialize, Deserializer, Serialize};
use std::env;
use std::time::Duration;

/// Minutes in a day; a closing time of `24:00`
const MINUTES_PER_DAY: u32 = 24 * 60;

/// Scheduling configuration loaded from environment variables.
///
/// Also deserializable from a config document; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Turnover buffer added after every showtime
    pub buffer_minutes: u32,
    /// Bookable start times for a day, ascending
    #[serde(deserialize_with = "sorted_slots")]
    pub candidate_slots: Vec<NaiveTime>,
    /// Minutes after midnight by which a suggested slot must end (1440 = midnight)
    pub closing_minutes: u32,
    /// Retries for a failed commit, after the first attempt
    pub commit_max_retries: usize,
    /// Delay before the first commit retry in milliseconds
    pub commit_initial_delay_ms: u64,
    /// Cap on the delay between commit retries in milliseconds
    pub commit_max_delay_ms: u64,
    /// Bound on actions the driver reduces for one command
    pub max_feedback_steps: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            buffer_minutes: DEFAULT_BUFFER_MINUTES,
            candidate_slots: hourly_slots(9, 23),
            closing_minutes: MINUTES_PER_DAY,
            commit_max_retries: 3,
            commit_initial_delay_ms: 100,
            commit_max_delay_ms: 2000,
            max_feedback_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl SchedulingConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparseable variables fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            buffer_minutes: env::var("MARQUEE_BUFFER_MINUTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.buffer_minutes),
            candidate_slots: env::var("MARQUEE_CANDIDATE_SLOTS")
                .ok()
                .and_then(|s| parse_slot_list(&s))
                .unwrap_or(defaults.candidate_slots),
            closing_minutes: env::var("MARQUEE_CLOSING_TIME")
                .ok()
                .and_then(|s| parse_clock_minutes(&s))
                .unwrap_or(defaults.closing_minutes),
            commit_max_retries: env::var("MARQUEE_COMMIT_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.commit_max_retries),
            commit_initial_delay_ms: env::var("MARQUEE_COMMIT_INITIAL_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.commit_initial_delay_ms),
            commit_max_delay_ms: env::var("MARQUEE_COMMIT_MAX_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.commit_max_delay_ms),
            max_feedback_steps: env::var("MARQUEE_MAX_FEEDBACK_STEPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_feedback_steps),
        }
    }

    /// Retry policy for the approval commit
    #[must_use]
    pub fn commit_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.commit_max_retries)
            .initial_delay(Duration::from_millis(self.commit_initial_delay_ms))
            .max_delay(Duration::from_millis(self.commit_max_delay_ms))
            .build()
    }

    /// Instant on `date` by which a suggested showtime must have ended
    #[must_use]
    pub fn closing_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(NaiveTime::MIN) + TimeDelta::minutes(i64::from(self.closing_minutes))
    }
}

/// Whole-hour slots from `first` to `last` inclusive
fn hourly_slots(first: u32, last: u32) -> Vec<NaiveTime> {
    (first..=last)
        .filter_map(|hour| NaiveTime::from_hms_opt(hour, 0, 0))
        .collect()
}

/// Deserialize a slot list, sorted and deduplicated like the environment form
fn sorted_slots<'de, D>(deserializer: D) -> Result<Vec<NaiveTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut slots = Vec::<NaiveTime>::deserialize(deserializer)?;
    slots.sort_unstable();
    slots.dedup();
    Ok(slots)
}

/// Parse `HH:MM` into minutes after midnight; `24:00` is accepted.
fn parse_clock_minutes(text: &str) -> Option<u32> {
    let (hours, minutes) = text.trim().split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    let total = hours.checked_mul(60)?.checked_add(minutes)?;
    (total <= MINUTES_PER_DAY).then_some(total)
}

/// Parse a comma-separated `HH:MM` list, sorted and deduplicated.
///
/// Any malformed entry rejects the whole list.
fn parse_slot_list(text: &str) -> Option<Vec<NaiveTime>> {
    let mut slots = text
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| NaiveTime::parse_from_str(part.trim(), "%H:%M").ok())
        .collect::<Option<Vec<_>>>()?;
    slots.sort_unstable();
    slots.dedup();
    (!slots.is_empty()).then_some(slots)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_hourly_until_late_evening() {
        let config = SchedulingConfig::default();
        assert_eq!(config.buffer_minutes, 15);
        assert_eq!(config.candidate_slots.len(), 15);
        assert_eq!(config.candidate_slots[0], NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(
            config.candidate_slots.last().copied(),
            NaiveTime::from_hms_opt(23, 0, 0)
        );
    }

    #[test]
    fn midnight_closing_is_the_next_day() {
        let config = SchedulingConfig::default();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(
            config.closing_at(date),
            NaiveDate::from_ymd_opt(2024, 5, 2).unwrap().and_time(NaiveTime::MIN)
        );
    }

    #[test]
    fn clock_parsing() {
        assert_eq!(parse_clock_minutes("24:00"), Some(1440));
        assert_eq!(parse_clock_minutes("23:30"), Some(1410));
        assert_eq!(parse_clock_minutes("24:30"), None);
        assert_eq!(parse_clock_minutes("12:75"), None);
        assert_eq!(parse_clock_minutes("noon"), None);
    }

    #[test]
    fn slot_lists_are_sorted_and_strict() {
        let slots = parse_slot_list("18:30, 10:00,14:15,10:00").unwrap();
        assert_eq!(
            slots,
            vec![
                NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(14, 15, 0).unwrap(),
                NaiveTime::from_hms_opt(18, 30, 0).unwrap(),
            ]
        );
        assert_eq!(parse_slot_list("10:00,late"), None);
        assert_eq!(parse_slot_list(""), None);
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let config: SchedulingConfig =
            serde_json::from_str(r#"{"buffer_minutes": 20, "closing_minutes": 1380}"#).unwrap();
        assert_eq!(config.buffer_minutes, 20);
        assert_eq!(config.closing_minutes, 23 * 60);
        assert_eq!(config.candidate_slots, SchedulingConfig::default().candidate_slots);
    }

    #[test]
    fn document_slots_are_sorted_and_deduplicated() {
        let config: SchedulingConfig = serde_json::from_str(
            r#"{"candidate_slots": ["18:00:00", "10:00:00", "14:30:00", "10:00:00"]}"#,
        )
        .unwrap();
        assert_eq!(
            config.candidate_slots,
            vec![
                NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
                NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn retry_policy_follows_config() {
        let config = SchedulingConfig {
            commit_max_retries: 5,
            commit_initial_delay_ms: 10,
            commit_max_delay_ms: 50,
            ..SchedulingConfig::default()
        };
        let policy = config.commit_retry_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(10));
        assert_eq!(policy.max_delay, Duration::from_millis(50));
    }
}
