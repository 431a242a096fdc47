//! Occupied time ranges on a screen.
//!
//! An [`Interval`] is the half-open range `[start, end)` a showtime holds a
//! screen for. Its end includes the turnover buffer, so two showtimes built
//! with the same buffer can never be scheduled back to back with zero gap.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Turnover buffer added after every showtime unless configured otherwise.
pub const DEFAULT_BUFFER_MINUTES: u32 = 15;

/// Error returned when an interval would end before it starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Interval ends at {end} before it starts at {start}")]
pub struct InvertedInterval {
    /// Requested start
    pub start: NaiveDateTime,
    /// Requested end
    pub end: NaiveDateTime,
}

/// Half-open time range `[start, end)` occupied on a screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Interval {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl Interval {
    /// Create an interval from explicit bounds.
    ///
    /// # Errors
    ///
    /// Returns [`InvertedInterval`] if `end` is before `start`.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, InvertedInterval> {
        if end < start {
            return Err(InvertedInterval { start, end });
        }
        Ok(Self { start, end })
    }

    /// Build the interval a showtime occupies.
    ///
    /// `end = date + start_time + duration + buffer`. The end may fall on the
    /// following calendar day for late screenings.
    #[must_use]
    pub fn for_showtime(
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: u32,
        buffer_minutes: u32,
    ) -> Self {
        let start = date.and_time(start_time);
        let occupied = TimeDelta::minutes(i64::from(duration_minutes) + i64::from(buffer_minutes));
        Self {
            start,
            end: start + occupied,
        }
    }

    /// Inclusive start of the range
    #[must_use]
    pub const fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// Exclusive end of the range
    #[must_use]
    pub const fn end(&self) -> NaiveDateTime {
        self.end
    }

    /// Length of the range, buffer included
    #[must_use]
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Whether the two ranges share any instant.
    ///
    /// `a.start < b.end && b.start < a.end`; touching ranges do not overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether the range finishes at or before `limit`
    #[must_use]
    pub fn ends_by(&self, limit: NaiveDateTime) -> bool {
        self.end <= limit
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}–{}",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%H:%M")
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn at(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    #[test]
    fn end_includes_buffer() {
        let interval = Interval::for_showtime(date(), at(18, 0), 120, 15);
        assert_eq!(interval.end(), date().and_time(at(20, 15)));
        assert_eq!(interval.duration(), TimeDelta::minutes(135));
    }

    #[test]
    fn touching_intervals_do_not_overlap() {
        let first = Interval::for_showtime(date(), at(18, 0), 120, 15);
        let second = Interval::for_showtime(date(), at(20, 15), 90, 15);
        assert!(!first.overlaps(&second));
        assert!(!second.overlaps(&first));
    }

    #[test]
    fn contained_interval_overlaps() {
        let outer = Interval::for_showtime(date(), at(14, 0), 180, 0);
        let inner = Interval::for_showtime(date(), at(15, 0), 30, 0);
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn late_show_rolls_into_next_day() {
        let interval = Interval::for_showtime(date(), at(23, 0), 120, 15);
        assert_eq!(interval.end().date(), date().succ_opt().unwrap());
        assert!(!interval.ends_by(date().succ_opt().unwrap().and_time(at(0, 0))));
    }

    #[test]
    fn inverted_bounds_rejected() {
        let start = date().and_time(at(12, 0));
        let end = date().and_time(at(11, 0));
        assert!(Interval::new(start, end).is_err());
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(
            a_start in 0u32..1440, a_len in 0u32..300,
            b_start in 0u32..1440, b_len in 0u32..300,
        ) {
            let a = Interval::for_showtime(date(), at(a_start / 60, a_start % 60), a_len, 0);
            let b = Interval::for_showtime(date(), at(b_start / 60, b_start % 60), b_len, 0);
            prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }

        #[test]
        fn nonempty_interval_overlaps_itself(start in 0u32..1440, len in 1u32..300, buffer in 0u32..30) {
            let a = Interval::for_showtime(date(), at(start / 60, start % 60), len, buffer);
            prop_assert!(a.overlaps(&a));
        }
    }
}
