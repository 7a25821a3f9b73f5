//! The structured `TimeSpan` value type.
//!
//! A `TimeSpan` is what trackers publish and what consumers render. All
//! arithmetic happens on the integer millisecond count; the structured fields
//! exist for display and are always kept normalized.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

const MS_PER_SECOND: u64 = 1_000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;

/// A normalized span of time split into hours, minutes, seconds and milliseconds.
///
/// Minutes and seconds are always below 60 and milliseconds below 1000; hours
/// are unbounded. Conversion to and from a millisecond count is exact:
/// `TimeSpan::from_millis(ms).as_millis() == ms` for every `ms`. Spans longer
/// than `u64::MAX` milliseconds saturate there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "TimeSpanParts")]
pub struct TimeSpan {
    hours: u64,
    minutes: u64,
    seconds: u64,
    milliseconds: u64,
}

/// Components as written by hand, possibly overflowing or partial.
#[derive(Default, Deserialize)]
#[serde(default)]
struct TimeSpanParts {
    hours: u64,
    minutes: u64,
    seconds: u64,
    milliseconds: u64,
}

impl From<TimeSpanParts> for TimeSpan {
    fn from(parts: TimeSpanParts) -> Self {
        TimeSpan::new(parts.hours, parts.minutes, parts.seconds, parts.milliseconds)
    }
}

impl TimeSpan {
    pub const ZERO: TimeSpan = TimeSpan {
        hours: 0,
        minutes: 0,
        seconds: 0,
        milliseconds: 0,
    };

    /// Builds a span from possibly overflowing components, normalizing them.
    ///
    /// `TimeSpan::new(0, 0, 90, 0)` is one minute and thirty seconds.
    pub fn new(hours: u64, minutes: u64, seconds: u64, milliseconds: u64) -> Self {
        Self::from_millis(
            hours
                .saturating_mul(MS_PER_HOUR)
                .saturating_add(minutes.saturating_mul(MS_PER_MINUTE))
                .saturating_add(seconds.saturating_mul(MS_PER_SECOND))
                .saturating_add(milliseconds),
        )
    }

    pub fn from_secs(seconds: u64) -> Self {
        Self::from_millis(seconds.saturating_mul(MS_PER_SECOND))
    }

    pub fn from_millis(ms: u64) -> Self {
        Self {
            hours: ms / MS_PER_HOUR,
            minutes: (ms % MS_PER_HOUR) / MS_PER_MINUTE,
            seconds: (ms % MS_PER_MINUTE) / MS_PER_SECOND,
            milliseconds: ms % MS_PER_SECOND,
        }
    }

    pub fn as_millis(&self) -> u64 {
        self.hours
            .saturating_mul(MS_PER_HOUR)
            .saturating_add(self.minutes * MS_PER_MINUTE)
            .saturating_add(self.seconds * MS_PER_SECOND)
            .saturating_add(self.milliseconds)
    }

    pub fn hours(&self) -> u64 {
        self.hours
    }

    pub fn minutes(&self) -> u64 {
        self.minutes
    }

    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    pub fn milliseconds(&self) -> u64 {
        self.milliseconds
    }

    pub fn is_zero(&self) -> bool {
        self.as_millis() == 0
    }

    /// Subtracts `rhs`, flooring at zero.
    pub fn saturating_sub(self, rhs: TimeSpan) -> TimeSpan {
        TimeSpan::from_millis(self.as_millis().saturating_sub(rhs.as_millis()))
    }

    /// Formats as `HH:MM:SS`, dropping milliseconds.
    pub fn format_hms(&self) -> String {
        format!("{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }

    /// Formats as `HH:MM:SS.cc` with centisecond precision.
    pub fn format_hms_cs(&self) -> String {
        format!(
            "{:02}:{:02}:{:02}.{:02}",
            self.hours,
            self.minutes,
            self.seconds,
            self.milliseconds / 10
        )
    }
}

impl PartialOrd for TimeSpan {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeSpan {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_millis().cmp(&other.as_millis())
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}.{:03}",
            self.hours, self.minutes, self.seconds, self.milliseconds
        )
    }
}

impl From<std::time::Duration> for TimeSpan {
    /// Sub-millisecond precision is truncated.
    fn from(duration: std::time::Duration) -> Self {
        TimeSpan::from_millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

impl From<TimeSpan> for std::time::Duration {
    fn from(span: TimeSpan) -> Self {
        std::time::Duration::from_millis(span.as_millis())
    }
}
