//! Temporal data types and time handling

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Microseconds since Unix epoch of the infinity sentinel, 9999-12-01T23:59:00Z.
pub const INFINITY_MICROS: i64 = 253_399_708_740_000_000;

/// Wire form of [`Bound::Infinity`].
pub const INFINITY_SENTINEL: &str = "9999-12-01T23:59:00Z";

/// A concrete point in time with microsecond precision, always strictly
/// before the infinity sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp {
    /// Microseconds since Unix epoch
    micros: i64,
}

impl Timestamp {
    /// Latest representable concrete instant.
    pub const MAX: Timestamp = Timestamp {
        micros: INFINITY_MICROS - 1,
    };

    /// Create a timestamp from microseconds since Unix epoch
    pub fn from_micros(micros: i64) -> Self {
        Self {
            micros: micros.min(INFINITY_MICROS - 1),
        }
    }

    /// Create a timestamp from milliseconds since Unix epoch
    pub fn from_millis(millis: i64) -> Self {
        Self::from_micros(millis.saturating_mul(1_000))
    }

    /// Create a timestamp from seconds since Unix epoch
    pub fn from_secs(secs: i64) -> Self {
        Self::from_micros(secs.saturating_mul(1_000_000))
    }

    /// Get current timestamp
    pub fn now() -> Self {
        Self::from_micros(Utc::now().timestamp_micros())
    }

    /// Convert from a chrono instant, rejecting anything at or past the sentinel.
    pub fn from_datetime(dt: DateTime<Utc>) -> Result<Self> {
        let micros = dt.timestamp_micros();
        if micros >= INFINITY_MICROS {
            return Err(Error::Temporal(format!(
                "{} is at or beyond the infinity sentinel {}",
                dt.to_rfc3339(),
                INFINITY_SENTINEL
            )));
        }
        Ok(Self { micros })
    }

    /// Parse an ISO-8601 instant (`2024-07-01T09:00:00Z`) or a plain date
    /// (`2024-07-01`, read as UTC midnight).
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_datetime(parse_datetime(s)?)
    }

    /// Get microseconds since Unix epoch
    pub fn as_micros(&self) -> i64 {
        self.micros
    }

    /// Get milliseconds since Unix epoch
    pub fn as_millis(&self) -> i64 {
        self.micros.div_euclid(1_000)
    }

    /// Get seconds since Unix epoch
    pub fn as_secs(&self) -> i64 {
        self.micros.div_euclid(1_000_000)
    }

    /// Convert to chrono DateTime
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let nanos = (self.micros.rem_euclid(1_000_000) * 1_000) as u32;
        DateTime::from_timestamp(self.as_secs(), nanos).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Add a duration; `None` on overflow or when the result would reach the sentinel.
    pub fn checked_add(&self, duration: Duration) -> Option<Self> {
        let delta = duration.num_microseconds()?;
        let micros = self.micros.checked_add(delta)?;
        (micros < INFINITY_MICROS).then_some(Self { micros })
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.to_datetime().to_rfc3339_opts(SecondsFormat::AutoSi, true)
        )
    }
}

impl TryFrom<DateTime<Utc>> for Timestamp {
    type Error = Error;

    fn try_from(dt: DateTime<Utc>) -> Result<Self> {
        Self::from_datetime(dt)
    }
}

impl TryFrom<String> for Timestamp {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.to_string()
    }
}

/// Upper end of an interval: a concrete instant or the infinity sentinel.
///
/// `Infinity` orders above every concrete instant. It is never converted to
/// a number, so arithmetic on it cannot overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Bound {
    /// A concrete instant
    At(Timestamp),
    /// Still currently true / believed
    Infinity,
}

impl Bound {
    /// Check for the sentinel
    pub fn is_infinite(&self) -> bool {
        matches!(self, Bound::Infinity)
    }

    /// The concrete instant, if any
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Bound::At(ts) => Some(*ts),
            Bound::Infinity => None,
        }
    }

    /// Add a duration. `Infinity` stays `Infinity`; a concrete instant that
    /// would overflow or reach the sentinel saturates to `Infinity`.
    pub fn saturating_add(self, duration: Duration) -> Bound {
        match self {
            Bound::Infinity => Bound::Infinity,
            Bound::At(ts) => ts.checked_add(duration).map_or(Bound::Infinity, Bound::At),
        }
    }

    /// Parse a wire value; the sentinel (or anything later) reads as `Infinity`.
    pub fn parse(s: &str) -> Result<Self> {
        let dt = parse_datetime(s)?;
        if dt.timestamp_micros() >= INFINITY_MICROS {
            Ok(Bound::Infinity)
        } else {
            Timestamp::from_datetime(dt).map(Bound::At)
        }
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::Temporal(format!("cannot parse timestamp {s:?}: {e}")))?;
    date.and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| Error::Temporal(format!("invalid date {s:?}")))
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Timestamp::parse(s)
    }
}

impl FromStr for Bound {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Bound::parse(s)
    }
}

impl From<Timestamp> for Bound {
    fn from(ts: Timestamp) -> Self {
        Bound::At(ts)
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::At(ts) => write!(f, "{ts}"),
            Bound::Infinity => write!(f, "{INFINITY_SENTINEL}"),
        }
    }
}

impl TryFrom<String> for Bound {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Bound::parse(&s)
    }
}

impl From<Bound> for String {
    fn from(bound: Bound) -> Self {
        bound.to_string()
    }
}

/// Half-open time range `[from, thru)`; `from < thru` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct Interval {
    from: Timestamp,
    thru: Bound,
}

#[derive(Deserialize)]
struct RawInterval {
    from: Timestamp,
    thru: Bound,
}

impl TryFrom<RawInterval> for Interval {
    type Error = Error;

    fn try_from(raw: RawInterval) -> Result<Self> {
        Interval::new(raw.from, raw.thru)
    }
}

impl Interval {
    /// Create an interval, rejecting zero-width and inverted ranges
    pub fn new(from: Timestamp, thru: impl Into<Bound>) -> Result<Self> {
        let thru = thru.into();
        if Bound::At(from) >= thru {
            return Err(Error::InvalidInterval(format!(
                "[{from}, {thru}) is empty or inverted"
            )));
        }
        Ok(Self { from, thru })
    }

    /// Create `[from, INFINITY)`
    pub fn open(from: Timestamp) -> Self {
        Self {
            from,
            thru: Bound::Infinity,
        }
    }

    /// Inclusive lower end
    pub fn from(&self) -> Timestamp {
        self.from
    }

    /// Exclusive upper end
    pub fn thru(&self) -> Bound {
        self.thru
    }

    /// Check whether `thru` is the sentinel
    pub fn is_infinite(&self) -> bool {
        self.thru.is_infinite()
    }

    /// Check if a timestamp is within this interval
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.from <= ts && Bound::At(ts) < self.thru
    }

    /// Like [`Interval::contains`], but an `Infinity` probe only matches
    /// intervals that are themselves still open.
    pub fn contains_bound(&self, bound: Bound) -> bool {
        match bound {
            Bound::At(ts) => self.contains(ts),
            Bound::Infinity => self.is_infinite(),
        }
    }

    /// Check whether two intervals share at least one instant
    pub fn overlaps(&self, other: &Interval) -> bool {
        Bound::At(self.from) < other.thru && Bound::At(other.from) < self.thru
    }

    /// Common part of two intervals, if any
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let from = self.from.max(other.from);
        let thru = self.thru.min(other.thru);
        Interval::new(from, thru).ok()
    }

    /// Same start, closed at `at`. Fails if that would be empty or would
    /// extend the interval.
    pub fn closed_at(&self, at: Timestamp) -> Result<Interval> {
        if Bound::At(at) > self.thru {
            return Err(Error::InvalidInterval(format!(
                "cannot close {self} at {at}: past its end"
            )));
        }
        Interval::new(self.from, at)
    }

    /// Split into `[from, at)` and `[at, thru)`; both pieces must be non-empty.
    pub fn split_at(&self, at: Timestamp) -> Result<(Interval, Interval)> {
        Ok((Interval::new(self.from, at)?, Interval::new(at, self.thru)?))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.thru)
    }
}
