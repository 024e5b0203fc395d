//! [`CyclePoint`] — a single point on a workflow's cycling axis.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::calendar::CalendarMode;
use super::interval::{Duration8601, Interval};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CyclePointParseError {
    #[error("empty cycle point string")]
    Empty,
    #[error("malformed date-time cycle point: {0}")]
    MalformedDateTime(String),
    #[error("malformed integer cycle point: {0}")]
    MalformedInteger(String),
    #[error("cannot compare a date-time cycle point with an integer one")]
    MixedKinds,
    #[error("cannot add a date-time interval to an integer cycle point, or vice versa")]
    MismatchedIntervalKind,
}

/// A date-time cycle point: calendar mode plus a civil date and time-of-day,
/// always normalized to UTC internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatePoint {
    pub calendar: CalendarMode,
    epoch_day: i64,
    seconds_of_day: i64,
}

impl DatePoint {
    pub fn new(calendar: CalendarMode, year: i64, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        Self {
            calendar,
            epoch_day: calendar.to_epoch_day(year, month, day),
            seconds_of_day: hour as i64 * 3600 + minute as i64 * 60 + second as i64,
        }
    }

    pub fn year_month_day(&self) -> (i64, u32, u32) {
        self.calendar.from_epoch_day(self.epoch_day)
    }

    pub fn hour_minute_second(&self) -> (u32, u32, u32) {
        let s = self.seconds_of_day;
        ((s / 3600) as u32, ((s / 60) % 60) as u32, (s % 60) as u32)
    }

    fn total_seconds(&self) -> i128 {
        self.epoch_day as i128 * 86400 + self.seconds_of_day as i128
    }

    fn from_total_seconds(calendar: CalendarMode, total: i128) -> Self {
        let epoch_day = total.div_euclid(86400) as i64;
        let seconds_of_day = total.rem_euclid(86400) as i64;
        Self { calendar, epoch_day, seconds_of_day }
    }

    /// Add a duration, applying year/month components first (which are
    /// calendar-relative) and then flattening weeks/days/hours/minutes/seconds
    /// into a uniform second count.
    pub fn add(&self, d: Duration8601) -> Self {
        let (mut year, mut month, day) = self.year_month_day();
        if d.years != 0 || d.months != 0 {
            let total_months = (year * 12 + (month as i64 - 1)) + d.years * 12 + d.months;
            year = total_months.div_euclid(12);
            month = (total_months.rem_euclid(12) + 1) as u32;
        }
        let clamped_day = day.min(self.calendar.days_in_month(year, month));
        let base = Self::new(self.calendar, year, month, clamped_day, 0, 0, 0);
        let shifted_seconds = base.epoch_day as i128 * 86400
            + self.seconds_of_day as i128
            + d.flat_days() as i128 * 86400
            + d.flat_seconds() as i128;
        Self::from_total_seconds(self.calendar, shifted_seconds)
    }

    pub fn sub(&self, d: Duration8601) -> Self {
        self.add(d.negate())
    }

    /// Convert to a wall-clock instant, for calendars where that is
    /// meaningful (proleptic Gregorian, whose epoch day is already a Unix
    /// day count). Other calendars have no fixed relationship to real time.
    pub fn to_chrono_utc(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        if self.calendar != CalendarMode::ProlepticGregorian {
            return None;
        }
        chrono::DateTime::from_timestamp(self.total_seconds() as i64, 0)
    }

    /// The exact duration between two points of the same calendar, expressed
    /// as flat days + seconds (no year/month components, since that
    /// decomposition is ambiguous in reverse).
    pub fn diff(&self, other: &Self) -> Duration8601 {
        debug_assert_eq!(self.calendar, other.calendar);
        let delta = self.total_seconds() - other.total_seconds();
        Duration8601 {
            days: (delta.div_euclid(86400)) as i64,
            seconds: (delta.rem_euclid(86400)) as i64,
            ..Default::default()
        }
    }
}

impl Ord for DatePoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_seconds().cmp(&other.total_seconds())
    }
}

impl PartialOrd for DatePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DatePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (y, mo, d) = self.year_month_day();
        let (h, mi, s) = self.hour_minute_second();
        write!(f, "{:04}{:02}{:02}T{:02}{:02}{:02}Z", y, mo, d, h, mi, s)
    }
}

/// A point on a workflow's cycling axis: either a date-time or a plain
/// integer, never mixed within one workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CyclePoint {
    DateTime(DatePoint),
    Integer(i64),
}

impl CyclePoint {
    pub fn is_date_time(&self) -> bool {
        matches!(self, CyclePoint::DateTime(_))
    }

    pub fn add(&self, interval: Interval) -> Result<Self, CyclePointParseError> {
        match (self, interval) {
            (CyclePoint::DateTime(p), Interval::Duration(d)) => Ok(CyclePoint::DateTime(p.add(d))),
            (CyclePoint::Integer(n), Interval::Integer(i)) => Ok(CyclePoint::Integer(n + i)),
            _ => Err(CyclePointParseError::MismatchedIntervalKind),
        }
    }

    pub fn sub(&self, interval: Interval) -> Result<Self, CyclePointParseError> {
        self.add(interval.negate())
    }

    /// The interval from `other` to `self` (i.e. `self - other`).
    pub fn diff(&self, other: &Self) -> Result<Interval, CyclePointParseError> {
        match (self, other) {
            (CyclePoint::DateTime(a), CyclePoint::DateTime(b)) => Ok(Interval::Duration(a.diff(b))),
            (CyclePoint::Integer(a), CyclePoint::Integer(b)) => Ok(Interval::Integer(a - b)),
            _ => Err(CyclePointParseError::MixedKinds),
        }
    }
}

impl PartialOrd for CyclePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (CyclePoint::DateTime(a), CyclePoint::DateTime(b)) => a.partial_cmp(b),
            (CyclePoint::Integer(a), CyclePoint::Integer(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for CyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePoint::DateTime(p) => write!(f, "{}", p),
            CyclePoint::Integer(n) => write!(f, "{}", n),
        }
    }
}

/// Parse `YYYYMMDDThhmmss[Z]` for date-time points, or a plain (optionally
/// zero-padded) integer for integer points. The calendar mode is not encoded
/// in the string; callers parsing date-time points must supply it via
/// [`CyclePoint::parse_datetime`].
impl FromStr for CyclePoint {
    type Err = CyclePointParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.is_empty() {
            return Err(CyclePointParseError::Empty);
        }
        if raw.contains('T') {
            CyclePoint::parse_datetime(raw, CalendarMode::ProlepticGregorian)
        } else {
            raw.parse::<i64>()
                .map(CyclePoint::Integer)
                .map_err(|_| CyclePointParseError::MalformedInteger(raw.to_string()))
        }
    }
}

impl CyclePoint {
    pub fn parse_datetime(raw: &str, calendar: CalendarMode) -> Result<Self, CyclePointParseError> {
        let err = || CyclePointParseError::MalformedDateTime(raw.to_string());
        let raw = raw.strip_suffix('Z').unwrap_or(raw);
        let (date, time) = raw.split_once('T').ok_or_else(err)?;
        if date.len() != 8 || time.len() != 6 {
            return Err(err());
        }
        let year: i64 = date[0..4].parse().map_err(|_| err())?;
        let month: u32 = date[4..6].parse().map_err(|_| err())?;
        let day: u32 = date[6..8].parse().map_err(|_| err())?;
        let hour: u32 = time[0..2].parse().map_err(|_| err())?;
        let minute: u32 = time[2..4].parse().map_err(|_| err())?;
        let second: u32 = time[4..6].parse().map_err(|_| err())?;
        Ok(CyclePoint::DateTime(DatePoint::new(calendar, year, month, day, hour, minute, second)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_datetime() {
        let p = CyclePoint::parse_datetime("20240229T000000Z", CalendarMode::ProlepticGregorian).unwrap();
        assert_eq!(p.to_string(), "20240229T000000Z");
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!("5".parse::<CyclePoint>().unwrap(), CyclePoint::Integer(5));
    }

    #[test]
    fn test_add_one_day() {
        let p = CyclePoint::parse_datetime("20240228T000000Z", CalendarMode::ProlepticGregorian).unwrap();
        let next = p.add(Interval::Duration(Duration8601 { days: 1, ..Default::default() })).unwrap();
        assert_eq!(next.to_string(), "20240229T000000Z");
    }

    #[test]
    fn test_add_one_month_clamps_day() {
        let p = CyclePoint::parse_datetime("20240131T000000Z", CalendarMode::ProlepticGregorian).unwrap();
        let next = p.add(Interval::Duration(Duration8601 { months: 1, ..Default::default() })).unwrap();
        // Jan 31 + 1 month clamps to Feb 29 in a leap year.
        assert_eq!(next.to_string(), "20240229T000000Z");
    }

    #[test]
    fn test_integer_arithmetic() {
        let p = CyclePoint::Integer(1);
        let next = p.add(Interval::Integer(1)).unwrap();
        assert_eq!(next, CyclePoint::Integer(2));
        assert_eq!(next.diff(&p).unwrap(), Interval::Integer(1));
    }

    #[test]
    fn test_mismatched_kinds_error_on_add() {
        let p = CyclePoint::Integer(1);
        assert_eq!(p.add(Interval::Duration(Duration8601::default())), Err(CyclePointParseError::MismatchedIntervalKind));
    }

    #[test]
    fn test_mixed_diff_errors() {
        let a = CyclePoint::Integer(1);
        let b = CyclePoint::parse_datetime("20240228T000000Z", CalendarMode::ProlepticGregorian).unwrap();
        assert_eq!(a.diff(&b), Err(CyclePointParseError::MixedKinds));
    }

    #[test]
    fn test_ordering() {
        let a = CyclePoint::parse_datetime("20240228T000000Z", CalendarMode::ProlepticGregorian).unwrap();
        let b = CyclePoint::parse_datetime("20240229T000000Z", CalendarMode::ProlepticGregorian).unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_diff_roundtrip() {
        let a = CyclePoint::parse_datetime("20240301T000000Z", CalendarMode::ProlepticGregorian).unwrap();
        let b = CyclePoint::parse_datetime("20240228T000000Z", CalendarMode::ProlepticGregorian).unwrap();
        let d = a.diff(&b).unwrap();
        assert_eq!(b.add(d).unwrap(), a);
    }
}
