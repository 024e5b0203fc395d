//! [`Interval`] — the arithmetic companion of [`super::point::CyclePoint`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntervalParseError {
    #[error("empty interval string")]
    Empty,
    #[error("malformed ISO8601 duration: {0}")]
    MalformedDuration(String),
    #[error("malformed integer interval: {0}")]
    MalformedInteger(String),
}

/// An ISO8601-style duration, used with date-time cycle points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Duration8601 {
    pub years: i64,
    pub months: i64,
    pub weeks: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Duration8601 {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    pub fn negate(self) -> Self {
        Self {
            years: -self.years,
            months: -self.months,
            weeks: -self.weeks,
            days: -self.days,
            hours: -self.hours,
            minutes: -self.minutes,
            seconds: -self.seconds,
        }
    }

    /// Total whole days contributed by the non-month/year fields.
    pub fn flat_days(&self) -> i64 {
        self.weeks * 7 + self.days
    }

    /// Total seconds contributed by the time-of-day fields.
    pub fn flat_seconds(&self) -> i64 {
        self.hours * 3600 + self.minutes * 60 + self.seconds
    }
}

/// An interval: either an ISO8601 duration (for date-time cycling) or an
/// integer delta (for integer cycling).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    Duration(Duration8601),
    Integer(i64),
}

impl Interval {
    pub fn zero_duration() -> Self {
        Interval::Duration(Duration8601::default())
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Interval::Duration(d) => d.is_zero(),
            Interval::Integer(i) => *i == 0,
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Interval::Duration(d) => Interval::Duration(d.negate()),
            Interval::Integer(i) => Interval::Integer(-i),
        }
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Interval::Duration(d) => {
                d.years < 0 || d.months < 0 || d.flat_days() < 0 || d.flat_seconds() < 0
            }
            Interval::Integer(i) => *i < 0,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Integer(i) => write!(f, "{:+}", i),
            Interval::Duration(d) => {
                let sign = if self.is_negative() { "-" } else { "" };
                write!(f, "{}P", sign)?;
                if d.years != 0 {
                    write!(f, "{}Y", d.years.abs())?;
                }
                if d.months != 0 {
                    write!(f, "{}M", d.months.abs())?;
                }
                if d.weeks != 0 {
                    write!(f, "{}W", d.weeks.abs())?;
                }
                if d.days != 0 {
                    write!(f, "{}D", d.days.abs())?;
                }
                if d.hours != 0 || d.minutes != 0 || d.seconds != 0 {
                    write!(f, "T")?;
                    if d.hours != 0 {
                        write!(f, "{}H", d.hours.abs())?;
                    }
                    if d.minutes != 0 {
                        write!(f, "{}M", d.minutes.abs())?;
                    }
                    if d.seconds != 0 {
                        write!(f, "{}S", d.seconds.abs())?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Parse `P[n]Y[n]M[n]W[n]DT[n]H[n]M[n]S` (a subset of ISO8601), or a signed
/// integer for integer cycling, e.g. `+P1D`, `-PT6H`, `P1Y`, `+5`, `-3`.
impl FromStr for Interval {
    type Err = IntervalParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.is_empty() {
            return Err(IntervalParseError::Empty);
        }
        let (sign, rest) = match raw.as_bytes()[0] {
            b'+' => (1, &raw[1..]),
            b'-' => (-1, &raw[1..]),
            _ => (1, raw),
        };

        if !rest.starts_with('P') {
            // plain signed integer, for integer cycling
            return rest
                .parse::<i64>()
                .map(|v| Interval::Integer(sign * v))
                .map_err(|_| IntervalParseError::MalformedInteger(raw.to_string()));
        }

        let body = &rest[1..];
        let (date_part, time_part) = match body.find('T') {
            Some(idx) => (&body[..idx], &body[idx + 1..]),
            None => (body, ""),
        };

        let mut d = Duration8601::default();
        for (designator, number) in parse_designators(date_part)
            .map_err(|_| IntervalParseError::MalformedDuration(raw.to_string()))?
        {
            match designator {
                'Y' => d.years = number,
                'M' => d.months = number,
                'W' => d.weeks = number,
                'D' => d.days = number,
                _ => return Err(IntervalParseError::MalformedDuration(raw.to_string())),
            }
        }
        for (designator, number) in parse_designators(time_part)
            .map_err(|_| IntervalParseError::MalformedDuration(raw.to_string()))?
        {
            match designator {
                'H' => d.hours = number,
                'M' => d.minutes = number,
                'S' => d.seconds = number,
                _ => return Err(IntervalParseError::MalformedDuration(raw.to_string())),
            }
        }

        if sign < 0 {
            d = d.negate();
        }
        Ok(Interval::Duration(d))
    }
}

/// Split a run of `<number><letter>` pairs, e.g. `1Y2M3D`, into `(letter, number)`.
fn parse_designators(s: &str) -> Result<Vec<(char, i64)>, ()> {
    let mut out = Vec::new();
    let mut s = s;
    while !s.is_empty() {
        let digit_end = s.find(|c: char| !c.is_ascii_digit()).ok_or(())?;
        if digit_end == 0 {
            return Err(());
        }
        let number: i64 = s[..digit_end].parse().map_err(|_| ())?;
        let designator = s[digit_end..].chars().next().ok_or(())?;
        out.push((designator, number));
        s = &s[digit_end + designator.len_utf8()..];
    }
    Ok(out)
}
