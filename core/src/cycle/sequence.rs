//! Recurrence sequences: the thing that turns a single interval into a
//! bounded or unbounded stream of cycle points.
//!
//! Supports the three recurrence shapes a graph section header can use:
//! `R1` (run once), `R[n]/start/period` (n repeats from an anchor), and
//! `R[n]/period/end` (n repeats counting back from an anchor). An empty
//! anchor field defers to the workflow's initial or final cycle point,
//! supplied at [`Sequence::bind`] time.

use std::fmt;

use thiserror::Error;

use super::interval::Interval;
use super::point::CyclePoint;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceParseError {
    #[error("empty recurrence string")]
    Empty,
    #[error("recurrence must start with 'R': {0}")]
    MissingRPrefix(String),
    #[error("malformed repeat count: {0}")]
    BadRepeatCount(String),
    #[error("recurrence has the wrong number of '/'-separated fields: {0}")]
    WrongFieldCount(String),
    #[error("could not parse anchor point: {0}")]
    BadAnchor(String),
    #[error("could not parse period: {0}")]
    BadPeriod(String),
    #[error("a bound sequence needs either an explicit start, end, or positive repeat count")]
    Unbounded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Anchor {
    StartPeriod { start: Option<CyclePoint>, period: Interval },
    PeriodEnd { period: Interval, end: Option<CyclePoint> },
}

/// A parsed, but not yet anchor-resolved, recurrence expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSpec {
    repeat_limit: Option<u64>,
    anchor: Anchor,
}

impl SequenceSpec {
    /// Parse `R1`, `R[n]/start/period`, or `R[n]/period/end`. `start`/`end`
    /// may be the empty string to mean "defer to context".
    pub fn parse(raw: &str) -> Result<Self, SequenceParseError> {
        if raw.is_empty() {
            return Err(SequenceParseError::Empty);
        }
        if !raw.starts_with('R') {
            return Err(SequenceParseError::MissingRPrefix(raw.to_string()));
        }
        let rest = &raw[1..];
        let (count_str, fields_str) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };
        let repeat_limit = if count_str.is_empty() {
            None
        } else {
            Some(
                count_str
                    .parse::<u64>()
                    .map_err(|_| SequenceParseError::BadRepeatCount(raw.to_string()))?,
            )
        };

        if fields_str.is_empty() {
            // "R1" or "Rn" with no anchor: a fixed number of repeats anchored
            // at context-start with a zero period, i.e. a single-point burst
            // resolved entirely by `bind`.
            return Ok(Self {
                repeat_limit: Some(repeat_limit.unwrap_or(1)),
                anchor: Anchor::StartPeriod { start: None, period: Interval::zero_duration() },
            });
        }

        let fields: Vec<&str> = fields_str.split('/').collect();
        if fields.len() != 2 {
            return Err(SequenceParseError::WrongFieldCount(raw.to_string()));
        }
        let [first, second] = [fields[0], fields[1]];

        // Disambiguate start/period vs period/end by trying to parse the
        // first field as a period; if that succeeds, it's period/end.
        if first.starts_with('P') {
            let period = first
                .parse::<Interval>()
                .map_err(|_| SequenceParseError::BadPeriod(raw.to_string()))?;
            let end = parse_optional_point(second).map_err(|_| SequenceParseError::BadAnchor(raw.to_string()))?;
            Ok(Self { repeat_limit, anchor: Anchor::PeriodEnd { period, end } })
        } else {
            let start = parse_optional_point(first).map_err(|_| SequenceParseError::BadAnchor(raw.to_string()))?;
            let period = second
                .parse::<Interval>()
                .map_err(|_| SequenceParseError::BadPeriod(raw.to_string()))?;
            Ok(Self { repeat_limit, anchor: Anchor::StartPeriod { start, period } })
        }
    }

    /// Resolve any elided anchor against the workflow's initial/final cycle
    /// points, producing an iterable [`Sequence`].
    pub fn bind(&self, icp: CyclePoint, fcp: Option<CyclePoint>) -> Result<Sequence, SequenceParseError> {
        match &self.anchor {
            Anchor::StartPeriod { start, period } => Ok(Sequence {
                start: start.unwrap_or(icp),
                period: *period,
                repeat_limit: self.repeat_limit,
                bound: fcp,
                exclusions: Vec::new(),
            }),
            Anchor::PeriodEnd { period, end } => {
                let end = end.or(fcp).ok_or(SequenceParseError::Unbounded)?;
                // Walk backwards from `end` by `period` until we reach or pass
                // `icp`, then the first in-range point becomes `start`.
                let mut cursor = end;
                let mut count: u64 = 1;
                loop {
                    let prev = cursor.sub(*period).map_err(|_| SequenceParseError::BadPeriod("period/end".into()))?;
                    if prev < icp {
                        break;
                    }
                    cursor = prev;
                    count += 1;
                    if let Some(limit) = self.repeat_limit {
                        if count >= limit {
                            break;
                        }
                    }
                }
                Ok(Sequence {
                    start: cursor,
                    period: *period,
                    repeat_limit: self.repeat_limit,
                    bound: Some(end),
                    exclusions: Vec::new(),
                })
            }
        }
    }
}

fn parse_optional_point(s: &str) -> Result<Option<CyclePoint>, ()> {
    if s.is_empty() {
        Ok(None)
    } else {
        s.parse::<CyclePoint>().map(Some).map_err(|_| ())
    }
}

/// A fully-resolved recurrence: iterate with [`Sequence::next`] /
/// [`Sequence::prev`], or test membership with [`Sequence::contains`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    start: CyclePoint,
    period: Interval,
    repeat_limit: Option<u64>,
    bound: Option<CyclePoint>,
    exclusions: Vec<CyclePoint>,
}

impl Sequence {
    pub fn exclude(&mut self, point: CyclePoint) {
        self.exclusions.push(point);
    }

    pub fn is_excluded(&self, point: &CyclePoint) -> bool {
        self.exclusions.iter().any(|p| p == point)
    }

    pub fn is_finite(&self) -> bool {
        self.repeat_limit.is_some() || self.bound.is_some()
    }

    pub fn start(&self) -> CyclePoint {
        self.start
    }

    /// The `n`th point in the sequence (0-indexed), ignoring exclusions and
    /// the repeat/bound limit — callers needing a validated point should
    /// prefer `next`/`contains`.
    fn nth_unchecked(&self, n: u64) -> Option<CyclePoint> {
        if self.period.is_zero() {
            return if n == 0 { Some(self.start) } else { None };
        }
        let mut point = self.start;
        for _ in 0..n {
            point = point.add(self.period).ok()?;
        }
        Some(point)
    }

    fn within_bound(&self, point: &CyclePoint) -> bool {
        match &self.bound {
            Some(b) if self.period.is_negative() => point >= b,
            Some(b) => point <= b,
            None => true,
        }
    }

    /// Whether `point` is a (non-excluded) member of this sequence.
    pub fn contains(&self, point: &CyclePoint) -> bool {
        if self.is_excluded(point) {
            return false;
        }
        if !self.within_bound(point) {
            return false;
        }
        if self.period.is_zero() {
            return *point == self.start;
        }
        let Ok(diff) = point.diff(&self.start) else { return false };
        let Some(steps) = whole_steps(diff, self.period) else { return false };
        if let Some(limit) = self.repeat_limit {
            if steps >= limit {
                return false;
            }
        }
        true
    }

    /// The first sequence point strictly after `point` (or the start point,
    /// if `point` precedes the sequence and a start exists).
    pub fn next(&self, point: &CyclePoint) -> Option<CyclePoint> {
        if point < &self.start {
            return Some(self.start).filter(|p| !self.is_excluded(p));
        }
        if self.period.is_zero() {
            return None;
        }
        let diff = point.diff(&self.start).ok()?;
        let mut steps = whole_steps(diff, self.period)?;
        steps += 1;
        loop {
            if let Some(limit) = self.repeat_limit {
                if steps >= limit {
                    return None;
                }
            }
            let candidate = self.nth_unchecked(steps)?;
            if !self.within_bound(&candidate) {
                return None;
            }
            if !self.is_excluded(&candidate) {
                return Some(candidate);
            }
            steps += 1;
        }
    }

    /// The last sequence point strictly before `point`.
    pub fn prev(&self, point: &CyclePoint) -> Option<CyclePoint> {
        if point <= &self.start {
            return None;
        }
        if self.period.is_zero() {
            return None;
        }
        let diff = point.diff(&self.start).ok()?;
        let mut steps = whole_steps_floor(diff, self.period)?;
        loop {
            if steps == 0 {
                return Some(self.start).filter(|p| !self.is_excluded(p));
            }
            let candidate = self.nth_unchecked(steps.saturating_sub(1))?;
            if candidate >= *point {
                steps = steps.saturating_sub(1);
                continue;
            }
            if !self.is_excluded(&candidate) {
                return Some(candidate);
            }
            if steps == 0 {
                return None;
            }
            steps -= 1;
        }
    }

    /// Bounded forward iteration up to `limit` points, for display/debugging.
    pub fn iter_from(&self, start: CyclePoint, limit: usize) -> Vec<CyclePoint> {
        let mut out = Vec::new();
        let mut cursor = if self.contains(&start) { Some(start) } else { self.next(&start) };
        while let Some(p) = cursor {
            out.push(p);
            if out.len() >= limit {
                break;
            }
            cursor = self.next(&p);
        }
        out
    }
}

/// Number of whole `period` steps that exactly divide `diff` from the start,
/// or `None` if `diff` does not land exactly on a sequence point.
fn whole_steps(diff: Interval, period: Interval) -> Option<u64> {
    match (diff, period) {
        (Interval::Integer(d), Interval::Integer(p)) if p != 0 && d % p == 0 && d / p >= 0 => Some((d / p) as u64),
        (Interval::Duration(d), Interval::Duration(p)) => {
            let d_secs = d.flat_days() as i64 * 86400 + d.flat_seconds();
            let p_secs = p.flat_days() as i64 * 86400 + p.flat_seconds();
            if p_secs != 0 && d.years == 0 && d.months == 0 && p.years == 0 && p.months == 0 && d_secs % p_secs == 0 && d_secs / p_secs >= 0 {
                Some((d_secs / p_secs) as u64)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn whole_steps_floor(diff: Interval, period: Interval) -> Option<u64> {
    match (diff, period) {
        (Interval::Integer(d), Interval::Integer(p)) if p != 0 && d >= 0 => Some((d / p) as u64),
        (Interval::Duration(d), Interval::Duration(p)) => {
            let d_secs = d.flat_days() as i64 * 86400 + d.flat_seconds();
            let p_secs = p.flat_days() as i64 * 86400 + p.flat_seconds();
            if p_secs != 0 && d_secs >= 0 {
                Some((d_secs / p_secs) as u64)
            } else {
                None
            }
        }
        _ => None,
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.repeat_limit {
            Some(n) => write!(f, "R{}/{}/{}", n, self.start, self.period),
            None => write!(f, "R/{}/{}", self.start, self.period),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::calendar::CalendarMode;

    fn icp() -> CyclePoint {
        CyclePoint::parse_datetime("20240101T000000Z", CalendarMode::ProlepticGregorian).unwrap()
    }

    #[test]
    fn test_parse_once() {
        let spec = SequenceSpec::parse("R1").unwrap();
        let seq = spec.bind(icp(), None).unwrap();
        assert!(seq.contains(&icp()));
        assert_eq!(seq.next(&icp()), None);
    }

    #[test]
    fn test_start_period_unbounded() {
        let spec = SequenceSpec::parse("R/20240101T000000Z/P1D").unwrap();
        let seq = spec.bind(icp(), None).unwrap();
        assert!(seq.contains(&icp()));
        let next = seq.next(&icp()).unwrap();
        assert_eq!(next.to_string(), "20240102T000000Z");
        let next2 = seq.next(&next).unwrap();
        assert_eq!(next2.to_string(), "20240103T000000Z");
    }

    #[test]
    fn test_elided_start_defers_to_icp() {
        let spec = SequenceSpec::parse("R/P1D").unwrap();
        let seq = spec.bind(icp(), None).unwrap();
        assert_eq!(seq.start(), icp());
    }

    #[test]
    fn test_repeat_limit_bounds_iteration() {
        let spec = SequenceSpec::parse("R3/20240101T000000Z/P1D").unwrap();
        let seq = spec.bind(icp(), None).unwrap();
        let points = seq.iter_from(icp(), 10);
        assert_eq!(points.len(), 3);
        assert_eq!(points[2].to_string(), "20240103T000000Z");
    }

    #[test]
    fn test_period_end_form() {
        let end = CyclePoint::parse_datetime("20240110T000000Z", CalendarMode::ProlepticGregorian).unwrap();
        let spec = SequenceSpec::parse("R/P1D/20240110T000000Z").unwrap();
        let seq = spec.bind(icp(), None).unwrap();
        assert!(seq.contains(&end));
        assert_eq!(seq.start(), icp());
    }

    #[test]
    fn test_exclusion() {
        let spec = SequenceSpec::parse("R/20240101T000000Z/P1D").unwrap();
        let mut seq = spec.bind(icp(), None).unwrap();
        let excluded = CyclePoint::parse_datetime("20240102T000000Z", CalendarMode::ProlepticGregorian).unwrap();
        seq.exclude(excluded);
        assert!(!seq.contains(&excluded));
        let next = seq.next(&icp()).unwrap();
        assert_eq!(next.to_string(), "20240103T000000Z");
    }

    #[test]
    fn test_prev() {
        let spec = SequenceSpec::parse("R/20240101T000000Z/P1D").unwrap();
        let seq = spec.bind(icp(), None).unwrap();
        let p3 = CyclePoint::parse_datetime("20240104T000000Z", CalendarMode::ProlepticGregorian).unwrap();
        let prev = seq.prev(&p3).unwrap();
        assert_eq!(prev.to_string(), "20240103T000000Z");
    }

    #[test]
    fn test_non_member_not_contained() {
        let spec = SequenceSpec::parse("R/20240101T000000Z/P2D").unwrap();
        let seq = spec.bind(icp(), None).unwrap();
        let odd = CyclePoint::parse_datetime("20240102T000000Z", CalendarMode::ProlepticGregorian).unwrap();
        assert!(!seq.contains(&odd));
    }
}
