//! External triggers: a signature-keyed cache of outstanding xtrigger
//! calls, polled through the subprocess pool except for clock xtriggers,
//! which are evaluated in-process against the scheduler's clock.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;

/// The call signature: function name plus its rendered argument list,
/// stable across cycle points that happen to pass identical arguments.
pub fn signature(name: &str, args: &[String]) -> String {
    format!("{name}({})", args.join(", "))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XtriggerResult {
    pub satisfied: bool,
    pub values: HashMap<String, String>,
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Pending { next_poll: chrono::DateTime<chrono::Utc> },
    Resolved(XtriggerResult),
}

/// Cache of xtrigger call outcomes, keyed by signature so that two proxies
/// calling the same function with the same arguments share one outcome.
#[derive(Debug, Default)]
pub struct XtriggerCache {
    entries: HashMap<String, CacheEntry>,
}

impl XtriggerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolved(&self, sig: &str) -> Option<&XtriggerResult> {
        match self.entries.get(sig) {
            Some(CacheEntry::Resolved(r)) if r.satisfied => Some(r),
            _ => None,
        }
    }

    /// Whether `sig` needs a (re-)poll right now: never seen before, or its
    /// scheduled poll time has passed.
    pub fn due_for_poll(&self, sig: &str, now: chrono::DateTime<chrono::Utc>) -> bool {
        match self.entries.get(sig) {
            None => true,
            Some(CacheEntry::Pending { next_poll }) => now >= *next_poll,
            Some(CacheEntry::Resolved(r)) => !r.satisfied,
        }
    }

    pub fn mark_polling(&mut self, sig: &str, next_poll: chrono::DateTime<chrono::Utc>) {
        self.entries.insert(sig.to_string(), CacheEntry::Pending { next_poll });
    }

    pub fn record_result(&mut self, sig: &str, result: XtriggerResult) {
        self.entries.insert(sig.to_string(), CacheEntry::Resolved(result));
    }
}

/// Evaluate a clock xtrigger in-process: `wall_clock(offset=PT0S)`-style
/// gates satisfied once `point + offset <= clock.now()`.
pub fn evaluate_clock_xtrigger(
    clock: &dyn Clock,
    point: &crate::cycle::CyclePoint,
    offset: Option<&crate::cycle::Interval>,
) -> XtriggerResult {
    let gate_at = match offset {
        Some(iv) => point.add(iv.clone()).unwrap_or(*point),
        None => *point,
    };
    let satisfied = match gate_at {
        crate::cycle::CyclePoint::DateTime(d) => match d.to_chrono_utc() {
            Some(gate_dt) => clock.now() >= gate_dt,
            None => false,
        },
        crate::cycle::CyclePoint::Integer(_) => true,
    };
    XtriggerResult { satisfied, values: HashMap::new() }
}

pub fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::cycle::{CalendarMode, CyclePoint};
    use chrono::{DateTime, Utc};

    fn point() -> CyclePoint {
        CyclePoint::parse_datetime("20240101T000000Z", CalendarMode::ProlepticGregorian).unwrap()
    }

    #[test]
    fn test_due_for_poll_initially_true() {
        let cache = XtriggerCache::new();
        assert!(cache.due_for_poll("echo(1)", Utc::now()));
    }

    #[test]
    fn test_resolved_satisfied_cached() {
        let mut cache = XtriggerCache::new();
        cache.record_result("echo(1)", XtriggerResult { satisfied: true, values: HashMap::new() });
        assert!(cache.resolved("echo(1)").is_some());
        assert!(!cache.due_for_poll("echo(1)", Utc::now()));
    }

    #[test]
    fn test_clock_xtrigger_not_yet_satisfied() {
        let now: DateTime<Utc> = DateTime::parse_from_rfc3339("2023-12-31T00:00:00Z").unwrap().with_timezone(&Utc);
        let clock = FakeClock::at(now);
        let result = evaluate_clock_xtrigger(&clock, &point(), None);
        assert!(!result.satisfied);
    }

    #[test]
    fn test_clock_xtrigger_satisfied_once_past() {
        let now: DateTime<Utc> = DateTime::parse_from_rfc3339("2024-01-02T00:00:00Z").unwrap().with_timezone(&Utc);
        let clock = FakeClock::at(now);
        let result = evaluate_clock_xtrigger(&clock, &point(), None);
        assert!(result.satisfied);
    }
}
