//! Time source abstraction.
//!
//! The main loop and the job timers need "now" in several places (runahead
//! checks, submission/execution timeouts, clock-trigger evaluation). Reading
//! `Utc::now()` directly there would make timer logic untestable without
//! real sleeps, so it goes through this trait instead.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only advances when told to, for deterministic tests of
/// timeout and polling logic.
#[derive(Debug, Clone)]
pub struct FakeClock {
    now: std::sync::Arc<std::sync::Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn at(start: DateTime<Utc>) -> Self {
        Self { now: std::sync::Arc::new(std::sync::Mutex::new(start)) }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock().expect("fake clock mutex poisoned");
        *now += duration;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("fake clock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fake_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FakeClock::at(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::hours(6));
        assert_eq!(clock.now(), start + chrono::Duration::hours(6));
    }
}
