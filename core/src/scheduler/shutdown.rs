//! Shutdown requests: the three ways an operator can stop a running
//! scheduler, and the mode a clean-shutdown attempt resolves to when an
//! unrecoverable error forces one.

use std::fmt;

use crate::cycle::CyclePoint;

/// How aggressively to stop. `Now` waits for nothing; `AfterActiveJobs` is
/// the default soft stop (let in-flight jobs finish, spawn nothing new);
/// `AtCyclePoint` keeps scheduling until that point is reached and then
/// stops as `AfterActiveJobs` would.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Now,
    AfterActiveJobs,
    Kill,
    AtCyclePoint(CyclePoint),
}

impl fmt::Display for ShutdownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownMode::Now => write!(f, "now"),
            ShutdownMode::AfterActiveJobs => write!(f, "after active jobs"),
            ShutdownMode::Kill => write!(f, "kill"),
            ShutdownMode::AtCyclePoint(point) => write!(f, "at {point}"),
        }
    }
}

/// A `stop` command as received from the operator surface, carrying the
/// requested mode and an optional reason to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownRequest {
    pub mode: ShutdownMode,
    pub reason: Option<String>,
}

impl ShutdownRequest {
    pub fn now(reason: impl Into<Option<String>>) -> Self {
        Self { mode: ShutdownMode::Now, reason: reason.into() }
    }

    pub fn after_active_jobs() -> Self {
        Self { mode: ShutdownMode::AfterActiveJobs, reason: None }
    }

    pub fn kill() -> Self {
        Self { mode: ShutdownMode::Kill, reason: None }
    }

    pub fn at_cycle_point(point: CyclePoint) -> Self {
        Self { mode: ShutdownMode::AtCyclePoint(point), reason: None }
    }

    /// Whether this request demands killing active jobs rather than letting
    /// them finish on their own.
    pub fn kills_active_jobs(&self) -> bool {
        matches!(self.mode, ShutdownMode::Now | ShutdownMode::Kill)
    }
}
