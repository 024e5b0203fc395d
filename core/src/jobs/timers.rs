//! Scheduling of submission/execution timers and the poll sequence that
//! follows an execution-time-limit overrun.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Cumulative poll offsets after a time-limit overrun, in the absence of a
/// user-configured `execution_poll_intervals`: `PT1M, PT2M, PT7M`.
pub fn default_execution_poll_offsets() -> Vec<Duration> {
    vec![Duration::minutes(1), Duration::minutes(2), Duration::minutes(7)]
}

/// Tracks the next scheduled poll in an overrun poll sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSequence {
    offsets: Vec<Duration>,
    next_index: usize,
    anchor: DateTime<Utc>,
}

impl PollSequence {
    pub fn starting_at(anchor: DateTime<Utc>, offsets: Vec<Duration>) -> Self {
        Self { offsets, next_index: 0, anchor }
    }

    /// The next poll time, if the sequence isn't exhausted. Offsets are
    /// cumulative from `anchor`, not from the previous poll.
    pub fn next_poll_at(&self) -> Option<DateTime<Utc>> {
        self.offsets.get(self.next_index).map(|offset| self.anchor + *offset)
    }

    pub fn advance(&mut self) {
        self.next_index += 1;
    }

    pub fn is_exhausted(&self) -> bool {
        self.next_index >= self.offsets.len()
    }
}

/// Build the timer a proxy should arm when it enters `submitted`: one poll
/// at the submission timeout, if configured.
pub fn submission_timeout_at(submitted_at: DateTime<Utc>, timeout: Option<Duration>) -> Option<DateTime<Utc>> {
    timeout.map(|t| submitted_at + t)
}

/// Build the timer a proxy should arm when it enters `running`: the first
/// offset of the execution-time-limit overrun poll sequence, anchored at
/// the configured execution time limit.
pub fn execution_timer_sequence(
    started_at: DateTime<Utc>,
    execution_time_limit: Option<Duration>,
    poll_offsets: Option<Vec<Duration>>,
) -> Option<PollSequence> {
    let limit = execution_time_limit?;
    let anchor = started_at + limit;
    let offsets = poll_offsets.unwrap_or_else(default_execution_poll_offsets);
    Some(PollSequence::starting_at(anchor, offsets))
}
