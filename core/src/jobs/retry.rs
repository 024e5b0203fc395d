//! Retry-delay bookkeeping: two ordered delay lists (submission, execution),
//! consumed in order and exposed to job scripts as try/submit numbers.

use serde::{Deserialize, Serialize};

use crate::cycle::Interval;

/// The parsed form of a task definition's `submission_retry_delays` /
/// `execution_retry_delays` configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub submission_delays: Vec<Interval>,
    pub execution_delays: Vec<Interval>,
}

impl RetryPolicy {
    pub fn parse(submission: &[String], execution: &[String]) -> Result<Self, crate::cycle::IntervalParseError> {
        Ok(Self {
            submission_delays: submission.iter().map(|s| s.parse()).collect::<Result<_, _>>()?,
            execution_delays: execution.iter().map(|s| s.parse()).collect::<Result<_, _>>()?,
        })
    }
}

/// Per-proxy counters tracked across the whole flow: `submit_num` counts
/// every submission attempt (reset only per flow), `try_number` counts
/// execution attempts within the current submission lineage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryCounters {
    pub submit_num: u64,
    pub try_number: u64,
}

impl RetryCounters {
    /// Whether another submission attempt remains under the policy.
    pub fn submission_retries_left(&self, policy: &RetryPolicy) -> bool {
        (self.submit_num as usize) < policy.submission_delays.len()
    }

    /// Whether another execution attempt remains under the policy.
    pub fn execution_retries_left(&self, policy: &RetryPolicy) -> bool {
        (self.try_number as usize) < policy.execution_delays.len()
    }

    pub fn record_submission(&mut self) {
        self.submit_num += 1;
    }

    pub fn record_execution_attempt(&mut self) {
        self.try_number += 1;
    }

    /// `$CYLC_TASK_TRY_NUMBER` as exposed to the job script: one-based.
    pub fn cylc_task_try_number(&self) -> u64 {
        self.try_number + 1
    }

    /// `$CYLC_TASK_SUBMIT_NUMBER` as exposed to the job script: one-based.
    pub fn cylc_task_submit_number(&self) -> u64 {
        self.submit_num + 1
    }

    pub fn next_submission_delay(&self, policy: &RetryPolicy) -> Option<Interval> {
        policy.submission_delays.get(self.submit_num as usize).cloned()
    }

    pub fn next_execution_delay(&self, policy: &RetryPolicy) -> Option<Interval> {
        policy.execution_delays.get(self.try_number as usize).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::parse(&[], &["PT0S".to_string(), "PT0S".to_string()]).unwrap()
    }

    #[test]
    fn test_try_number_sequence_for_retry_then_succeed() {
        let policy = policy();
        let mut counters = RetryCounters::default();
        assert_eq!(counters.cylc_task_try_number(), 1);
        assert!(counters.execution_retries_left(&policy));
        counters.record_execution_attempt();

        assert_eq!(counters.cylc_task_try_number(), 2);
        assert!(counters.execution_retries_left(&policy));
        counters.record_execution_attempt();

        assert_eq!(counters.cylc_task_try_number(), 3);
        assert!(!counters.execution_retries_left(&policy));
    }

    #[test]
    fn test_submission_retries_exhaust() {
        let policy = RetryPolicy::parse(&["PT1M".to_string()], &[]).unwrap();
        let mut counters = RetryCounters::default();
        assert!(counters.submission_retries_left(&policy));
        counters.record_submission();
        assert!(!counters.submission_retries_left(&policy));
    }
}
