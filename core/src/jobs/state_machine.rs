//! The per-proxy job lifecycle: submit → run → terminate, with retries,
//! timeouts, polling, and killing layered on top of message- and
//! timer-driven transitions.

use serde::{Deserialize, Serialize};

use crate::pool::TaskState;

/// What drove a transition, recorded for diagnostics and event dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionCause {
    AutoReady,
    ClockExpire,
    OperatorTrigger,
    SubprocessResult { ok: bool },
    Message(String),
    Timer(TimerKind),
    OperatorKill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerKind {
    SubmissionTimeout,
    ExecutionTimeLimit,
    SubmissionRetry,
    ExecutionRetry,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("no transition defined from {from:?} on {cause:?}")]
    NoSuchTransition { from: TaskState, cause: String },
}

/// The outcome of attempting a transition: the new state, plus any side
/// effect the caller (the main loop) must arrange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEffect {
    None,
    ScheduleSubmissionTimeout,
    ScheduleExecutionTimer,
    SchedulePoll,
    ScheduleRetryTimer { execution: bool },
    Submit,
    Kill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: TaskState,
    pub effect: TransitionEffect,
}

impl Transition {
    fn to(state: TaskState, effect: TransitionEffect) -> Self {
        Self { state, effect }
    }
}

/// Apply one lifecycle transition. `submission_retries_left`/
/// `execution_retries_left` are read-only here: the caller owns retry-list
/// bookkeeping (see [`super::retry::RetryPolicy`]) and passes in whether any
/// attempts remain.
pub fn apply(
    current: TaskState,
    cause: &TransitionCause,
    submission_retries_left: bool,
    execution_retries_left: bool,
) -> Result<Transition, TransitionError> {
    use TaskState::*;
    use TransitionCause as C;

    let transition = match (current, cause) {
        (Waiting, C::AutoReady) => Transition::to(Preparing, TransitionEffect::Submit),
        (Waiting, C::ClockExpire) => Transition::to(Expired, TransitionEffect::None),
        (Waiting, C::OperatorTrigger) => Transition::to(Preparing, TransitionEffect::Submit),
        (HeldWaiting, C::OperatorTrigger) => Transition::to(Preparing, TransitionEffect::Submit),

        (Preparing, C::SubprocessResult { ok: true }) => {
            Transition::to(Submitted, TransitionEffect::ScheduleSubmissionTimeout)
        }
        (Preparing, C::SubprocessResult { ok: false }) => {
            if submission_retries_left {
                Transition::to(Waiting, TransitionEffect::ScheduleRetryTimer { execution: false })
            } else {
                Transition::to(SubmitFailed, TransitionEffect::None)
            }
        }

        (Submitted, C::Message(text)) if text == "started" => {
            Transition::to(Running, TransitionEffect::ScheduleExecutionTimer)
        }
        (Submitted, C::Timer(TimerKind::SubmissionTimeout)) => Transition::to(Submitted, TransitionEffect::SchedulePoll),
        (Submitted, C::OperatorKill) => Transition::to(SubmitFailed, TransitionEffect::Kill),

        (Running, C::Message(text)) if text == "succeeded" => Transition::to(Succeeded, TransitionEffect::None),
        (Running, C::Message(text)) if text.starts_with("failed") => {
            if execution_retries_left {
                Transition::to(Waiting, TransitionEffect::ScheduleRetryTimer { execution: true })
            } else {
                Transition::to(Failed, TransitionEffect::None)
            }
        }
        (Running, C::Message(text)) if text.starts_with("vacated") => {
            Transition::to(Submitted, TransitionEffect::ScheduleSubmissionTimeout)
        }
        (Running, C::Timer(TimerKind::ExecutionTimeLimit)) => Transition::to(Running, TransitionEffect::SchedulePoll),
        (Running, C::OperatorKill) => Transition::to(Failed, TransitionEffect::Kill),

        (SubmitFailed, C::Timer(TimerKind::SubmissionRetry)) => Transition::to(Preparing, TransitionEffect::Submit),
        (Failed, C::Timer(TimerKind::ExecutionRetry)) => Transition::to(Preparing, TransitionEffect::Submit),

        (from, cause) => {
            return Err(TransitionError::NoSuchTransition { from, cause: format!("{cause:?}") });
        }
    };
    Ok(transition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waiting_ready_submits() {
        let t = apply(TaskState::Waiting, &TransitionCause::AutoReady, true, true).unwrap();
        assert_eq!(t.state, TaskState::Preparing);
        assert_eq!(t.effect, TransitionEffect::Submit);
    }

    #[test]
    fn test_submit_failure_retries_then_terminates() {
        let retrying = apply(TaskState::Preparing, &TransitionCause::SubprocessResult { ok: false }, true, true).unwrap();
        assert_eq!(retrying.state, TaskState::Waiting);

        let exhausted = apply(TaskState::Preparing, &TransitionCause::SubprocessResult { ok: false }, false, true).unwrap();
        assert_eq!(exhausted.state, TaskState::SubmitFailed);
    }

    #[test]
    fn test_started_message_moves_to_running() {
        let t = apply(TaskState::Submitted, &TransitionCause::Message("started".into()), true, true).unwrap();
        assert_eq!(t.state, TaskState::Running);
    }

    #[test]
    fn test_running_failed_message_with_no_retries_terminates() {
        let t = apply(TaskState::Running, &TransitionCause::Message("failed/nonzero exit".into()), true, false).unwrap();
        assert_eq!(t.state, TaskState::Failed);
    }

    #[test]
    fn test_running_failed_message_with_retries_goes_back_to_waiting() {
        let t = apply(TaskState::Running, &TransitionCause::Message("failed/nonzero exit".into()), true, true).unwrap();
        assert_eq!(t.state, TaskState::Waiting);
        assert_eq!(t.effect, TransitionEffect::ScheduleRetryTimer { execution: true });
    }

    #[test]
    fn test_vacated_returns_to_submitted() {
        let t = apply(TaskState::Running, &TransitionCause::Message("vacated/host-a".into()), true, true).unwrap();
        assert_eq!(t.state, TaskState::Submitted);
    }

    #[test]
    fn test_kill_while_running_without_retries_is_failed() {
        let t = apply(TaskState::Running, &TransitionCause::OperatorKill, true, false).unwrap();
        assert_eq!(t.state, TaskState::Failed);
        assert_eq!(t.effect, TransitionEffect::Kill);
    }

    #[test]
    fn test_kill_while_running_ignores_remaining_retries() {
        let t = apply(TaskState::Running, &TransitionCause::OperatorKill, true, true).unwrap();
        assert_eq!(t.state, TaskState::Failed);
        assert_eq!(t.effect, TransitionEffect::Kill);
    }

    #[test]
    fn test_undefined_transition_errors() {
        let err = apply(TaskState::Succeeded, &TransitionCause::AutoReady, true, true);
        assert!(err.is_err());
    }
}
