//! Job lifecycle: the per-proxy state machine, retry bookkeeping, and
//! timer scheduling layered on top of it.

mod retry;
mod state_machine;
mod timers;

pub use retry::{RetryCounters, RetryPolicy};
pub use state_machine::{apply, Transition, TransitionCause, TransitionEffect, TransitionError, TimerKind};
pub use timers::{default_execution_poll_offsets, execution_timer_sequence, submission_timeout_at, PollSequence};
