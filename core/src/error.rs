//! Top-level error aggregation. Each module exposes its own `thiserror`
//! enum at its public boundary; this type collects the ones that can
//! surface all the way out of a running scheduler, with an associated
//! process exit code. `main.rs` wraps this in `eyre::Result` at the very
//! edge: typed errors inside, `eyre` at the edge.

use thiserror::Error;

use crate::config::ConfigError;
use crate::graph::CompileError;
use crate::scheduler::{CommandError, RestartError};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    GraphCompile(#[from] CompileError),
    #[error(transparent)]
    Restart(#[from] RestartError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Store(#[from] cylc_store::StoreError),
}

impl SchedulerError {
    /// Maps each error category to a process exit code, applied at the
    /// point a `SchedulerError` escapes to the process boundary.
    pub fn exit_code(&self) -> i32 {
        match self {
            SchedulerError::Config(_) => 2,
            SchedulerError::GraphCompile(_) => 2,
            SchedulerError::Command(err) => err.exit_code(),
            SchedulerError::Restart(_) | SchedulerError::Store(_) => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_is_exit_code_two() {
        let err = SchedulerError::Config(ConfigError::NotFound("x".into()));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_command_error_delegates_exit_code() {
        let task_id = crate::scheduler::TaskId::new(
            "a",
            crate::cycle::CyclePoint::parse_datetime("20240101T000000Z", crate::cycle::CalendarMode::ProlepticGregorian)
                .unwrap(),
        );
        let err = SchedulerError::Command(CommandError::NoSuchTask(task_id));
        assert_eq!(err.exit_code(), 1);
    }
}
