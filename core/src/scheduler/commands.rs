//! The operator command surface: the verbs an operator (CLI, UI, or another
//! scheduler instance during testing) can issue against a running scheduler.
//! Every command is transport-agnostic — it is a plain value serialized
//! through the main loop's inbound queue and applied synchronously between
//! quanta, never racing the scheduling logic itself.

use std::fmt;

use thiserror::Error;

use crate::broadcast::{NamespaceSelector, PointSelector};
use crate::cycle::CyclePoint;
use crate::flow::{FlowLabel, FlowLabelParseError};
use crate::pool::TaskState;

/// A task instance targeted by a command, independent of flow — a command
/// may need to act on whichever flow(s) currently occupy that slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub task_name: String,
    pub point: CyclePoint,
}

impl TaskId {
    pub fn new(task_name: impl Into<String>, point: CyclePoint) -> Self {
        Self { task_name: task_name.into(), point }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.task_name, self.point)
    }
}

/// Which flow a `trigger` command should act under. `New` mints the next
/// unused flow label; `None` spawns a proxy whose outputs never propagate;
/// `Label` reuses an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowSelector {
    New,
    None,
    Label(FlowLabel),
}

impl std::str::FromStr for FlowSelector {
    type Err = FlowLabelParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "new" => Ok(FlowSelector::New),
            "none" => Ok(FlowSelector::None),
            other => Ok(FlowSelector::Label(other.parse()?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRequest {
    pub task_id: TaskId,
    pub flow: FlowSelector,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastClearRequest {
    pub point: PointSelector,
    pub namespace: NamespaceSelector,
    pub paths: Option<Vec<String>>,
}

/// The full operator verb surface. `run` and `stop` are not modelled
/// here — `run` is simply starting the main loop, and `stop` is
/// [`super::shutdown::ShutdownRequest`], handled one layer up since it ends
/// the loop rather than acting within a quantum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Hold,
    Release,
    Pause,
    Resume,
    Reload,
    Trigger(TriggerRequest),
    Kill(TaskId),
    Poll(TaskId),
    Remove(TaskId),
    Reset(TaskId, TaskState),
    BroadcastSet(crate::broadcast::BroadcastEntry),
    BroadcastClear(BroadcastClearRequest),
    Checkpoint(String),
    Insert(TaskId),
}

/// Result of successfully applying one [`OperatorCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Held { count: usize },
    Released { count: usize },
    Paused,
    Resumed,
    ReloadAcknowledged,
    Triggered { tasks: Vec<TaskId> },
    Killed { tasks: Vec<TaskId> },
    PollScheduled { tasks: Vec<TaskId> },
    Removed { tasks: Vec<TaskId> },
    Reset { task: TaskId, state: TaskState },
    BroadcastSet,
    BroadcastCleared { count: usize },
    Checkpointed { id: i64 },
    Inserted { task: TaskId },
}

/// A command could not be applied as given — always an operator error
/// (exit code 1).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("no task matching '{0}' in the pool")]
    NoSuchTask(TaskId),
    #[error("task '{0}' is already active; a second trigger is a no-op")]
    AlreadyActive(TaskId),
    #[error("no task definition named '{0}'")]
    UnknownTaskDefinition(String),
    #[error("checkpoint name must not be empty")]
    EmptyCheckpointName,
    #[error("reset target state '{1:?}' is not reachable by operator command for '{0}'")]
    UnreachableResetState(TaskId, TaskState),
}

impl CommandError {
    /// Every [`CommandError`] is an operator error.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
