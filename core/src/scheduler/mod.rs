//! The scheduler: main loop, operator command surface, shutdown handling,
//! and the restart protocol that rehydrates a run from its private database.

mod commands;
mod main_loop;
mod restart;
mod shutdown;

pub use commands::{
    BroadcastClearRequest, CommandError, CommandOutcome, FlowSelector, OperatorCommand, TaskId, TriggerRequest,
};
pub use main_loop::{MainLoop, MainLoopConfig, QuantumReport};
pub use restart::{restore, CyclingMode, ResolvedWorkflowParams, RestartError, RestartOutcome};
pub use shutdown::{ShutdownMode, ShutdownRequest};
