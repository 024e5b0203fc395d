//! `cylc_core` — the scheduling core of a non-global cycling workflow
//! engine: cycle-point arithmetic, trigger-graph compilation, the task pool
//! and job lifecycle state machine, a bounded subprocess pool for job
//! submission/poll/kill, the messaging and broadcast layers, and the main
//! loop that ties them into one scheduling quantum.
//!
//! # Modules
//!
//! - [`cycle`] — cycle points, intervals, recurrence sequences
//! - [`graph`] — trigger-expression parsing and graph compilation
//! - [`pool`] — task proxies, prerequisite matching, runahead, queues
//! - [`jobs`] — job lifecycle state machine, retries, timers
//! - [`subprocess`] — bounded async subprocess pool
//! - [`adapters`] — batch-system adapter interface and built-ins
//! - [`messaging`] — task message bus, event interpretation, xtriggers
//! - [`broadcast`] — runtime-setting overrides scoped by point/namespace
//! - [`flow`] — flow labels
//! - [`clock`] — the `Clock` trait and its real/fake implementations
//! - [`config`] — normalized configuration loading
//! - [`scheduler`] — the main loop, operator commands, shutdown, restart
//! - [`error`] — top-level error aggregation

pub mod adapters;
pub mod broadcast;
pub mod clock;
pub mod config;
pub mod cycle;
pub mod error;
pub mod flow;
pub mod graph;
pub mod jobs;
pub mod messaging;
pub mod pool;
pub mod scheduler;
pub mod subprocess;

pub use config::{ConfigError, NormalizedConfig};
pub use error::SchedulerError;
pub use scheduler::{
    BroadcastClearRequest, CommandError, CommandOutcome, FlowSelector, MainLoop, MainLoopConfig, OperatorCommand,
    QuantumReport, ShutdownMode, ShutdownRequest, TaskId, TriggerRequest,
};
