//! The bounded async subprocess pool: all job submission, remote ssh,
//! polling, kills, event handlers, and log retrieval run through here so the
//! single-threaded main loop never blocks on external I/O.

mod command;
mod pool;

pub use command::{Category, Command, CommandResult, JobHandle};
pub use pool::{QosLimits, SubprocessPool};
