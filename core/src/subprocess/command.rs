//! Command descriptors, handles, and results for work dispatched to the
//! subprocess pool.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The category a command belongs to. The pool caps concurrency per
/// category so, e.g., a burst of log-fetch jobs cannot starve submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Submission,
    Poll,
    Kill,
    Handler,
    LogFetch,
}

/// A command dispatched to the subprocess pool. `callback_id` correlates
/// the eventual [`CommandResult`] back to the proxy/operation that
/// requested it; the pool never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub category: Category,
    pub argv: Vec<String>,
    pub stdin: Option<String>,
    pub working_dir: Option<String>,
    pub environment: HashMap<String, String>,
    pub soft_timeout: Duration,
    pub max_retries: u32,
    pub callback_id: String,
}

impl Command {
    pub fn new(category: Category, argv: Vec<String>, callback_id: impl Into<String>) -> Self {
        Self {
            category,
            argv,
            stdin: None,
            working_dir: None,
            environment: HashMap::new(),
            soft_timeout: Duration::from_secs(60),
            max_retries: 0,
            callback_id: callback_id.into(),
        }
    }
}

/// A handle returned from `submit`, identifying the in-flight command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub u64);

/// The outcome of a completed (or timed-out) command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub handle: JobHandle,
    pub callback_id: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}
