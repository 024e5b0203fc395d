//! Batch-system adapters: the pluggable boundary between a compiled job
//! script and whatever actually runs it (a local fork, a DRM, a cloud
//! queue).

mod background;
mod pbs;
mod registry;

pub use background::BackgroundAdapter;
pub use pbs::PbsAdapter;
pub use registry::AdapterRegistry;

use std::collections::HashMap;

use thiserror::Error;

/// Inputs an adapter needs to render a job's directive block.
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    pub job_name: String,
    pub platform: Option<String>,
    pub directives: HashMap<String, String>,
    pub execution_time_limit: Option<chrono::Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    Succeeded,
    Failed,
    Gone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub status: PollStatus,
    pub exit_code: Option<i32>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("could not extract batch-system job id from submission output: {0}")]
    UnparsableSubmitOutput(String),
    #[error("could not parse poll output: {0}")]
    UnparsablePollOutput(String),
}

/// Capability set a batch-system adapter must provide. Submission, polling,
/// and killing all run through the subprocess pool; this trait only
/// describes command construction and output parsing, never executes
/// anything itself.
pub trait BatchSystemAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn directive_prefix(&self) -> &'static str;

    fn default_job_name_length_limit(&self) -> usize {
        15
    }

    fn render_directives(&self, spec: &JobSpec) -> String;

    fn submit_command(&self, job_script_path: &str) -> Vec<String>;

    fn parse_submit_output(&self, stdout: &str) -> Result<String, AdapterError>;

    fn poll_command(&self, job_id: &str, platform: Option<&str>) -> Vec<String>;

    fn parse_poll_output(&self, stdout: &str) -> Result<PollOutcome, AdapterError>;

    fn kill_command(&self, job_id: &str) -> Vec<String>;
}
