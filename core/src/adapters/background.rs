//! The reference adapter: runs the job script as a local forked process,
//! tracked by pid, with no real batch-system queue underneath.

use super::{AdapterError, BatchSystemAdapter, JobSpec, PollOutcome, PollStatus};

pub struct BackgroundAdapter;

impl BatchSystemAdapter for BackgroundAdapter {
    fn name(&self) -> &'static str {
        "background"
    }

    fn directive_prefix(&self) -> &'static str {
        "#"
    }

    fn render_directives(&self, _spec: &JobSpec) -> String {
        String::new()
    }

    fn submit_command(&self, job_script_path: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), format!("nohup sh {job_script_path} >/dev/null 2>&1 & echo $!")]
    }

    fn parse_submit_output(&self, stdout: &str) -> Result<String, AdapterError> {
        let pid = stdout.trim();
        if pid.is_empty() || pid.parse::<u32>().is_err() {
            return Err(AdapterError::UnparsableSubmitOutput(stdout.to_string()));
        }
        Ok(pid.to_string())
    }

    fn poll_command(&self, job_id: &str, _platform: Option<&str>) -> Vec<String> {
        vec!["kill".to_string(), "-0".to_string(), job_id.to_string()]
    }

    fn parse_poll_output(&self, stdout: &str) -> Result<PollOutcome, AdapterError> {
        // `kill -0` itself carries the verdict in its exit code, not stdout;
        // callers pass the exit code through stdout as a convention so this
        // adapter's parser stays a pure string -> outcome function.
        match stdout.trim() {
            "0" => Ok(PollOutcome { status: PollStatus::Running, exit_code: None, started_at: None, finished_at: None }),
            _ => Ok(PollOutcome { status: PollStatus::Gone, exit_code: None, started_at: None, finished_at: None }),
        }
    }

    fn kill_command(&self, job_id: &str) -> Vec<String> {
        vec!["kill".to_string(), "-TERM".to_string(), job_id.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submit_output() {
        let adapter = BackgroundAdapter;
        assert_eq!(adapter.parse_submit_output("12345\n").unwrap(), "12345");
        assert!(adapter.parse_submit_output("not a pid").is_err());
    }

    #[test]
    fn test_poll_output_running_vs_gone() {
        let adapter = BackgroundAdapter;
        assert_eq!(adapter.parse_poll_output("0").unwrap().status, PollStatus::Running);
        assert_eq!(adapter.parse_poll_output("1").unwrap().status, PollStatus::Gone);
    }
}
