//! A PBS-shaped adapter, included to demonstrate the registry dispatching
//! to more than one batch system. Directive syntax and output parsing
//! follow PBS/Torque conventions closely enough to be representative, not
//! to be exhaustive.

use super::{AdapterError, BatchSystemAdapter, JobSpec, PollOutcome, PollStatus};

pub struct PbsAdapter;

impl BatchSystemAdapter for PbsAdapter {
    fn name(&self) -> &'static str {
        "pbs"
    }

    fn directive_prefix(&self) -> &'static str {
        "#PBS"
    }

    fn default_job_name_length_limit(&self) -> usize {
        15
    }

    fn render_directives(&self, spec: &JobSpec) -> String {
        let mut lines = vec![format!("{} -N {}", self.directive_prefix(), spec.job_name)];
        if let Some(limit) = spec.execution_time_limit {
            let total_seconds = limit.num_seconds().max(0);
            lines.push(format!(
                "{} -l walltime={:02}:{:02}:{:02}",
                self.directive_prefix(),
                total_seconds / 3600,
                (total_seconds / 60) % 60,
                total_seconds % 60
            ));
        }
        for (key, value) in &spec.directives {
            lines.push(format!("{} -{} {}", self.directive_prefix(), key, value));
        }
        lines.join("\n")
    }

    fn submit_command(&self, job_script_path: &str) -> Vec<String> {
        vec!["qsub".to_string(), job_script_path.to_string()]
    }

    fn parse_submit_output(&self, stdout: &str) -> Result<String, AdapterError> {
        let job_id = stdout.trim();
        if job_id.is_empty() {
            return Err(AdapterError::UnparsableSubmitOutput(stdout.to_string()));
        }
        Ok(job_id.to_string())
    }

    fn poll_command(&self, job_id: &str, _platform: Option<&str>) -> Vec<String> {
        vec!["qstat".to_string(), "-f".to_string(), job_id.to_string()]
    }

    fn parse_poll_output(&self, stdout: &str) -> Result<PollOutcome, AdapterError> {
        let state_line = stdout.lines().find(|l| l.trim_start().starts_with("job_state"));
        let state = state_line
            .and_then(|l| l.split('=').nth(1))
            .map(|s| s.trim())
            .ok_or_else(|| AdapterError::UnparsablePollOutput(stdout.to_string()))?;

        let status = match state {
            "R" | "Q" | "H" => PollStatus::Running,
            "C" => {
                let exit_line = stdout.lines().find(|l| l.trim_start().starts_with("Exit_status"));
                let exit_code = exit_line.and_then(|l| l.split('=').nth(1)).and_then(|s| s.trim().parse::<i32>().ok());
                if exit_code == Some(0) {
                    PollStatus::Succeeded
                } else {
                    PollStatus::Failed
                }
            }
            _ => PollStatus::Gone,
        };
        Ok(PollOutcome { status, exit_code: None, started_at: None, finished_at: None })
    }

    fn kill_command(&self, job_id: &str) -> Vec<String> {
        vec!["qdel".to_string(), job_id.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_directives_includes_walltime() {
        let adapter = PbsAdapter;
        let spec = JobSpec {
            job_name: "foo".into(),
            execution_time_limit: Some(chrono::Duration::seconds(3661)),
            ..Default::default()
        };
        let rendered = adapter.render_directives(&spec);
        assert!(rendered.contains("walltime=01:01:01"));
    }

    #[test]
    fn test_parse_poll_running() {
        let adapter = PbsAdapter;
        let outcome = adapter.parse_poll_output("    job_state = R\n").unwrap();
        assert_eq!(outcome.status, PollStatus::Running);
    }

    #[test]
    fn test_parse_poll_completed_success() {
        let adapter = PbsAdapter;
        let outcome = adapter.parse_poll_output("    job_state = C\n    Exit_status = 0\n").unwrap();
        assert_eq!(outcome.status, PollStatus::Succeeded);
    }

    #[test]
    fn test_parse_poll_completed_failure() {
        let adapter = PbsAdapter;
        let outcome = adapter.parse_poll_output("    job_state = C\n    Exit_status = 1\n").unwrap();
        assert_eq!(outcome.status, PollStatus::Failed);
    }
}
