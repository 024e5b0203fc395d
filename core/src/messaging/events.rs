//! Inbound task message parsing and outbound event-handler dispatch.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cycle::CyclePoint;
use crate::flow::FlowLabel;

/// Severity carried on an inbound task message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Normal,
    Warning,
    Critical,
    Custom,
}

/// One `(task, cycle, flow, submit_num, severity, text, timestamp)`
/// message as received over the task-to-scheduler boundary protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_name: String,
    pub point: CyclePoint,
    pub flow: FlowLabel,
    pub submit_num: u64,
    pub severity: Severity,
    pub text: String,
    pub event_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// What a message resolves to, once interpreted against the proxy's current
/// `submit_num`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpretation {
    /// A recognized state-change text: `started`, `succeeded`,
    /// `failed/<detail>`, `vacated/<detail>`, `submit-failed`.
    StateChange(String),
    /// Matches a custom output name declared on the task definition.
    CustomOutput(String),
    /// Arrived for an older `submit_num` than the proxy's current one.
    Stale,
    /// Severity warrants forwarding to the event-handler dispatcher, with no
    /// state-change or output implication.
    Notable,
    Unrecognized,
}

const RECOGNIZED_PREFIXES: &[&str] = &["started", "succeeded", "failed", "vacated", "submit-failed"];

/// Interpret `message` given the proxy's current `submit_num` and its
/// definition's declared custom output names.
pub fn interpret(message: &TaskMessage, current_submit_num: u64, custom_outputs: &[String]) -> Interpretation {
    if message.submit_num < current_submit_num {
        return Interpretation::Stale;
    }
    if RECOGNIZED_PREFIXES.iter().any(|p| message.text == *p || message.text.starts_with(&format!("{p}/"))) {
        return Interpretation::StateChange(message.text.clone());
    }
    if custom_outputs.iter().any(|o| o == &message.text) {
        return Interpretation::CustomOutput(message.text.clone());
    }
    match message.severity {
        Severity::Warning | Severity::Critical | Severity::Custom => Interpretation::Notable,
        Severity::Normal => Interpretation::Unrecognized,
    }
}

/// The full set of event kinds a workflow may define handler templates for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Submitted,
    Started,
    Succeeded,
    Failed,
    Retry,
    SubmissionRetry,
    Warning,
    Critical,
    Custom,
    Late,
    Expired,
    SubmissionTimeout,
    ExecutionTimeout,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Submitted => "submitted",
            EventKind::Started => "started",
            EventKind::Succeeded => "succeeded",
            EventKind::Failed => "failed",
            EventKind::Retry => "retry",
            EventKind::SubmissionRetry => "submission-retry",
            EventKind::Warning => "warning",
            EventKind::Critical => "critical",
            EventKind::Custom => "custom",
            EventKind::Late => "late",
            EventKind::Expired => "expired",
            EventKind::SubmissionTimeout => "submission-timeout",
            EventKind::ExecutionTimeout => "execution-timeout",
        }
    }
}

/// Per-workflow event-handler configuration: a list of command templates
/// per recognized event kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventHandlers {
    pub templates: HashMap<String, Vec<String>>,
    pub meta: HashMap<String, String>,
}

impl EventHandlers {
    pub fn handlers_for(&self, kind: EventKind) -> &[String] {
        self.templates.get(kind.as_str()).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Render a `%(name)s`-style handler template. Unknown substitutions are
/// left verbatim rather than erroring, matching the tolerant behaviour of
/// the boundary protocol's templating.
pub fn render_template(template: &str, substitutions: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("%(") {
        out.push_str(&rest[..start]);
        let after_marker = &rest[start + 2..];
        match after_marker.find(")s") {
            Some(close) => {
                let key = &after_marker[..close];
                match substitutions.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + close + 2]),
                }
                rest = &after_marker[close + 2..];
            }
            None => {
                out.push_str(&rest[start..start + 2]);
                rest = after_marker;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Build the standard substitution set for an event firing against one
/// proxy, plus any user-defined `meta` items.
pub fn standard_substitutions(
    suite: &str,
    task_id: &str,
    event: EventKind,
    message: &str,
    point: &CyclePoint,
    meta: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut subs = HashMap::new();
    subs.insert("suite".to_string(), suite.to_string());
    subs.insert("id".to_string(), task_id.to_string());
    subs.insert("event".to_string(), event.as_str().to_string());
    subs.insert("message".to_string(), message.to_string());
    subs.insert("point".to_string(), point.to_string());
    for (k, v) in meta {
        subs.insert(k.clone(), v.clone());
    }
    subs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::CalendarMode;

    fn icp() -> CyclePoint {
        CyclePoint::parse_datetime("20240101T000000Z", CalendarMode::ProlepticGregorian).unwrap()
    }

    fn msg(text: &str, submit_num: u64) -> TaskMessage {
        TaskMessage {
            task_name: "a".into(),
            point: icp(),
            flow: FlowLabel::Numbered(1),
            submit_num,
            severity: Severity::Normal,
            text: text.into(),
            event_time: None,
        }
    }

    #[test]
    fn test_recognized_state_change() {
        assert_eq!(interpret(&msg("succeeded", 1), 1, &[]), Interpretation::StateChange("succeeded".into()));
        assert_eq!(interpret(&msg("failed/nonzero exit", 1), 1, &[]), Interpretation::StateChange("failed/nonzero exit".into()));
    }

    #[test]
    fn test_stale_submit_num_ignored() {
        assert_eq!(interpret(&msg("succeeded", 0), 1, &[]), Interpretation::Stale);
    }

    #[test]
    fn test_custom_output_recognized() {
        let outputs = vec!["data_ready".to_string()];
        assert_eq!(interpret(&msg("data_ready", 1), 1, &outputs), Interpretation::CustomOutput("data_ready".into()));
    }

    #[test]
    fn test_template_rendering() {
        let mut subs = HashMap::new();
        subs.insert("suite".to_string(), "demo".to_string());
        subs.insert("event".to_string(), "failed".to_string());
        let rendered = render_template("mail -s '%(event)s in %(suite)s'", &subs);
        assert_eq!(rendered, "mail -s 'failed in demo'");
    }

    #[test]
    fn test_template_unknown_key_left_verbatim() {
        let subs = HashMap::new();
        let rendered = render_template("%(mystery)s", &subs);
        assert_eq!(rendered, "%(mystery)s");
    }
}
