//! [`TaskProxy`]: one live instance `(task_name, cycle_point, flow_label,
//! submit_num)` and the mutable state the scheduling engine drives.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cycle::CyclePoint;
use crate::flow::FlowLabel;
use crate::graph::TaskDefinition;

use super::prerequisite::PrerequisiteGroup;

/// Identity of a live proxy. At most one proxy exists per id at any time
/// (the task pool's core invariant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyId {
    pub task_name: String,
    pub point: CyclePoint,
    pub flow: FlowLabel,
}

impl ProxyId {
    pub fn new(task_name: impl Into<String>, point: CyclePoint, flow: FlowLabel) -> Self {
        Self { task_name: task_name.into(), point, flow }
    }
}

impl std::fmt::Display for ProxyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}/{}", self.task_name, self.point, self.flow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Waiting,
    Preparing,
    Submitted,
    Running,
    Succeeded,
    Failed,
    SubmitFailed,
    Expired,
    HeldWaiting,
}

impl TaskState {
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Preparing | TaskState::Submitted | TaskState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed | TaskState::SubmitFailed | TaskState::Expired)
    }

    /// Whether this proxy counts toward the "active cycle point" set used
    /// for runahead accounting — succeeded/failed proxies do not.
    pub fn counts_for_runahead(&self) -> bool {
        !matches!(self, TaskState::Succeeded | TaskState::Failed)
    }

    /// Stable lowercase-hyphenated name stored in `task_pool.state`.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Preparing => "preparing",
            TaskState::Submitted => "submitted",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::SubmitFailed => "submit-failed",
            TaskState::Expired => "expired",
            TaskState::HeldWaiting => "held-waiting",
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = TaskStateParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(match raw {
            "waiting" => TaskState::Waiting,
            "preparing" => TaskState::Preparing,
            "submitted" => TaskState::Submitted,
            "running" => TaskState::Running,
            "succeeded" => TaskState::Succeeded,
            "failed" => TaskState::Failed,
            "submit-failed" => TaskState::SubmitFailed,
            "expired" => TaskState::Expired,
            "held-waiting" => TaskState::HeldWaiting,
            other => return Err(TaskStateParseError(other.to_string())),
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unrecognized task state: {0}")]
pub struct TaskStateParseError(String);

/// Scheduled timers driving timeout/retry/poll transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timers {
    pub submission_timeout: Option<DateTime<Utc>>,
    pub execution_timeout: Option<DateTime<Utc>>,
    pub next_poll: Option<DateTime<Utc>>,
    pub next_retry: Option<DateTime<Utc>>,
}

/// External gates beyond prerequisite satisfaction: a clock-trigger/expire
/// offset and the set of xtrigger signatures this proxy is still waiting on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalTriggers {
    pub clock_gate_passed: bool,
    pub clock_expired: bool,
    pub pending_xtriggers: Vec<String>,
}

impl ExternalTriggers {
    pub fn all_satisfied(&self) -> bool {
        self.pending_xtriggers.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProxy {
    pub id: ProxyId,
    pub state: TaskState,
    pub is_held: bool,
    pub submit_num: u64,
    pub prerequisite_groups: Vec<PrerequisiteGroup>,
    pub removal_prerequisites: Vec<PrerequisiteGroup>,
    pub outputs: HashMap<String, bool>,
    pub required_outputs: Vec<String>,
    pub timers: Timers,
    pub external_triggers: ExternalTriggers,
}

impl TaskProxy {
    pub fn new(id: ProxyId) -> Self {
        Self {
            id,
            state: TaskState::Waiting,
            is_held: false,
            submit_num: 0,
            prerequisite_groups: Vec::new(),
            removal_prerequisites: Vec::new(),
            outputs: HashMap::new(),
            required_outputs: Vec::new(),
            timers: Timers::default(),
            external_triggers: ExternalTriggers::default(),
        }
    }

    /// Instantiate a fresh proxy from its compiled task definition: carries
    /// over the definition's prerequisite/removal groups (empty of satisfied
    /// atoms) and required-output names. Used both when spawning a new proxy
    /// during normal scheduling and when rehydrating the pool on restart.
    pub fn from_definition(id: ProxyId, def: &TaskDefinition) -> Self {
        let mut proxy = Self::new(id);
        proxy.prerequisite_groups =
            def.prerequisite_groups.iter().map(|g| PrerequisiteGroup::new(g.sequence_text.clone(), g.expr.clone())).collect();
        proxy.removal_prerequisites =
            def.removal_prerequisites.iter().map(|g| PrerequisiteGroup::new(g.sequence_text.clone(), g.expr.clone())).collect();
        proxy.required_outputs = def.outputs.iter().filter(|o| o.required).map(|o| o.name.clone()).collect();
        proxy
    }

    pub fn complete_output(&mut self, name: &str) {
        self.outputs.insert(name.to_string(), true);
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.get(name).copied().unwrap_or(false)
    }

    /// All prerequisite groups true, not held, clock-trigger passed, not
    /// clock-expired, all xtriggers resolved.
    pub fn is_ready_to_submit(&self) -> bool {
        !self.is_held
            && self.state == TaskState::Waiting
            && self.prerequisite_groups.iter().all(|g| g.is_true())
            && self.external_triggers.clock_gate_passed
            && !self.external_triggers.clock_expired
            && self.external_triggers.all_satisfied()
    }

    /// Complete if every required output has fired, or the proxy reached
    /// `succeeded` outright.
    pub fn is_complete(&self) -> bool {
        if self.state == TaskState::Succeeded {
            return true;
        }
        self.state.is_terminal() && self.required_outputs.iter().all(|o| self.has_output(o))
    }

    pub fn is_incomplete(&self) -> bool {
        self.state.is_terminal() && !self.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::CalendarMode;
    use crate::graph::{Offset, PrerequisiteAtom, Qualifier, TriggerExpr};

    fn icp() -> CyclePoint {
        CyclePoint::parse_datetime("20240101T000000Z", CalendarMode::ProlepticGregorian).unwrap()
    }

    #[test]
    fn test_ready_requires_empty_prereqs_true() {
        let mut proxy = TaskProxy::new(ProxyId::new("a", icp(), FlowLabel::Numbered(1)));
        proxy.external_triggers.clock_gate_passed = true;
        assert!(proxy.is_ready_to_submit());
    }

    #[test]
    fn test_not_ready_when_held() {
        let mut proxy = TaskProxy::new(ProxyId::new("a", icp(), FlowLabel::Numbered(1)));
        proxy.external_triggers.clock_gate_passed = true;
        proxy.is_held = true;
        assert!(!proxy.is_ready_to_submit());
    }

    #[test]
    fn test_not_ready_until_prereq_group_true() {
        let mut proxy = TaskProxy::new(ProxyId::new("b", icp(), FlowLabel::Numbered(1)));
        proxy.external_triggers.clock_gate_passed = true;
        proxy.prerequisite_groups.push(PrerequisiteGroup::new(
            "R1",
            TriggerExpr::Atom(PrerequisiteAtom::new("a", Offset::SamePoint, Qualifier::Succeeded)),
        ));
        assert!(!proxy.is_ready_to_submit());
    }

    #[test]
    fn test_completeness_on_succeeded() {
        let mut proxy = TaskProxy::new(ProxyId::new("a", icp(), FlowLabel::Numbered(1)));
        proxy.required_outputs = vec!["succeeded".to_string(), "data_ready".to_string()];
        proxy.state = TaskState::Succeeded;
        assert!(proxy.is_complete());
    }

    #[test]
    fn test_incomplete_when_required_output_missing() {
        let mut proxy = TaskProxy::new(ProxyId::new("a", icp(), FlowLabel::Numbered(1)));
        proxy.required_outputs = vec!["data_ready".to_string()];
        proxy.state = TaskState::Failed;
        assert!(proxy.is_incomplete());
    }

    #[test]
    fn test_from_definition_carries_required_outputs() {
        use crate::graph::TaskDefinition;
        let def = TaskDefinition::new("a");
        let proxy = TaskProxy::from_definition(ProxyId::new("a", icp(), FlowLabel::Numbered(1)), &def);
        assert_eq!(proxy.required_outputs, vec!["succeeded".to_string()]);
        assert!(proxy.prerequisite_groups.is_empty());
    }

    #[test]
    fn test_task_state_db_roundtrip() {
        for state in [
            TaskState::Waiting,
            TaskState::Preparing,
            TaskState::Submitted,
            TaskState::Running,
            TaskState::Succeeded,
            TaskState::Failed,
            TaskState::SubmitFailed,
            TaskState::Expired,
            TaskState::HeldWaiting,
        ] {
            let s = state.as_db_str();
            assert_eq!(s.parse::<TaskState>().unwrap(), state);
        }
    }
}
