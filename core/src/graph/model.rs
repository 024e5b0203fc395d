//! The compiled, immutable graph: task definitions, per-sequence trigger
//! expressions, and the children index used for output delivery.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::ClockOffset;
use crate::cycle::SequenceSpec;

use super::trigger::{ClockGate, Offset, PrerequisiteAtom, Qualifier, TriggerExpr};

/// One `(sequence, trigger expression)` pairing: a task may be triggered by
/// different expressions on different owning sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrerequisiteGroupDef {
    pub sequence_text: String,
    pub expr: TriggerExpr,
}

/// An output a task definition declares, and whether completion is mandatory
/// for the proxy to be considered complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDef {
    pub name: String,
    pub required: bool,
}

/// Execution settings carried on a task definition. Most fields are simple
/// pass-through configuration consumed by the job lifecycle and subprocess
/// layers rather than by graph compilation itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSettings {
    pub script: Option<String>,
    pub environment: HashMap<String, String>,
    pub batch_system: Option<String>,
    pub platform: Option<String>,
    pub submission_poll_intervals: Vec<String>,
    pub execution_poll_intervals: Vec<String>,
    pub submission_timeout: Option<String>,
    pub execution_time_limit: Option<String>,
    pub submission_retry_delays: Vec<String>,
    pub execution_retry_delays: Vec<String>,
    pub clock_trigger_offset: Option<String>,
    pub clock_expire_offset: Option<String>,
}

/// Immutable, post-compilation record of one task (or family member)
/// definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    pub family_ancestry: Vec<String>,
    pub owning_sequences: Vec<String>,
    pub prerequisite_groups: Vec<PrerequisiteGroupDef>,
    pub removal_prerequisites: Vec<PrerequisiteGroupDef>,
    pub outputs: Vec<OutputDef>,
    pub clock_gate: Option<ClockGate>,
    pub execution: ExecutionSettings,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            family_ancestry: Vec::new(),
            owning_sequences: Vec::new(),
            prerequisite_groups: Vec::new(),
            removal_prerequisites: Vec::new(),
            outputs: vec![
                OutputDef { name: "submitted".into(), required: false },
                OutputDef { name: "started".into(), required: false },
                OutputDef { name: "succeeded".into(), required: true },
            ],
            clock_gate: None,
            execution: ExecutionSettings::default(),
        }
    }

    pub fn is_parentless(&self) -> bool {
        self.prerequisite_groups.iter().all(|g| g.expr.atoms().is_empty())
    }

    pub fn declare_output(&mut self, name: impl Into<String>, required: bool) {
        let name = name.into();
        if let Some(existing) = self.outputs.iter_mut().find(|o| o.name == name) {
            existing.required = required;
        } else {
            self.outputs.push(OutputDef { name, required });
        }
    }
}

/// Lookup key for the children index: an owning task name, its relative
/// offset text (empty string means same-point), and the output qualifier
/// text that must complete.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChildKey {
    pub parent_name: String,
    pub offset_text: String,
    pub qualifier_text: String,
}

impl ChildKey {
    pub fn from_atom(atom: &PrerequisiteAtom) -> Self {
        let offset_text = match &atom.offset {
            Offset::SamePoint => String::new(),
            Offset::Interval(text) => text.clone(),
            Offset::Initial => "^".to_string(),
            Offset::Final => "$".to_string(),
        };
        let qualifier_text = match &atom.qualifier {
            Qualifier::Submitted => "submitted".to_string(),
            Qualifier::Started => "started".to_string(),
            Qualifier::Succeeded => "succeeded".to_string(),
            Qualifier::Failed => "failed".to_string(),
            Qualifier::Finished => "finished".to_string(),
            Qualifier::SubmitFailed => "submit-failed".to_string(),
            Qualifier::Expired => "expired".to_string(),
            Qualifier::Custom(c) => c.clone(),
        };
        Self { parent_name: atom.task_name.clone(), offset_text, qualifier_text }
    }
}

/// The compiled graph: task definitions plus the reverse index from
/// "task X produced output Y" to the children awaiting it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphModel {
    pub definitions: HashMap<String, TaskDefinition>,
    pub sequences: HashMap<String, SequenceText>,
    #[serde(skip)]
    children_index: HashMap<ChildKey, Vec<String>>,
    /// Reverse index built from `removal_prerequisites` only, kept separate
    /// from `children_index` so a suicide trigger's victim is never treated
    /// as a spawn candidate of its own removal edge.
    #[serde(skip)]
    removal_index: HashMap<ChildKey, Vec<String>>,
}

/// Stored alongside its text so `Sequence`s can be re-bound to a different
/// initial/final cycle point on reload without re-parsing the graph text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceText(pub String);

impl GraphModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_definition(&mut self, def: TaskDefinition) {
        self.definitions.insert(def.name.clone(), def);
    }

    pub fn definition(&self, name: &str) -> Option<&TaskDefinition> {
        self.definitions.get(name)
    }

    pub fn task_names(&self) -> HashSet<&str> {
        self.definitions.keys().map(|s| s.as_str()).collect()
    }

    pub fn parentless_task_names(&self) -> Vec<&str> {
        self.definitions
            .values()
            .filter(|d| d.is_parentless())
            .map(|d| d.name.as_str())
            .collect()
    }

    /// Rebuild the children index from scratch. Called once after
    /// compilation (and again after a reload that changes prerequisites).
    ///
    /// `prerequisite_groups` and `removal_prerequisites` are indexed
    /// separately: the former drives admission (a child may be spawned once
    /// its normal prerequisites fire), the latter drives suicide (a child
    /// already in the pool is withdrawn, never spawned, once its removal
    /// prerequisite fires).
    pub fn rebuild_children_index(&mut self) {
        self.children_index.clear();
        self.removal_index.clear();
        for def in self.definitions.values() {
            for group in &def.prerequisite_groups {
                for atom in group.expr.atoms() {
                    let key = ChildKey::from_atom(atom);
                    self.children_index.entry(key).or_default().push(def.name.clone());
                }
            }
            for group in &def.removal_prerequisites {
                for atom in group.expr.atoms() {
                    let key = ChildKey::from_atom(atom);
                    self.removal_index.entry(key).or_default().push(def.name.clone());
                }
            }
        }
    }

    /// Children awaiting `(parent_name, offset_text, qualifier_text)`.
    pub fn children_awaiting(&self, key: &ChildKey) -> &[String] {
        self.children_index.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every `(offset_text, children)` entry in the children index keyed by
    /// a given producer task and output qualifier, regardless of offset.
    /// Used by output delivery, which must consider every offset a
    /// dependent might reference.
    pub fn children_offsets_for(&self, parent_name: &str, qualifier_text: &str) -> Vec<(&str, &Vec<String>)> {
        self.children_index
            .iter()
            .filter(|(k, _)| k.parent_name == parent_name && k.qualifier_text == qualifier_text)
            .map(|(k, v)| (k.offset_text.as_str(), v))
            .collect()
    }

    /// Same as [`Self::children_offsets_for`] but over the removal index:
    /// tasks whose suicide prerequisite references this producer/qualifier.
    pub fn removal_offsets_for(&self, parent_name: &str, qualifier_text: &str) -> Vec<(&str, &Vec<String>)> {
        self.removal_index
            .iter()
            .filter(|(k, _)| k.parent_name == parent_name && k.qualifier_text == qualifier_text)
            .map(|(k, v)| (k.offset_text.as_str(), v))
            .collect()
    }

    /// Populate each named task's `clock_gate` from the normalized config's
    /// `special_tasks` declarations, the same post-compile mutation pattern
    /// used to splice `runtime` execution settings onto task definitions. A
    /// task named in both lists gets the expire gate, since expiry is the
    /// stronger of the two: a trigger gate only delays submission, an expire
    /// gate withdraws the task outright.
    pub fn apply_clock_gates(&mut self, clock_trigger: &[ClockOffset], clock_expire: &[ClockOffset]) {
        for decl in clock_trigger {
            if let Some(def) = self.definitions.get_mut(&decl.task_name) {
                def.clock_gate = Some(ClockGate { offset_text: decl.offset.clone(), is_expire: false });
            }
        }
        for decl in clock_expire {
            if let Some(def) = self.definitions.get_mut(&decl.task_name) {
                def.clock_gate = Some(ClockGate { offset_text: decl.offset.clone(), is_expire: true });
            }
        }
    }
}
