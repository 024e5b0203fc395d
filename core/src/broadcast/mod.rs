//! Broadcast: runtime config overrides layered over a proxy's static
//! settings, persisted so they survive restart.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cycle::CyclePoint;

/// Which cycle points an override applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointSelector {
    AnyPoint,
    CyclePoint(CyclePoint),
}

impl PointSelector {
    /// `None` for the persisted row's nullable `point_selector` column.
    pub fn encode(&self) -> Option<String> {
        match self {
            PointSelector::AnyPoint => None,
            PointSelector::CyclePoint(p) => Some(p.to_string()),
        }
    }
}

/// Which namespace(s) an override applies to: either every ancestor of the
/// named family (the family itself plus its members), or one exact task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamespaceSelector {
    Ancestor(String),
    ExactTask(String),
}

impl NamespaceSelector {
    pub fn encode(&self) -> String {
        match self {
            NamespaceSelector::Ancestor(name) => format!("ancestor:{name}"),
            NamespaceSelector::ExactTask(name) => format!("task:{name}"),
        }
    }

    pub fn decode(raw: &str) -> Option<Self> {
        if let Some(rest) = raw.strip_prefix("ancestor:") {
            Some(NamespaceSelector::Ancestor(rest.to_string()))
        } else if let Some(rest) = raw.strip_prefix("task:") {
            Some(NamespaceSelector::ExactTask(rest.to_string()))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastEntry {
    pub point: PointSelector,
    pub namespace: NamespaceSelector,
    pub path: String,
    pub value: String,
}

/// The installed set of overrides, plus the layering rule used to resolve
/// an effective setting for one proxy at submit time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcastTable {
    entries: Vec<BroadcastEntry>,
}

fn namespace_matches(ns: &NamespaceSelector, task_name: &str, family_ancestry: &[String]) -> bool {
    match ns {
        NamespaceSelector::ExactTask(name) => name == task_name,
        NamespaceSelector::Ancestor(name) => name == task_name || family_ancestry.iter().any(|a| a == name),
    }
}

fn point_matches(sel: &PointSelector, point: &CyclePoint) -> bool {
    match sel {
        PointSelector::AnyPoint => true,
        PointSelector::CyclePoint(p) => p == point,
    }
}

impl BroadcastTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, entry: BroadcastEntry) {
        self.entries.retain(|e| !(e.point == entry.point && e.namespace == entry.namespace && e.path == entry.path));
        self.entries.push(entry);
    }

    /// Remove every entry matching the given selectors; if `paths` is
    /// `Some`, only remove entries whose path is in that set.
    pub fn clear(&mut self, point: &PointSelector, namespace: &NamespaceSelector, paths: Option<&[String]>) {
        self.entries.retain(|e| {
            let matches_selector = &e.point == point && &e.namespace == namespace;
            let matches_path = paths.map(|ps| ps.iter().any(|p| p == &e.path)).unwrap_or(true);
            !(matches_selector && matches_path)
        });
    }

    /// Layer static config with matching broadcasts, nearest-match-wins:
    /// static → any-point/ancestor → cycle-point/ancestor →
    /// cycle-point/exact-task.
    pub fn effective_settings(
        &self,
        static_config: &HashMap<String, String>,
        task_name: &str,
        point: &CyclePoint,
        family_ancestry: &[String],
    ) -> HashMap<String, String> {
        let mut effective = static_config.clone();

        let mut apply_layer = |predicate: &dyn Fn(&BroadcastEntry) -> bool| {
            for entry in &self.entries {
                if predicate(entry) {
                    effective.insert(entry.path.clone(), entry.value.clone());
                }
            }
        };

        apply_layer(&|e: &BroadcastEntry| {
            matches!(e.point, PointSelector::AnyPoint) && matches!(e.namespace, NamespaceSelector::Ancestor(_))
                && namespace_matches(&e.namespace, task_name, family_ancestry)
        });
        apply_layer(&|e: &BroadcastEntry| {
            point_matches(&e.point, point)
                && !matches!(e.point, PointSelector::AnyPoint)
                && matches!(e.namespace, NamespaceSelector::Ancestor(_))
                && namespace_matches(&e.namespace, task_name, family_ancestry)
        });
        apply_layer(&|e: &BroadcastEntry| {
            point_matches(&e.point, point) && matches!(e.namespace, NamespaceSelector::ExactTask(_))
                && namespace_matches(&e.namespace, task_name, family_ancestry)
        });

        effective
    }

    /// Drop point-targeted entries whose cycle point has been proven past
    /// (i.e. is strictly earlier than `earliest_active`).
    pub fn garbage_collect(&mut self, earliest_active: &CyclePoint) {
        self.entries.retain(|e| match &e.point {
            PointSelector::AnyPoint => true,
            PointSelector::CyclePoint(p) => p >= earliest_active,
        });
    }

    pub fn entries(&self) -> &[BroadcastEntry] {
        &self.entries
    }
}
