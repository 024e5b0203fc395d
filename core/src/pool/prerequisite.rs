//! The prerequisite engine: evaluating trigger expressions against a set of
//! satisfied atoms, and delivering completed outputs against the graph's
//! children index to decide what becomes ready or gets spawned.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::cycle::{CyclePoint, Interval};
use crate::flow::FlowLabel;
use crate::graph::{ChildKey, GraphModel, Offset, TriggerExpr};

use super::proxy::ProxyId;

/// A single prerequisite group attached to a proxy: the (possibly compound)
/// expression from its task definition, plus which atoms have fired so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrerequisiteGroup {
    pub sequence_text: String,
    pub expr: TriggerExpr,
    satisfied: HashSet<ChildKey>,
}

impl PrerequisiteGroup {
    pub fn new(sequence_text: impl Into<String>, expr: TriggerExpr) -> Self {
        Self { sequence_text: sequence_text.into(), expr, satisfied: HashSet::new() }
    }

    /// Mark `key` satisfied. Returns whether the group's truth value might
    /// have changed (i.e. the key was newly inserted and appears in the
    /// expression).
    pub fn satisfy(&mut self, key: &ChildKey) -> bool {
        let relevant = self.expr.atoms().iter().any(|a| &ChildKey::from_atom(a) == key);
        relevant && self.satisfied.insert(key.clone())
    }

    pub fn is_true(&self) -> bool {
        eval(&self.expr, &self.satisfied)
    }

    pub fn satisfied_keys(&self) -> &HashSet<ChildKey> {
        &self.satisfied
    }
}

fn eval(expr: &TriggerExpr, satisfied: &HashSet<ChildKey>) -> bool {
    match expr {
        TriggerExpr::Atom(atom) => satisfied.contains(&ChildKey::from_atom(atom)),
        TriggerExpr::Suicide(inner) => eval(inner, satisfied),
        TriggerExpr::And(items) => items.iter().all(|e| eval(e, satisfied)),
        TriggerExpr::Or(items) => items.iter().any(|e| eval(e, satisfied)),
    }
}

/// Resolve a `ChildKey`'s offset text back into the cycle point its atom
/// refers to, given the completed output's own point and the workflow's
/// initial/final cycle points.
pub fn resolve_producer_point(
    child_key_offset_text: &str,
    icp: CyclePoint,
    fcp: Option<CyclePoint>,
) -> Option<Offset> {
    Some(match child_key_offset_text {
        "" => Offset::SamePoint,
        "^" => {
            let _ = icp;
            Offset::Initial
        }
        "$" => {
            let _ = fcp;
            Offset::Final
        }
        other => Offset::Interval(other.to_string()),
    })
}

/// Given a completed output at `producer_point`, compute the cycle point a
/// dependent atom with this offset would need to be declared at.
///
/// `child_point = producer_point - offset`, except `^`/`$` offsets are
/// absolute: any child, regardless of its own point, may be satisfied by the
/// single producer instance at the workflow's initial/final point.
pub fn child_point_for_offset(offset: &Offset, producer_point: CyclePoint, icp: CyclePoint, fcp: Option<CyclePoint>) -> Option<Vec<CyclePoint>> {
    match offset {
        Offset::SamePoint => Some(vec![producer_point]),
        Offset::Interval(text) => {
            let interval: Interval = text.parse().ok()?;
            producer_point.sub(interval).ok().map(|p| vec![p])
        }
        Offset::Initial => {
            if producer_point == icp {
                // Absolute dependency: cannot enumerate every dependent point here;
                // callers resolve this case directly against each existing proxy.
                Some(vec![])
            } else {
                None
            }
        }
        Offset::Final => match fcp {
            Some(fcp) if producer_point == fcp => Some(vec![]),
            _ => None,
        },
    }
}

/// The result of delivering one completed output: prerequisite groups that
/// newly became true (candidates for becoming ready / spawning children) and
/// proxy ids that should be spawned fresh if they don't yet exist.
#[derive(Debug, Default, Clone)]
pub struct DeliveryResult {
    pub newly_true: Vec<ProxyId>,
    pub spawn_candidates: Vec<ProxyId>,
}

/// Deliver `(task, cycle, flow, output)` against the graph's children index,
/// updating every live proxy whose prerequisite group references this atom,
/// and collecting candidate ids to spawn for children that don't exist yet.
#[allow(clippy::too_many_arguments)]
pub fn deliver_output(
    graph: &GraphModel,
    icp: CyclePoint,
    fcp: Option<CyclePoint>,
    producer_task: &str,
    producer_point: CyclePoint,
    flow: FlowLabel,
    output: &str,
    mut update_proxy: impl FnMut(&ProxyId, &ChildKey) -> bool,
    mut proxy_exists: impl FnMut(&ProxyId) -> bool,
) -> DeliveryResult {
    let mut result = DeliveryResult::default();
    let candidate_offsets: Vec<(&str, &Vec<String>)> = graph
        .children_offsets_for(producer_task, output)
        .into_iter()
        .collect();

    for (offset_text, children) in candidate_offsets {
        let offset = match resolve_producer_point(offset_text, icp, fcp) {
            Some(o) => o,
            None => continue,
        };
        let child_points = match child_point_for_offset(&offset, producer_point, icp, fcp) {
            Some(points) => points,
            None => continue,
        };
        let key = ChildKey {
            parent_name: producer_task.to_string(),
            offset_text: offset_text.to_string(),
            qualifier_text: output.to_string(),
        };
        for child_name in children {
            for child_point in &child_points {
                let id = ProxyId::new(child_name.clone(), *child_point, flow);
                if update_proxy(&id, &key) {
                    result.newly_true.push(id.clone());
                }
                if !proxy_exists(&id) {
                    result.spawn_candidates.push(id);
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::CalendarMode;
    use crate::graph::{CompileError, GraphSection, Offset as GOffset, PrerequisiteAtom, Qualifier};

    fn icp() -> CyclePoint {
        CyclePoint::parse_datetime("20240101T000000Z", CalendarMode::ProlepticGregorian).unwrap()
    }

    #[test]
    fn test_group_satisfy_and_eval_and() {
        let mut g = PrerequisiteGroup::new(
            "R1",
            TriggerExpr::And(vec![
                TriggerExpr::Atom(PrerequisiteAtom::new("a", GOffset::SamePoint, Qualifier::Succeeded)),
                TriggerExpr::Atom(PrerequisiteAtom::new("b", GOffset::SamePoint, Qualifier::Succeeded)),
            ]),
        );
        assert!(!g.is_true());
        let key_a = ChildKey { parent_name: "a".into(), offset_text: String::new(), qualifier_text: "succeeded".into() };
        g.satisfy(&key_a);
        assert!(!g.is_true());
        let key_b = ChildKey { parent_name: "b".into(), offset_text: String::new(), qualifier_text: "succeeded".into() };
        g.satisfy(&key_b);
        assert!(g.is_true());
    }

    #[test]
    fn test_group_eval_or() {
        let mut g = PrerequisiteGroup::new(
            "R1",
            TriggerExpr::Or(vec![
                TriggerExpr::Atom(PrerequisiteAtom::new("a", GOffset::SamePoint, Qualifier::Succeeded)),
                TriggerExpr::Atom(PrerequisiteAtom::new("b", GOffset::SamePoint, Qualifier::Succeeded)),
            ]),
        );
        let key_a = ChildKey { parent_name: "a".into(), offset_text: String::new(), qualifier_text: "succeeded".into() };
        g.satisfy(&key_a);
        assert!(g.is_true());
    }

    #[test]
    fn test_deliver_output_spawns_child(
    ) -> Result<(), CompileError> {
        use std::collections::HashMap as Map;
        let sections = vec![GraphSection { sequence_text: "R1".into(), graph_text: "a => b".into() }];
        let graph = crate::graph::compile(&sections, &Map::new(), &[])?;

        let result = deliver_output(
            &graph,
            icp(),
            None,
            "a",
            icp(),
            crate::flow::FlowLabel::Numbered(1),
            "succeeded",
            |_id, _key| true,
            |_id| false,
        );
        assert_eq!(result.spawn_candidates.len(), 1);
        assert_eq!(result.spawn_candidates[0].task_name, "b");
        Ok(())
    }

    #[test]
    fn test_offset_child_point_computation() {
        let tomorrow = icp().add(Interval::Duration(crate::cycle::Duration8601 { days: 1, ..Default::default() })).unwrap();
        let points = child_point_for_offset(&Offset::Interval("-P1D".to_string()), icp(), icp(), None).unwrap();
        assert_eq!(points, vec![tomorrow]);
    }
}
