//! Turns parsed graph sections into a compiled [`GraphModel`]: the six-step
//! contract of edge collection, sequence/prerequisite attachment, existence
//! inference, family expansion, and suicide-prerequisite extraction, plus
//! the fatal-error checks that guard against malformed graphs.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::cycle::Interval;

use super::model::{GraphModel, OutputDef, PrerequisiteGroupDef, TaskDefinition};
use super::parser::{parse_graph_text, GraphParseError};
use super::trigger::{Offset, PrerequisiteAtom, Qualifier, TriggerExpr};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("graph text parse error in section '{section}': {source}")]
    Parse { section: String, source: GraphParseError },
    #[error("task '{0}' is referenced with an offset but never declared on any sequence (ghost node)")]
    GhostNode(String),
    #[error("cyclic same-point dependency involving task '{0}'")]
    SamePointCycle(String),
    #[error("offset '{0}' does not parse as a valid interval for this workflow's cycling mode")]
    BadOffsetSyntax(String),
    #[error("'{0}' is a reserved output name and cannot be declared as a custom output")]
    ReservedOutputName(String),
}

/// One `(sequence_spec_text, graph_text)` input section.
#[derive(Debug, Clone)]
pub struct GraphSection {
    pub sequence_text: String,
    pub graph_text: String,
}

/// A custom output declared in a task's own runtime config (not inferred
/// from graph text), checked here for collisions with reserved names.
#[derive(Debug, Clone)]
pub struct CustomOutputDecl {
    pub task_name: String,
    pub output_name: String,
    pub required: bool,
}

fn family_qualifier_suffix(raw: &str) -> Option<(Qualifier, bool)> {
    let (verb, mode) = raw.rsplit_once('-')?;
    let is_all = match mode {
        "all" => true,
        "any" => false,
        _ => return None,
    };
    let qualifier = match verb {
        "succeed" => Qualifier::Succeeded,
        "fail" => Qualifier::Failed,
        "finish" => Qualifier::Finished,
        "submit" => Qualifier::Submitted,
        "expire" => Qualifier::Expired,
        "submit_fail" | "submit-fail" => Qualifier::SubmitFailed,
        _ => return None,
    };
    Some((qualifier, is_all))
}

/// Expand a family reference atom into an AND/OR tree over its members. Any
/// non-family atom (or family atom without a recognized `-all`/`-any` verb
/// suffix) passes through unchanged, save for a bare family reference with
/// the default qualifier, which is treated as `:succeed-all`.
fn expand_expr(expr: &TriggerExpr, families: &HashMap<String, Vec<String>>) -> TriggerExpr {
    match expr {
        TriggerExpr::Atom(atom) => expand_atom(atom, families),
        TriggerExpr::Suicide(inner) => TriggerExpr::Suicide(Box::new(expand_expr(inner, families))),
        TriggerExpr::And(items) => TriggerExpr::And(items.iter().map(|e| expand_expr(e, families)).collect()),
        TriggerExpr::Or(items) => TriggerExpr::Or(items.iter().map(|e| expand_expr(e, families)).collect()),
    }
}

fn expand_atom(atom: &PrerequisiteAtom, families: &HashMap<String, Vec<String>>) -> TriggerExpr {
    let Some(members) = families.get(&atom.task_name) else {
        return TriggerExpr::Atom(atom.clone());
    };
    let (qualifier, is_all) = match &atom.qualifier {
        Qualifier::Custom(raw) => match family_qualifier_suffix(raw) {
            Some(pair) => pair,
            None => (atom.qualifier.clone(), true),
        },
        Qualifier::Succeeded => (Qualifier::Succeeded, true),
        other => (other.clone(), true),
    };
    let member_atoms: Vec<TriggerExpr> = members
        .iter()
        .map(|m| TriggerExpr::Atom(PrerequisiteAtom::new(m.clone(), atom.offset.clone(), qualifier.clone())))
        .collect();
    if is_all {
        TriggerExpr::And(member_atoms)
    } else {
        TriggerExpr::Or(member_atoms)
    }
}

fn expand_right_side(task_name: &str, families: &HashMap<String, Vec<String>>) -> Vec<String> {
    match families.get(task_name) {
        Some(members) => members.clone(),
        None => vec![task_name.to_string()],
    }
}

fn validate_offsets(expr: &TriggerExpr) -> Result<(), CompileError> {
    for atom in expr.atoms() {
        if let Offset::Interval(text) = &atom.offset {
            text.parse::<Interval>().map_err(|_| CompileError::BadOffsetSyntax(text.clone()))?;
        }
    }
    Ok(())
}

/// Compile a full set of graph sections into a [`GraphModel`].
pub fn compile(
    sections: &[GraphSection],
    families: &HashMap<String, Vec<String>>,
    custom_outputs: &[CustomOutputDecl],
) -> Result<GraphModel, CompileError> {
    let mut model = GraphModel::new();
    let mut declared: HashSet<String> = HashSet::new();
    // (same-point-left, right) pairs, collected for the cycle check.
    let mut same_point_edges: Vec<(String, String)> = Vec::new();

    for section in sections {
        let parsed = parse_graph_text(&section.graph_text)
            .map_err(|e| CompileError::Parse { section: section.sequence_text.clone(), source: e })?;

        for bare in &parsed.bare_nodes {
            declared.insert(bare.clone());
            model
                .definitions
                .entry(bare.clone())
                .or_insert_with(|| TaskDefinition::new(bare.clone()));
        }

        for edge in &parsed.edges {
            let expanded_left = expand_expr(&edge.left, families);
            validate_offsets(&expanded_left)?;

            for same_point_name in same_point_task_names(&expanded_left) {
                declared.insert(same_point_name.clone());
                let def = model
                    .definitions
                    .entry(same_point_name.clone())
                    .or_insert_with(|| TaskDefinition::new(same_point_name.clone()));
                if !def.owning_sequences.contains(&section.sequence_text) {
                    def.owning_sequences.push(section.sequence_text.clone());
                }
            }

            let right_names = expand_right_side(&edge.right_task, families);
            for right_name in right_names {
                declared.insert(right_name.clone());
                let def = model
                    .definitions
                    .entry(right_name.clone())
                    .or_insert_with(|| TaskDefinition::new(right_name.clone()));
                if !def.owning_sequences.contains(&section.sequence_text) {
                    def.owning_sequences.push(section.sequence_text.clone());
                }

                if edge.suicide {
                    def.removal_prerequisites.push(PrerequisiteGroupDef {
                        sequence_text: section.sequence_text.clone(),
                        expr: expanded_left.clone(),
                    });
                } else {
                    def.prerequisite_groups.push(PrerequisiteGroupDef {
                        sequence_text: section.sequence_text.clone(),
                        expr: expanded_left.clone(),
                    });
                    for atom_name in same_point_task_names(&expanded_left) {
                        same_point_edges.push((atom_name, right_name.clone()));
                    }
                }
            }
        }
    }

    for def in model.definitions.values() {
        for group in def.prerequisite_groups.iter().chain(def.removal_prerequisites.iter()) {
            for atom in group.expr.atoms() {
                if !matches!(atom.offset, Offset::SamePoint) && !declared.contains(&atom.task_name) {
                    return Err(CompileError::GhostNode(atom.task_name.clone()));
                }
            }
        }
    }

    detect_same_point_cycle(&same_point_edges)?;

    for custom in custom_outputs {
        if Qualifier::is_reserved_name(&custom.output_name) {
            return Err(CompileError::ReservedOutputName(custom.output_name.clone()));
        }
        if let Some(def) = model.definitions.get_mut(&custom.task_name) {
            def.declare_output(&custom.output_name, custom.required);
        }
    }

    model.rebuild_children_index();
    Ok(model)
}

fn same_point_task_names(expr: &TriggerExpr) -> Vec<String> {
    expr.atoms()
        .into_iter()
        .filter(|a| matches!(a.offset, Offset::SamePoint))
        .map(|a| a.task_name.clone())
        .collect()
}

/// DFS cycle detection over same-point edges only: inter-cycle offsets
/// reference a different point and so can never close a same-point cycle.
fn detect_same_point_cycle(edges: &[(String, String)]) -> Result<(), CompileError> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, to) in edges {
        adjacency.entry(from.as_str()).or_default().push(to.as_str());
    }

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    for &node in adjacency.keys() {
        if !visited.contains(node) && has_cycle_dfs(node, &adjacency, &mut visited, &mut rec_stack) {
            return Err(CompileError::SamePointCycle(node.to_string()));
        }
    }
    Ok(())
}

fn has_cycle_dfs<'a>(
    node: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);

    if let Some(children) = adjacency.get(node) {
        for &child in children {
            if !visited.contains(child) {
                if has_cycle_dfs(child, adjacency, visited, rec_stack) {
                    return true;
                }
            } else if rec_stack.contains(child) {
                return true;
            }
        }
    }

    rec_stack.remove(node);
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(seq: &str, text: &str) -> GraphSection {
        GraphSection { sequence_text: seq.to_string(), graph_text: text.to_string() }
    }

    #[test]
    fn test_simple_linear_chain_compiles() {
        let sections = vec![section("R1", "a => b => c")];
        let model = compile(&sections, &HashMap::new(), &[]).unwrap();
        assert!(model.definition("a").is_some());
        assert!(model.definition("b").is_some());
        assert!(model.definition("c").is_some());
        assert_eq!(model.definition("b").unwrap().prerequisite_groups.len(), 1);
    }

    #[test]
    fn test_offset_reference_without_declaration_is_ghost_node() {
        let sections = vec![section("R1", "missing[-P1D] => b")];
        let err = compile(&sections, &HashMap::new(), &[]).unwrap_err();
        assert_eq!(err, CompileError::GhostNode("missing".to_string()));
    }

    #[test]
    fn test_offset_reference_with_declaration_elsewhere_is_fine() {
        let sections = vec![section("R1", "missing"), section("R1", "missing[-P1D] => b")];
        let model = compile(&sections, &HashMap::new(), &[]).unwrap();
        assert!(model.definition("b").is_some());
    }

    #[test]
    fn test_same_point_cycle_detected() {
        let sections = vec![section("R1", "a => b"), section("R1", "b => a")];
        let err = compile(&sections, &HashMap::new(), &[]).unwrap_err();
        assert!(matches!(err, CompileError::SamePointCycle(_)));
    }

    #[test]
    fn test_offset_cycle_is_not_flagged() {
        // b depends on a[-P1D]; this is a legitimate inter-cycle dependency,
        // not a same-point cycle, even though a also depends on b at the same point.
        let sections = vec![section("R1", "a => b"), section("R1", "b[-P1D] => a")];
        let model = compile(&sections, &HashMap::new(), &[]).unwrap();
        assert!(model.definition("a").is_some());
    }

    #[test]
    fn test_family_expansion_on_right_side() {
        let mut families = HashMap::new();
        families.insert("FAM".to_string(), vec!["m1".to_string(), "m2".to_string()]);
        let sections = vec![section("R1", "a => FAM")];
        let model = compile(&sections, &families, &[]).unwrap();
        assert!(model.definition("m1").unwrap().prerequisite_groups.iter().any(|g| g.sequence_text == "R1"));
        assert!(model.definition("m2").is_some());
    }

    #[test]
    fn test_family_succeed_all_expands_to_and() {
        let mut families = HashMap::new();
        families.insert("FAM".to_string(), vec!["m1".to_string(), "m2".to_string()]);
        let sections = vec![section("R1", "FAM:succeed-all => b")];
        let model = compile(&sections, &families, &[]).unwrap();
        let group = &model.definition("b").unwrap().prerequisite_groups[0];
        match &group.expr {
            TriggerExpr::And(items) => assert_eq!(items.len(), 2),
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_family_succeed_any_expands_to_or() {
        let mut families = HashMap::new();
        families.insert("FAM".to_string(), vec!["m1".to_string(), "m2".to_string()]);
        let sections = vec![section("R1", "FAM:succeed-any => b")];
        let model = compile(&sections, &families, &[]).unwrap();
        let group = &model.definition("b").unwrap().prerequisite_groups[0];
        assert!(matches!(group.expr, TriggerExpr::Or(_)));
    }

    #[test]
    fn test_suicide_edge_becomes_removal_prerequisite() {
        let sections = vec![section("R1", "bad"), section("R1", "bad => !victim"), section("R1", "victim")];
        let model = compile(&sections, &HashMap::new(), &[]).unwrap();
        let victim = model.definition("victim").unwrap();
        assert_eq!(victim.removal_prerequisites.len(), 1);
        assert!(victim.prerequisite_groups.is_empty());
    }

    #[test]
    fn test_reserved_custom_output_name_rejected() {
        let sections = vec![section("R1", "a")];
        let custom = vec![CustomOutputDecl { task_name: "a".into(), output_name: "succeeded".into(), required: true }];
        let err = compile(&sections, &HashMap::new(), &custom).unwrap_err();
        assert_eq!(err, CompileError::ReservedOutputName("succeeded".to_string()));
    }

    #[test]
    fn test_custom_output_declared() {
        let sections = vec![section("R1", "a")];
        let custom = vec![CustomOutputDecl { task_name: "a".into(), output_name: "data_ready".into(), required: true }];
        let model = compile(&sections, &HashMap::new(), &custom).unwrap();
        let def = model.definition("a").unwrap();
        assert!(def.outputs.iter().any(|o| o.name == "data_ready" && o.required));
    }

    #[test]
    fn test_bad_offset_syntax_rejected() {
        let sections = vec![section("R1", "missing[not-an-interval] => b"), section("R1", "missing")];
        let err = compile(&sections, &HashMap::new(), &[]).unwrap_err();
        assert!(matches!(err, CompileError::BadOffsetSyntax(_)));
    }
}
