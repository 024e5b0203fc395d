//! Trigger expressions: boolean trees over prerequisite atoms.

use serde::{Deserialize, Serialize};

/// Offset anchoring for a prerequisite atom's left-hand task reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Offset {
    /// Same point as the right-hand side (the default when no `[...]` is given).
    SamePoint,
    /// A relative interval, e.g. `[-PT6H]`, stored in its original text form
    /// (resolved against a concrete calendar/cycling-mode at compile time).
    Interval(String),
    /// `[^]` — anchored to the workflow's initial cycle point.
    Initial,
    /// `[$]` — anchored to the workflow's final cycle point.
    Final,
}

/// The qualifier half of a prerequisite atom: which output of the left-hand
/// task must complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Qualifier {
    Submitted,
    Started,
    Succeeded,
    Failed,
    Finished,
    SubmitFailed,
    Expired,
    Custom(String),
}

impl Qualifier {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "submitted" => Qualifier::Submitted,
            "started" => Qualifier::Started,
            "succeeded" | "succeed" => Qualifier::Succeeded,
            "failed" | "fail" => Qualifier::Failed,
            "finished" | "finish" => Qualifier::Finished,
            "submit-failed" | "submit_failed" => Qualifier::SubmitFailed,
            "expired" => Qualifier::Expired,
            other => Qualifier::Custom(other.to_string()),
        }
    }

    pub fn default_qualifier() -> Self {
        Qualifier::Succeeded
    }

    pub fn is_reserved_name(name: &str) -> bool {
        matches!(
            name,
            "submitted" | "started" | "succeeded" | "failed" | "finished" | "submit-failed" | "expired"
        )
    }
}

/// `(task_name, offset, qualifier)` — the atomic unit a prerequisite group is
/// built from, and the key the children index is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteAtom {
    pub task_name: String,
    pub offset: Offset,
    pub qualifier: Qualifier,
}

impl PrerequisiteAtom {
    pub fn new(task_name: impl Into<String>, offset: Offset, qualifier: Qualifier) -> Self {
        Self { task_name: task_name.into(), offset, qualifier }
    }
}

/// An external clock-trigger or clock-expire gate carried alongside a
/// trigger expression (`foo(PT2H)` in graph text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockGate {
    pub offset_text: String,
    pub is_expire: bool,
}

/// A boolean tree over [`PrerequisiteAtom`]s, built by [`super::parser`] and
/// flattened into [`super::model::Prerequisite`] groups by the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerExpr {
    Atom(PrerequisiteAtom),
    Suicide(Box<TriggerExpr>),
    And(Vec<TriggerExpr>),
    Or(Vec<TriggerExpr>),
}

impl TriggerExpr {
    /// All atoms appearing anywhere in the expression, depth-first.
    pub fn atoms(&self) -> Vec<&PrerequisiteAtom> {
        let mut out = Vec::new();
        self.collect_atoms(&mut out);
        out
    }

    fn collect_atoms<'a>(&'a self, out: &mut Vec<&'a PrerequisiteAtom>) {
        match self {
            TriggerExpr::Atom(a) => out.push(a),
            TriggerExpr::Suicide(inner) => inner.collect_atoms(out),
            TriggerExpr::And(items) | TriggerExpr::Or(items) => {
                for item in items {
                    item.collect_atoms(out);
                }
            }
        }
    }

    pub fn is_suicide(&self) -> bool {
        matches!(self, TriggerExpr::Suicide(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualifier_parse_defaults_to_succeeded() {
        assert_eq!(Qualifier::parse("bogus"), Qualifier::Custom("bogus".to_string()));
        assert_eq!(Qualifier::default_qualifier(), Qualifier::Succeeded);
    }

    #[test]
    fn test_atoms_collects_nested() {
        let expr = TriggerExpr::And(vec![
            TriggerExpr::Atom(PrerequisiteAtom::new("a", Offset::SamePoint, Qualifier::Succeeded)),
            TriggerExpr::Or(vec![
                TriggerExpr::Atom(PrerequisiteAtom::new("b", Offset::SamePoint, Qualifier::Failed)),
                TriggerExpr::Atom(PrerequisiteAtom::new("c", Offset::SamePoint, Qualifier::Succeeded)),
            ]),
        ]);
        assert_eq!(expr.atoms().len(), 3);
    }

    #[test]
    fn test_reserved_output_names() {
        assert!(Qualifier::is_reserved_name("succeeded"));
        assert!(!Qualifier::is_reserved_name("data_ready"));
    }
}
