//! Flow labels: the provenance tag that lets multiple concurrent runs share
//! one task pool without their outputs satisfying each other's prerequisites.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed flow label: {0}")]
pub struct FlowLabelParseError(String);

/// Identifies the flow (run) that spawned a task proxy.
///
/// `Numbered` labels are allocated from the monotonic counter in
/// `cylc-store`'s `workflow_params` table and propagate to every descendant
/// spawned by triggering. `None` is the special label used by
/// `trigger --flow=none`: its outputs are recorded for history but never
/// satisfy another proxy's prerequisites, so the triggered subgraph runs in
/// isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowLabel {
    Numbered(i64),
    None,
}

impl FlowLabel {
    /// Whether an output carrying `self` may satisfy a prerequisite that
    /// wants `other`. Only the isolated `None` label is ever incompatible
    /// with everything, including itself.
    pub fn is_compatible_with(&self, other: &FlowLabel) -> bool {
        match (self, other) {
            (FlowLabel::None, _) | (_, FlowLabel::None) => false,
            (FlowLabel::Numbered(a), FlowLabel::Numbered(b)) => a == b,
        }
    }
}

impl fmt::Display for FlowLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowLabel::Numbered(n) => write!(f, "{}", n),
            FlowLabel::None => write!(f, "none"),
        }
    }
}

impl FromStr for FlowLabel {
    type Err = FlowLabelParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw == "none" {
            return Ok(FlowLabel::None);
        }
        raw.parse::<i64>()
            .map(FlowLabel::Numbered)
            .map_err(|_| FlowLabelParseError(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_numbered() {
        let label: FlowLabel = "7".parse().unwrap();
        assert_eq!(label, FlowLabel::Numbered(7));
        assert_eq!(label.to_string(), "7");
    }

    #[test]
    fn test_roundtrip_none() {
        let label: FlowLabel = "none".parse().unwrap();
        assert_eq!(label, FlowLabel::None);
        assert_eq!(label.to_string(), "none");
    }

    #[test]
    fn test_compatibility() {
        assert!(FlowLabel::Numbered(1).is_compatible_with(&FlowLabel::Numbered(1)));
        assert!(!FlowLabel::Numbered(1).is_compatible_with(&FlowLabel::Numbered(2)));
        assert!(!FlowLabel::None.is_compatible_with(&FlowLabel::None));
    }
}
