//! The normalized configuration object consumed by graph compilation and
//! the main loop. The source-language preprocessor that turns a raw
//! workflow definition into this shape is out of scope here; this module
//! only loads and validates the already-normalized document.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::ExecutionSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config file found at {0:?} and no explicit path was given")]
    NotFound(PathBuf),
    #[error("failed to read config file {path:?}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse { path: PathBuf, source: serde_yaml::Error },
}

/// `(task_name, offset)` pairing for clock triggers/expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockOffset {
    pub task_name: String,
    pub offset: String,
}

/// `(task_name, message)` pairing for external-trigger declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalTriggerDecl {
    pub task_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialTasksConfig {
    pub clock_trigger: Vec<ClockOffset>,
    pub clock_expire: Vec<ClockOffset>,
    pub sequential: Vec<String>,
    pub external_trigger: Vec<ExternalTriggerDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSectionConfig {
    pub sequence_spec: String,
    pub graph_text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub limit: usize,
    pub members: Vec<String>,
}

/// One named parameter set (`run=1..5`, `obs=ship,buoy,plane`) and the
/// templating pattern used to splice it into task names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSetConfig {
    pub values: Vec<String>,
    #[serde(default = "default_parameter_template")]
    pub template: String,
}

fn default_parameter_template() -> String {
    "_%(name)s%(value)s".to_string()
}

/// `{label: (function_signature, args, interval)}` attached to graph labels
/// via `@label`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XtriggerDecl {
    pub function_signature: String,
    pub args: Vec<String>,
    pub interval: String,
}

/// A custom output declared on a task's `runtime[task].outputs`, bridged to
/// [`crate::graph::CustomOutputDecl`] at compile time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomOutputConfig {
    pub task_name: String,
    pub output_name: String,
    pub required: bool,
}

/// The normalized configuration object. Consumers accept this shape or an
/// equivalent structured form — the templating/Jinja2 preprocessor that
/// produces it from a user-authored workflow definition is out of scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizedConfig {
    pub cycling_mode: String,
    pub utc_mode: bool,
    pub initial_cycle_point: Option<String>,
    pub final_cycle_point: Option<String>,
    pub runahead_limit: String,
    pub special_tasks: SpecialTasksConfig,
    pub graph_sections: Vec<GraphSectionConfig>,
    pub families: HashMap<String, Vec<String>>,
    pub runtime: HashMap<String, ExecutionSettings>,
    pub parameters: HashMap<String, ParameterSetConfig>,
    pub queues: HashMap<String, QueueConfig>,
    pub xtriggers: HashMap<String, XtriggerDecl>,
    pub custom_outputs: Vec<CustomOutputConfig>,
}

impl NormalizedConfig {
    /// Load with the fallback chain: explicit path, else
    /// `<run_dir>/.service/config.yaml` (the normalized form the
    /// out-of-scope preprocessor writes there), else an error — unlike a
    /// loop orchestrator, a scheduler has no sensible empty default.
    pub fn load(explicit_path: Option<&Path>, run_dir: &Path) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load_from_file(path).with_context(|| format!("failed to load config from {}", path.display()));
        }

        let normalized_path = run_dir.join(".service").join("config.yaml");
        if normalized_path.exists() {
            return Self::load_from_file(&normalized_path)
                .with_context(|| format!("failed to load config from {}", normalized_path.display()));
        }

        Err(ConfigError::NotFound(normalized_path).into())
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: Self =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        tracing::info!(path = %path.display(), "NormalizedConfig::load: loaded config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_empty_collections() {
        let config = NormalizedConfig::default();
        assert!(config.graph_sections.is_empty());
        assert!(config.families.is_empty());
        assert!(!config.utc_mode);
    }

    #[test]
    fn test_load_missing_config_is_not_found_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = NormalizedConfig::load(None, dir.path()).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn test_load_parses_minimal_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let service_dir = dir.path().join(".service");
        fs::create_dir_all(&service_dir).unwrap();
        fs::write(
            service_dir.join("config.yaml"),
            r#"
cycling_mode: integer
utc_mode: true
runahead_limit: "3"
graph_sections:
  - sequence_spec: "R1"
    graph_text: "a => b"
"#,
        )
        .unwrap();

        let config = NormalizedConfig::load(None, dir.path()).unwrap();
        assert_eq!(config.cycling_mode, "integer");
        assert!(config.utc_mode);
        assert_eq!(config.graph_sections.len(), 1);
        assert_eq!(config.graph_sections[0].sequence_spec, "R1");
    }

    #[test]
    fn test_load_explicit_path_overrides_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("custom.yaml");
        fs::write(&explicit, "cycling_mode: integer\n").unwrap();

        let config = NormalizedConfig::load(Some(&explicit), dir.path()).unwrap();
        assert_eq!(config.cycling_mode, "integer");
    }
}
