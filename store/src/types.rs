//! Row types mirroring the tables in `schema.rs`.
//!
//! These are plain data — `cylc-store` does not know about `TaskProxy` or
//! `CyclePoint`; the core crate converts to/from its own types at the
//! boundary (restart protocol, step 3).

use serde::{Deserialize, Serialize};

/// One row of `task_pool`: a live proxy as far as the database is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPoolRow {
    pub name: String,
    pub point: String,
    pub flow_label: String,
    pub submit_num: i64,
    pub state: String,
    pub is_held: bool,
}

/// One row of `task_outputs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutputRow {
    pub name: String,
    pub point: String,
    pub flow_label: String,
    pub output: String,
    pub timestamp: String,
}

/// One row of `task_events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEventRow {
    pub id: i64,
    pub name: String,
    pub point: String,
    pub flow_label: String,
    pub event: String,
    pub message: String,
    pub timestamp: String,
}

/// One row of `task_jobs`: one submit attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskJobRow {
    pub id: i64,
    pub name: String,
    pub point: String,
    pub flow_label: String,
    pub submit_num: i64,
    pub batch_system: String,
    pub job_id: Option<String>,
    pub platform: String,
    pub host: Option<String>,
    pub submitted_at: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub terminal_state: Option<String>,
}

/// One row of `broadcast_states`: an active overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastStateRow {
    pub id: i64,
    pub point_selector: Option<String>,
    pub namespace_selector: String,
    pub setting_path: String,
    pub value: String,
    pub expires_at: Option<String>,
}

/// One row of `xtriggers`: the last resolved call for a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XtriggerRow {
    pub signature: String,
    pub satisfied: bool,
    pub result: String,
}

/// One row of `abs_outputs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsOutputRow {
    pub name: String,
    pub output: String,
    pub point: String,
}

/// Singleton workflow parameters (`workflow_params` table, key/value rows).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkflowParams {
    pub initial_cycle_point: Option<String>,
    pub final_cycle_point: Option<String>,
    pub cycling_mode: Option<String>,
    pub utc_mode: bool,
    pub next_flow_label: i64,
    pub runtime_version: Option<String>,
}

impl WorkflowParams {
    pub const KEY_ICP: &'static str = "initial_cycle_point";
    pub const KEY_FCP: &'static str = "final_cycle_point";
    pub const KEY_CYCLING_MODE: &'static str = "cycling_mode";
    pub const KEY_UTC_MODE: &'static str = "utc_mode";
    pub const KEY_NEXT_FLOW_LABEL: &'static str = "next_flow_label";
    pub const KEY_RUNTIME_VERSION: &'static str = "runtime_version";
}
