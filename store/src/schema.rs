//! Schema for the scheduler's run database.
//!
//! One connection, ten tables. `apply` is idempotent so it can run at both
//! fresh-workflow creation and every restart.

use rusqlite::Connection;

use crate::error::Result;

pub const LATEST_CHECKPOINT_ID: i64 = 0;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS workflow_params (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_pool (
    name        TEXT NOT NULL,
    point       TEXT NOT NULL,
    flow_label  TEXT NOT NULL,
    submit_num  INTEGER NOT NULL DEFAULT 0,
    state       TEXT NOT NULL,
    is_held     INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (name, point, flow_label)
);

CREATE TABLE IF NOT EXISTS task_pool_checkpoints (
    checkpoint_id INTEGER NOT NULL,
    event         TEXT NOT NULL,
    name          TEXT NOT NULL,
    point         TEXT NOT NULL,
    flow_label    TEXT NOT NULL,
    submit_num    INTEGER NOT NULL,
    state         TEXT NOT NULL,
    is_held       INTEGER NOT NULL,
    PRIMARY KEY (checkpoint_id, name, point, flow_label)
);

CREATE TABLE IF NOT EXISTS task_outputs (
    name       TEXT NOT NULL,
    point      TEXT NOT NULL,
    flow_label TEXT NOT NULL,
    output     TEXT NOT NULL,
    timestamp  TEXT NOT NULL,
    PRIMARY KEY (name, point, flow_label, output)
);

CREATE TABLE IF NOT EXISTS task_events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    point      TEXT NOT NULL,
    flow_label TEXT NOT NULL,
    event      TEXT NOT NULL,
    message    TEXT NOT NULL DEFAULT '',
    timestamp  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_jobs (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    name           TEXT NOT NULL,
    point          TEXT NOT NULL,
    flow_label     TEXT NOT NULL,
    submit_num     INTEGER NOT NULL,
    batch_system   TEXT NOT NULL,
    job_id         TEXT,
    platform       TEXT NOT NULL,
    host           TEXT,
    submitted_at   TEXT,
    started_at     TEXT,
    finished_at    TEXT,
    terminal_state TEXT
);

CREATE TABLE IF NOT EXISTS broadcast_states (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    point_selector    TEXT,
    namespace_selector TEXT NOT NULL,
    setting_path      TEXT NOT NULL,
    value             TEXT NOT NULL,
    expires_at        TEXT
);

CREATE TABLE IF NOT EXISTS broadcast_events (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    action             TEXT NOT NULL,
    point_selector     TEXT,
    namespace_selector TEXT NOT NULL,
    setting_path       TEXT NOT NULL,
    value              TEXT,
    timestamp          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS xtriggers (
    signature TEXT PRIMARY KEY NOT NULL,
    satisfied INTEGER NOT NULL,
    result    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS abs_outputs (
    name   TEXT NOT NULL,
    output TEXT NOT NULL,
    point  TEXT NOT NULL,
    PRIMARY KEY (name, output)
);
";

/// Create every table if it doesn't already exist.
pub fn apply(conn: &Connection) -> Result<()> {
    conn.execute_batch(DDL)?;
    Ok(())
}
