//! The private run database: the only database the scheduler mutates.
//!
//! Typed rows, `persist`-then-`resolve` shaped methods, one file per workflow
//! run. A SQLite connection replaces a flat event log, and the ten tables in
//! `schema.rs` replace a single event kind, but the idea — small durable
//! store, opened once, written from a single owner — stays the same.

use std::path::{Path, PathBuf};

use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::schema::{self, LATEST_CHECKPOINT_ID};
use crate::types::{
    AbsOutputRow, BroadcastStateRow, TaskEventRow, TaskJobRow, TaskOutputRow, TaskPoolRow, WorkflowParams,
    XtriggerRow,
};

/// The private database owned exclusively by the scheduler process.
pub struct PrivateStore {
    conn: rusqlite::Connection,
    path: PathBuf,
}

impl PrivateStore {
    /// Open (creating if absent) the private database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "PrivateStore::open");
        let conn = rusqlite::Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::apply(&conn)?;
        Ok(Self { conn, path })
    }

    /// Open a private database backed purely by memory, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        schema::apply(&conn)?;
        Ok(Self {
            conn,
            path: PathBuf::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ---- workflow_params -------------------------------------------------

    pub fn load_workflow_params(&self) -> Result<WorkflowParams> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM workflow_params")?;
        let mut rows = stmt.query([])?;
        let mut params = WorkflowParams::default();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            match key.as_str() {
                WorkflowParams::KEY_ICP => params.initial_cycle_point = Some(value),
                WorkflowParams::KEY_FCP => params.final_cycle_point = Some(value),
                WorkflowParams::KEY_CYCLING_MODE => params.cycling_mode = Some(value),
                WorkflowParams::KEY_UTC_MODE => params.utc_mode = value == "1",
                WorkflowParams::KEY_NEXT_FLOW_LABEL => params.next_flow_label = value.parse().unwrap_or(1),
                WorkflowParams::KEY_RUNTIME_VERSION => params.runtime_version = Some(value),
                _ => {}
            }
        }
        Ok(params)
    }

    pub fn save_workflow_params(&self, params: &WorkflowParams) -> Result<()> {
        let pairs: Vec<(&str, String)> = vec![
            (WorkflowParams::KEY_ICP, params.initial_cycle_point.clone().unwrap_or_default()),
            (WorkflowParams::KEY_FCP, params.final_cycle_point.clone().unwrap_or_default()),
            (WorkflowParams::KEY_CYCLING_MODE, params.cycling_mode.clone().unwrap_or_default()),
            (WorkflowParams::KEY_UTC_MODE, if params.utc_mode { "1".into() } else { "0".into() }),
            (WorkflowParams::KEY_NEXT_FLOW_LABEL, params.next_flow_label.to_string()),
            (
                WorkflowParams::KEY_RUNTIME_VERSION,
                params.runtime_version.clone().unwrap_or_default(),
            ),
        ];
        for (key, value) in pairs {
            self.conn.execute(
                "INSERT INTO workflow_params (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }
        Ok(())
    }

    /// Allocate the next flow label, persisting the counter so it survives restarts.
    pub fn next_flow_label(&self) -> Result<i64> {
        let mut params = self.load_workflow_params()?;
        let label = params.next_flow_label.max(1);
        params.next_flow_label = label + 1;
        self.save_workflow_params(&params)?;
        Ok(label)
    }

    // ---- task_pool --------------------------------------------------------

    pub fn upsert_task_pool_row(&self, row: &TaskPoolRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO task_pool (name, point, flow_label, submit_num, state, is_held)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name, point, flow_label) DO UPDATE SET
                submit_num = excluded.submit_num,
                state = excluded.state,
                is_held = excluded.is_held",
            params![row.name, row.point, row.flow_label, row.submit_num, row.state, row.is_held as i64],
        )?;
        Ok(())
    }

    pub fn remove_task_pool_row(&self, name: &str, point: &str, flow_label: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM task_pool WHERE name = ?1 AND point = ?2 AND flow_label = ?3",
            params![name, point, flow_label],
        )?;
        Ok(())
    }

    pub fn load_task_pool(&self) -> Result<Vec<TaskPoolRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, point, flow_label, submit_num, state, is_held FROM task_pool")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TaskPoolRow {
                    name: row.get(0)?,
                    point: row.get(1)?,
                    flow_label: row.get(2)?,
                    submit_num: row.get(3)?,
                    state: row.get(4)?,
                    is_held: row.get::<_, i64>(5)? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- task_pool_checkpoints ---------------------------------------------

    /// Snapshot the current `task_pool` into checkpoint 0 (the continuously updated
    /// "latest"), and optionally also into a named positive checkpoint id.
    pub fn checkpoint(&mut self, event: &str, named_id: Option<i64>) -> Result<i64> {
        let tx = self.conn.transaction()?;
        let rows: Vec<(String, String, String, i64, String, i64)> = {
            let mut stmt = tx.prepare("SELECT name, point, flow_label, submit_num, state, is_held FROM task_pool")?;
            stmt.query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
        };

        let write_checkpoint = |tx: &rusqlite::Transaction, id: i64| -> Result<()> {
            tx.execute("DELETE FROM task_pool_checkpoints WHERE checkpoint_id = ?1", params![id])?;
            for (name, point, flow_label, submit_num, state, is_held) in &rows {
                tx.execute(
                    "INSERT INTO task_pool_checkpoints
                        (checkpoint_id, event, name, point, flow_label, submit_num, state, is_held)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![id, event, name, point, flow_label, submit_num, state, is_held],
                )?;
            }
            Ok(())
        };

        write_checkpoint(&tx, LATEST_CHECKPOINT_ID)?;
        let named = named_id.unwrap_or(LATEST_CHECKPOINT_ID);
        if named != LATEST_CHECKPOINT_ID {
            write_checkpoint(&tx, named)?;
        }
        tx.commit()?;
        Ok(named)
    }

    pub fn load_checkpoint(&self, id: i64) -> Result<Vec<TaskPoolRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, point, flow_label, submit_num, state, is_held
             FROM task_pool_checkpoints WHERE checkpoint_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok(TaskPoolRow {
                    name: row.get(0)?,
                    point: row.get(1)?,
                    flow_label: row.get(2)?,
                    submit_num: row.get(3)?,
                    state: row.get(4)?,
                    is_held: row.get::<_, i64>(5)? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if rows.is_empty() && id != LATEST_CHECKPOINT_ID {
            return Err(StoreError::NoSuchCheckpoint(id));
        }
        Ok(rows)
    }

    // ---- task_outputs -------------------------------------------------------

    pub fn record_output(&self, row: &TaskOutputRow) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO task_outputs (name, point, flow_label, output, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![row.name, row.point, row.flow_label, row.output, row.timestamp],
        )?;
        Ok(())
    }

    pub fn load_outputs_for_flow(&self, flow_label: &str) -> Result<Vec<TaskOutputRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, point, flow_label, output, timestamp FROM task_outputs WHERE flow_label = ?1")?;
        let rows = stmt
            .query_map(params![flow_label], |row| {
                Ok(TaskOutputRow {
                    name: row.get(0)?,
                    point: row.get(1)?,
                    flow_label: row.get(2)?,
                    output: row.get(3)?,
                    timestamp: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- task_events --------------------------------------------------------

    pub fn record_event(&self, name: &str, point: &str, flow_label: &str, event: &str, message: &str, timestamp: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO task_events (name, point, flow_label, event, message, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![name, point, flow_label, event, message, timestamp],
        )?;
        Ok(())
    }

    pub fn load_events_for(&self, name: &str, point: &str, flow_label: &str) -> Result<Vec<TaskEventRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, point, flow_label, event, message, timestamp FROM task_events
             WHERE name = ?1 AND point = ?2 AND flow_label = ?3 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![name, point, flow_label], |row| {
                Ok(TaskEventRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    point: row.get(2)?,
                    flow_label: row.get(3)?,
                    event: row.get(4)?,
                    message: row.get(5)?,
                    timestamp: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- task_jobs ------------------------------------------------------------

    /// Insert a row for a new submit attempt and return its id.
    pub fn insert_job(&self, job: &TaskJobRow) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO task_jobs
                (name, point, flow_label, submit_num, batch_system, job_id, platform, host,
                 submitted_at, started_at, finished_at, terminal_state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.name,
                job.point,
                job.flow_label,
                job.submit_num,
                job.batch_system,
                job.job_id,
                job.platform,
                job.host,
                job.submitted_at,
                job.started_at,
                job.finished_at,
                job.terminal_state,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_job_terminal(&self, id: i64, finished_at: &str, terminal_state: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE task_jobs SET finished_at = ?2, terminal_state = ?3 WHERE id = ?1",
            params![id, finished_at, terminal_state],
        )?;
        Ok(())
    }

    pub fn update_job_started(&self, id: i64, started_at: &str) -> Result<()> {
        self.conn
            .execute("UPDATE task_jobs SET started_at = ?2 WHERE id = ?1", params![id, started_at])?;
        Ok(())
    }

    /// The highest `submit_num` ever recorded for this `(name, point, flow_label)`,
    /// across all restarts — the monotonic counter invariant.
    pub fn max_submit_num(&self, name: &str, point: &str, flow_label: &str) -> Result<i64> {
        let result: Option<i64> = self
            .conn
            .query_row(
                "SELECT MAX(submit_num) FROM task_jobs WHERE name = ?1 AND point = ?2 AND flow_label = ?3",
                params![name, point, flow_label],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(result.unwrap_or(0))
    }

    pub fn load_jobs_for(&self, name: &str, point: &str, flow_label: &str) -> Result<Vec<TaskJobRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, point, flow_label, submit_num, batch_system, job_id, platform, host,
                    submitted_at, started_at, finished_at, terminal_state
             FROM task_jobs WHERE name = ?1 AND point = ?2 AND flow_label = ?3 ORDER BY submit_num",
        )?;
        let rows = stmt
            .query_map(params![name, point, flow_label], |row| {
                Ok(TaskJobRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    point: row.get(2)?,
                    flow_label: row.get(3)?,
                    submit_num: row.get(4)?,
                    batch_system: row.get(5)?,
                    job_id: row.get(6)?,
                    platform: row.get(7)?,
                    host: row.get(8)?,
                    submitted_at: row.get(9)?,
                    started_at: row.get(10)?,
                    finished_at: row.get(11)?,
                    terminal_state: row.get(12)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Submitted/running jobs as of the snapshot being restarted from (restart protocol step 5).
    pub fn load_active_jobs(&self) -> Result<Vec<TaskJobRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, point, flow_label, submit_num, batch_system, job_id, platform, host,
                    submitted_at, started_at, finished_at, terminal_state
             FROM task_jobs WHERE terminal_state IS NULL",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TaskJobRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    point: row.get(2)?,
                    flow_label: row.get(3)?,
                    submit_num: row.get(4)?,
                    batch_system: row.get(5)?,
                    job_id: row.get(6)?,
                    platform: row.get(7)?,
                    host: row.get(8)?,
                    submitted_at: row.get(9)?,
                    started_at: row.get(10)?,
                    finished_at: row.get(11)?,
                    terminal_state: row.get(12)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- broadcasts -----------------------------------------------------------

    pub fn set_broadcast(&self, row: &BroadcastStateRow) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO broadcast_states (point_selector, namespace_selector, setting_path, value, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![row.point_selector, row.namespace_selector, row.setting_path, row.value, row.expires_at],
        )?;
        let id = self.conn.last_insert_rowid();
        self.record_broadcast_event("set", row.point_selector.as_deref(), &row.namespace_selector, &row.setting_path, Some(&row.value))?;
        Ok(id)
    }

    pub fn clear_broadcast(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM broadcast_states WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn load_broadcasts(&self) -> Result<Vec<BroadcastStateRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, point_selector, namespace_selector, setting_path, value, expires_at FROM broadcast_states")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(BroadcastStateRow {
                    id: row.get(0)?,
                    point_selector: row.get(1)?,
                    namespace_selector: row.get(2)?,
                    setting_path: row.get(3)?,
                    value: row.get(4)?,
                    expires_at: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn record_broadcast_event(
        &self,
        action: &str,
        point_selector: Option<&str>,
        namespace_selector: &str,
        setting_path: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let timestamp = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO broadcast_events (action, point_selector, namespace_selector, setting_path, value, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![action, point_selector, namespace_selector, setting_path, value, timestamp],
        )?;
        Ok(())
    }

    // ---- xtriggers --------------------------------------------------------------

    pub fn set_xtrigger(&self, row: &XtriggerRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO xtriggers (signature, satisfied, result) VALUES (?1, ?2, ?3)
             ON CONFLICT(signature) DO UPDATE SET satisfied = excluded.satisfied, result = excluded.result",
            params![row.signature, row.satisfied as i64, row.result],
        )?;
        Ok(())
    }

    pub fn get_xtrigger(&self, signature: &str) -> Result<Option<XtriggerRow>> {
        let result = self
            .conn
            .query_row(
                "SELECT signature, satisfied, result FROM xtriggers WHERE signature = ?1",
                params![signature],
                |row| {
                    Ok(XtriggerRow {
                        signature: row.get(0)?,
                        satisfied: row.get::<_, i64>(1)? != 0,
                        result: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    pub fn load_xtriggers(&self) -> Result<Vec<XtriggerRow>> {
        let mut stmt = self.conn.prepare("SELECT signature, satisfied, result FROM xtriggers")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(XtriggerRow {
                    signature: row.get(0)?,
                    satisfied: row.get::<_, i64>(1)? != 0,
                    result: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- abs_outputs --------------------------------------------------------------

    pub fn record_abs_output(&self, row: &AbsOutputRow) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO abs_outputs (name, output, point) VALUES (?1, ?2, ?3)",
            params![row.name, row.output, row.point],
        )?;
        Ok(())
    }

    pub fn get_abs_output(&self, name: &str, output: &str) -> Result<Option<AbsOutputRow>> {
        let result = self
            .conn
            .query_row(
                "SELECT name, output, point FROM abs_outputs WHERE name = ?1 AND output = ?2",
                params![name, output],
                |row| {
                    Ok(AbsOutputRow {
                        name: row.get(0)?,
                        output: row.get(1)?,
                        point: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_pool_roundtrip() {
        let store = PrivateStore::open_in_memory().unwrap();
        let row = TaskPoolRow {
            name: "foo".into(),
            point: "20000101T0000Z".into(),
            flow_label: "1".into(),
            submit_num: 0,
            state: "waiting".into(),
            is_held: false,
        };
        store.upsert_task_pool_row(&row).unwrap();
        let loaded = store.load_task_pool().unwrap();
        assert_eq!(loaded, vec![row]);
    }

    #[test]
    fn test_checkpoint_named_and_latest() {
        let mut store = PrivateStore::open_in_memory().unwrap();
        let row = TaskPoolRow {
            name: "foo".into(),
            point: "1".into(),
            flow_label: "1".into(),
            submit_num: 1,
            state: "running".into(),
            is_held: false,
        };
        store.upsert_task_pool_row(&row).unwrap();
        let id = store.checkpoint("restart", Some(7)).unwrap();
        assert_eq!(id, 7);

        let latest = store.load_checkpoint(LATEST_CHECKPOINT_ID).unwrap();
        assert_eq!(latest, vec![row.clone()]);
        let named = store.load_checkpoint(7).unwrap();
        assert_eq!(named, vec![row]);

        assert!(store.load_checkpoint(99).is_err());
    }

    #[test]
    fn test_submit_num_monotonic_across_restarts() {
        let store = PrivateStore::open_in_memory().unwrap();
        let job = TaskJobRow {
            id: 0,
            name: "foo".into(),
            point: "1".into(),
            flow_label: "1".into(),
            submit_num: 1,
            batch_system: "background".into(),
            job_id: None,
            platform: "localhost".into(),
            host: None,
            submitted_at: None,
            started_at: None,
            finished_at: None,
            terminal_state: None,
        };
        store.insert_job(&job).unwrap();
        assert_eq!(store.max_submit_num("foo", "1", "1").unwrap(), 1);

        let mut job2 = job.clone();
        job2.submit_num = 2;
        store.insert_job(&job2).unwrap();
        assert_eq!(store.max_submit_num("foo", "1", "1").unwrap(), 2);
    }

    #[test]
    fn test_broadcast_set_clear() {
        let store = PrivateStore::open_in_memory().unwrap();
        let row = BroadcastStateRow {
            id: 0,
            point_selector: Some("1".into()),
            namespace_selector: "foo".into(),
            setting_path: "script".into(),
            value: "true".into(),
            expires_at: None,
        };
        let id = store.set_broadcast(&row).unwrap();
        assert_eq!(store.load_broadcasts().unwrap().len(), 1);
        store.clear_broadcast(id).unwrap();
        assert_eq!(store.load_broadcasts().unwrap().len(), 0);
    }

    #[test]
    fn test_xtrigger_cache() {
        let store = PrivateStore::open_in_memory().unwrap();
        assert!(store.get_xtrigger("clock()").unwrap().is_none());
        store
            .set_xtrigger(&XtriggerRow {
                signature: "clock()".into(),
                satisfied: true,
                result: "{}".into(),
            })
            .unwrap();
        let got = store.get_xtrigger("clock()").unwrap().unwrap();
        assert!(got.satisfied);
    }

    #[test]
    fn test_workflow_params_roundtrip() {
        let store = PrivateStore::open_in_memory().unwrap();
        let params = WorkflowParams {
            initial_cycle_point: Some("20000101T0000Z".into()),
            final_cycle_point: None,
            cycling_mode: Some("gregorian".into()),
            utc_mode: true,
            next_flow_label: 3,
            runtime_version: Some("1.0.0".into()),
        };
        store.save_workflow_params(&params).unwrap();
        let loaded = store.load_workflow_params().unwrap();
        assert_eq!(loaded, params);
    }

    #[test]
    fn test_next_flow_label_increments_and_persists() {
        let store = PrivateStore::open_in_memory().unwrap();
        assert_eq!(store.next_flow_label().unwrap(), 1);
        assert_eq!(store.next_flow_label().unwrap(), 2);
        assert_eq!(store.load_workflow_params().unwrap().next_flow_label, 3);
    }
}
