//! Restart protocol: rehydrate a [`TaskPool`] and [`BroadcastTable`] from the
//! private run database, rebind it against a freshly compiled graph, and
//! hand back the set of in-flight jobs that need an immediate poll before
//! scheduling resumes.
//!
//! Config loading and graph compilation happen upstream of this module —
//! restart only ever consumes an already-compiled [`GraphModel`], matching
//! step 2 of the protocol ("re-parse the workflow configuration... and run
//! the graph compiler") running before step 3 ("rehydrate the task pool").

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

use cylc_store::{BroadcastStateRow, PrivateStore, StoreError, TaskJobRow, WorkflowParams, LATEST_CHECKPOINT_ID};

use crate::broadcast::{BroadcastEntry, BroadcastTable, NamespaceSelector, PointSelector};
use crate::cycle::{CalendarMode, CyclePoint, CyclePointParseError};
use crate::flow::{FlowLabel, FlowLabelParseError};
use crate::graph::GraphModel;
use crate::pool::{deliver_output, ProxyId, RunaheadLimit, TaskPool, TaskProxy, TaskState, TaskStateParseError};

#[derive(Debug, Error)]
pub enum RestartError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    CyclePoint(#[from] CyclePointParseError),
    #[error(transparent)]
    FlowLabel(#[from] FlowLabelParseError),
    #[error(transparent)]
    TaskState(#[from] TaskStateParseError),
    #[error("workflow_params.cycling_mode '{0}' is not a recognized calendar or 'integer'")]
    UnknownCyclingMode(String),
    #[error("malformed integer cycle point: {0}")]
    MalformedIntegerPoint(String),
    #[error("broadcast row {0} has an unparseable namespace selector: {1}")]
    MalformedBroadcastNamespace(i64, String),
}

/// The cycling axis a workflow uses, resolved once from `workflow_params`.
#[derive(Debug, Clone, Copy)]
pub enum CyclingMode {
    Calendar(CalendarMode),
    Integer,
}

impl CyclingMode {
    /// Parses the `cycling_mode` string carried on the normalized config and
    /// on `workflow_params`. `None` defaults to proleptic Gregorian, the
    /// same default `workflow_params` falls back to when the key is unset.
    pub fn parse(raw: Option<&str>) -> Result<CyclingMode, RestartError> {
        match raw.unwrap_or("proleptic_gregorian") {
            "integer" => Ok(CyclingMode::Integer),
            "proleptic_gregorian" | "gregorian" => Ok(CyclingMode::Calendar(CalendarMode::ProlepticGregorian)),
            "360day" | "days360" => Ok(CyclingMode::Calendar(CalendarMode::Days360)),
            "365day" | "days365" => Ok(CyclingMode::Calendar(CalendarMode::Days365)),
            "366day" | "days366" => Ok(CyclingMode::Calendar(CalendarMode::Days366)),
            other => Err(RestartError::UnknownCyclingMode(other.to_string())),
        }
    }

    /// Parses a cycle point string under this cycling axis.
    pub fn parse_point(self, raw: &str) -> Result<CyclePoint, RestartError> {
        parse_point(raw, self)
    }
}

fn parse_cycling_mode(raw: Option<&str>) -> Result<CyclingMode, RestartError> {
    CyclingMode::parse(raw)
}

fn parse_point(raw: &str, mode: CyclingMode) -> Result<CyclePoint, RestartError> {
    match mode {
        CyclingMode::Calendar(cal) => Ok(CyclePoint::parse_datetime(raw, cal)?),
        CyclingMode::Integer => {
            raw.parse::<i64>().map(CyclePoint::Integer).map_err(|_| RestartError::MalformedIntegerPoint(raw.to_string()))
        }
    }
}

/// Resolved, typed form of [`WorkflowParams`] — the row type stays stringly
/// typed so `cylc-store` need not know about calendar arithmetic.
#[derive(Debug, Clone)]
pub struct ResolvedWorkflowParams {
    pub initial_cycle_point: Option<CyclePoint>,
    pub final_cycle_point: Option<CyclePoint>,
    pub cycling_mode: CyclingMode,
    pub utc_mode: bool,
    pub next_flow_label: i64,
    pub runtime_version: Option<String>,
}

fn resolve_workflow_params(raw: WorkflowParams) -> Result<ResolvedWorkflowParams, RestartError> {
    let cycling_mode = parse_cycling_mode(raw.cycling_mode.as_deref())?;
    let initial_cycle_point =
        raw.initial_cycle_point.as_deref().map(|s| parse_point(s, cycling_mode)).transpose()?;
    let final_cycle_point = raw.final_cycle_point.as_deref().map(|s| parse_point(s, cycling_mode)).transpose()?;
    Ok(ResolvedWorkflowParams {
        initial_cycle_point,
        final_cycle_point,
        cycling_mode,
        utc_mode: raw.utc_mode,
        next_flow_label: raw.next_flow_label,
        runtime_version: raw.runtime_version,
    })
}

/// Everything a freshly restarted scheduler needs before it can resume its
/// main loop: the rehydrated pool, the reapplied broadcast overlay, the
/// resolved workflow parameters, and the in-flight jobs due an immediate
/// poll (protocol step 5).
pub struct RestartOutcome {
    pub params: ResolvedWorkflowParams,
    pub pool: TaskPool,
    pub broadcasts: BroadcastTable,
    pub jobs_to_poll: Vec<(ProxyId, TaskJobRow)>,
}

fn decode_broadcast_row(row: &BroadcastStateRow, mode: CyclingMode) -> Result<BroadcastEntry, RestartError> {
    let namespace = NamespaceSelector::decode(&row.namespace_selector)
        .ok_or_else(|| RestartError::MalformedBroadcastNamespace(row.id, row.namespace_selector.clone()))?;
    let point = match &row.point_selector {
        None => PointSelector::AnyPoint,
        Some(text) => PointSelector::CyclePoint(parse_point(text, mode)?),
    };
    Ok(BroadcastEntry { point, namespace, path: row.setting_path.clone(), value: row.value.clone() })
}

/// Run the restart protocol (steps 1, 3-6; step 2's graph compilation is the
/// caller's job, and step 7 is simply returning to the main loop).
///
/// `checkpoint_id` selects a named checkpoint; `None` means the latest one.
pub fn restore(
    store: &PrivateStore,
    graph: &GraphModel,
    checkpoint_id: Option<i64>,
    runahead_limit: RunaheadLimit,
    default_queue_limit: usize,
) -> Result<RestartOutcome, RestartError> {
    // Step 1: load workflow_params and select the checkpoint.
    let raw_params = store.load_workflow_params()?;
    let params = resolve_workflow_params(raw_params)?;
    let mode = params.cycling_mode;

    let checkpoint_rows = store.load_checkpoint(checkpoint_id.unwrap_or(LATEST_CHECKPOINT_ID))?;

    // Step 3: rehydrate the task pool from the checkpoint row set.
    let mut pool = TaskPool::new(runahead_limit, default_queue_limit);
    let mut flow_labels_present: Vec<FlowLabel> = Vec::new();

    for row in &checkpoint_rows {
        let Some(def) = graph.definition(&row.name) else {
            warn!(task = %row.name, "skipping task_pool row: task no longer exists in the compiled graph");
            continue;
        };
        let point = parse_point(&row.point, mode)?;
        let flow: FlowLabel = row.flow_label.parse()?;
        let state: TaskState = row.state.parse()?;

        let mut proxy = TaskProxy::from_definition(ProxyId::new(row.name.clone(), point, flow), def);
        proxy.state = state;
        proxy.is_held = row.is_held;
        proxy.submit_num = row.submit_num.max(0) as u64;
        pool.restore(proxy);

        if !flow_labels_present.contains(&flow) {
            flow_labels_present.push(flow);
        }
    }

    // Mark outputs recorded for each flow present in the rehydrated pool,
    // and re-evaluate every dependent proxy's prerequisite groups against
    // them (step 4) — the same children-index delivery the main loop uses
    // for live output completion.
    let icp = params.initial_cycle_point;
    let fcp = params.final_cycle_point;
    // Restart never spawns a proxy during delivery (unlike the live main
    // loop) — it only replays recorded outputs against proxies already
    // rehydrated above — so membership is fixed for the rest of this
    // function and a snapshot avoids borrowing `pool` both mutably and
    // immutably from the two closures `deliver_output` takes at once.
    let known_ids: std::collections::HashSet<ProxyId> = pool.iter().map(|p| p.id.clone()).collect();
    for flow in &flow_labels_present {
        let rows = store.load_outputs_for_flow(&flow.to_string())?;
        for row in &rows {
            let producer_point = parse_point(&row.point, mode)?;
            let row_flow: FlowLabel = row.flow_label.parse()?;

            if let Some(producer) = pool.get_mut(&ProxyId::new(row.name.clone(), producer_point, row_flow)) {
                producer.complete_output(&row.output);
            }

            let Some(icp) = icp else { continue };
            deliver_output(
                graph,
                icp,
                fcp,
                &row.name,
                producer_point,
                row_flow,
                &row.output,
                |id, key| {
                    if let Some(proxy) = pool.get_mut(id) {
                        let mut changed = false;
                        for group in proxy.prerequisite_groups.iter_mut() {
                            changed |= group.satisfy(key);
                        }
                        for group in proxy.removal_prerequisites.iter_mut() {
                            changed |= group.satisfy(key);
                        }
                        changed
                    } else {
                        false
                    }
                },
                |id| known_ids.contains(id),
            );
        }
    }

    // Step 5: schedule a poll for every job still in flight.
    let active_jobs = store.load_active_jobs()?;
    let mut jobs_to_poll = Vec::new();
    for job in active_jobs {
        let point = parse_point(&job.point, mode)?;
        let flow: FlowLabel = job.flow_label.parse()?;
        let id = ProxyId::new(job.name.clone(), point, flow);
        if pool.get(&id).map(|p| p.state.is_active()).unwrap_or(false) {
            jobs_to_poll.push((id, job));
        }
    }

    // Step 6: re-apply broadcasts.
    let mut broadcasts = BroadcastTable::new();
    for row in store.load_broadcasts()? {
        let entry = decode_broadcast_row(&row, mode)?;
        broadcasts.set(entry);
    }

    Ok(RestartOutcome { params, pool, broadcasts, jobs_to_poll })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::CalendarMode;
    use crate::graph::{CompileError, GraphSection};

    fn icp_str() -> &'static str {
        "20240101T000000Z"
    }

    fn compiled_graph() -> Result<GraphModel, CompileError> {
        let sections =
            vec![GraphSection { sequence_text: "R1".into(), graph_text: "a => b".into() }];
        crate::graph::compile(&sections, &HashMap::new(), &[])
    }

    fn seeded_store() -> PrivateStore {
        let store = PrivateStore::open_in_memory().unwrap();
        let params = WorkflowParams {
            initial_cycle_point: Some(icp_str().to_string()),
            final_cycle_point: None,
            cycling_mode: Some("proleptic_gregorian".to_string()),
            utc_mode: true,
            next_flow_label: 2,
            runtime_version: Some("test".to_string()),
        };
        store.save_workflow_params(&params).unwrap();
        store
    }

    #[test]
    fn test_restore_rehydrates_pool_and_marks_outputs() {
        let mut store = seeded_store();
        store
            .upsert_task_pool_row(&cylc_store::TaskPoolRow {
                name: "a".into(),
                point: icp_str().into(),
                flow_label: "1".into(),
                submit_num: 1,
                state: "succeeded".into(),
                is_held: false,
            })
            .unwrap();
        store
            .upsert_task_pool_row(&cylc_store::TaskPoolRow {
                name: "b".into(),
                point: icp_str().into(),
                flow_label: "1".into(),
                submit_num: 0,
                state: "waiting".into(),
                is_held: false,
            })
            .unwrap();
        store.checkpoint("restart-test", None).unwrap();
        store
            .record_output(&cylc_store::TaskOutputRow {
                name: "a".into(),
                point: icp_str().into(),
                flow_label: "1".into(),
                output: "succeeded".into(),
                timestamp: "20240101T000000Z".into(),
            })
            .unwrap();

        let graph = compiled_graph().unwrap();
        let outcome = restore(&store, &graph, None, RunaheadLimit::Count(5), 0).unwrap();

        let icp = CyclePoint::parse_datetime(icp_str(), CalendarMode::ProlepticGregorian).unwrap();
        let a = outcome.pool.get(&ProxyId::new("a", icp, FlowLabel::Numbered(1))).unwrap();
        assert!(a.has_output("succeeded"));
        let b = outcome.pool.get(&ProxyId::new("b", icp, FlowLabel::Numbered(1))).unwrap();
        assert!(b.prerequisite_groups.iter().all(|g| g.is_true()));
    }

    #[test]
    fn test_restore_schedules_poll_for_active_jobs() {
        let mut store = seeded_store();
        store
            .upsert_task_pool_row(&cylc_store::TaskPoolRow {
                name: "a".into(),
                point: icp_str().into(),
                flow_label: "1".into(),
                submit_num: 1,
                state: "running".into(),
                is_held: false,
            })
            .unwrap();
        store.checkpoint("restart-test", None).unwrap();
        store
            .insert_job(&cylc_store::TaskJobRow {
                id: 0,
                name: "a".into(),
                point: icp_str().into(),
                flow_label: "1".into(),
                submit_num: 1,
                batch_system: "background".into(),
                job_id: Some("123".into()),
                platform: "localhost".into(),
                host: None,
                submitted_at: Some("20240101T000000Z".into()),
                started_at: None,
                finished_at: None,
                terminal_state: None,
            })
            .unwrap();

        let graph = compiled_graph().unwrap();
        let outcome = restore(&store, &graph, None, RunaheadLimit::Count(5), 0).unwrap();
        assert_eq!(outcome.jobs_to_poll.len(), 1);
        assert_eq!(outcome.jobs_to_poll[0].0.task_name, "a");
    }

    #[test]
    fn test_restore_reapplies_broadcasts() {
        let mut store = seeded_store();
        store.checkpoint("restart-test", None).unwrap();
        store
            .set_broadcast(&cylc_store::BroadcastStateRow {
                id: 0,
                point_selector: None,
                namespace_selector: NamespaceSelector::ExactTask("a".to_string()).encode(),
                setting_path: "execution.script".into(),
                value: "echo hi".into(),
                expires_at: None,
            })
            .unwrap();

        let graph = compiled_graph().unwrap();
        let outcome = restore(&store, &graph, None, RunaheadLimit::Count(5), 0).unwrap();
        let icp = CyclePoint::parse_datetime(icp_str(), CalendarMode::ProlepticGregorian).unwrap();
        let effective = outcome.broadcasts.effective_settings(&HashMap::new(), "a", &icp, &[]);
        assert_eq!(effective.get("execution.script"), Some(&"echo hi".to_string()));
    }

    #[test]
    fn test_restore_skips_row_for_removed_task_definition() {
        let mut store = seeded_store();
        store
            .upsert_task_pool_row(&cylc_store::TaskPoolRow {
                name: "ghost".into(),
                point: icp_str().into(),
                flow_label: "1".into(),
                submit_num: 0,
                state: "waiting".into(),
                is_held: false,
            })
            .unwrap();
        store.checkpoint("restart-test", None).unwrap();

        let graph = compiled_graph().unwrap();
        let outcome = restore(&store, &graph, None, RunaheadLimit::Count(5), 0).unwrap();
        assert!(outcome.pool.is_empty());
    }
}
