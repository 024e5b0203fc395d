//! The scheduling quantum: one pass of message intake, subprocess-result
//! intake, parentless spawning, gate evaluation, timer firing, queue
//! release, and housekeeping. Everything here runs on one logical thread;
//! the only concurrency is inside [`crate::subprocess::SubprocessPool`],
//! whose results come back over a channel this loop drains rather than
//! awaits inline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use cylc_store::{PrivateStore, TaskOutputRow, TaskPoolRow};

use crate::adapters::{AdapterRegistry, PollStatus};
use crate::broadcast::BroadcastTable;
use crate::clock::Clock;
use crate::cycle::{CyclePoint, Interval, SequenceSpec};
use crate::flow::FlowLabel;
use crate::graph::{ChildKey, ExecutionSettings, GraphModel, Qualifier};
use crate::jobs::{
    apply, execution_timer_sequence, PollSequence, RetryCounters, RetryPolicy, TimerKind, TransitionCause,
    TransitionEffect,
};
use crate::messaging::{default_poll_interval, evaluate_clock_xtrigger, interpret, BusReceiver, Interpretation, TaskMessage, XtriggerCache};
use crate::pool::{child_point_for_offset, deliver_output, resolve_producer_point, ProxyId, TaskPool, TaskProxy, TaskState};
use crate::subprocess::{Category, Command, CommandResult, SubprocessPool};

use super::commands::{CommandError, CommandOutcome, FlowSelector, OperatorCommand, TaskId, TriggerRequest};
use super::shutdown::ShutdownRequest;

/// Static, per-run configuration the main loop needs but that never changes
/// once the scheduler starts.
#[derive(Debug, Clone)]
pub struct MainLoopConfig {
    pub default_batch_system: String,
    pub suite_name: String,
}

/// Summary of one completed quantum, returned for logging/testing rather
/// than consumed by the loop itself.
#[derive(Debug, Clone, Default)]
pub struct QuantumReport {
    pub messages_handled: usize,
    pub results_handled: usize,
    pub spawned: Vec<ProxyId>,
    pub submitted: Vec<ProxyId>,
    pub evicted: Vec<ProxyId>,
    pub is_stalled: bool,
}

/// What a pending subprocess result, once it arrives, should be applied to.
/// Keyed by the command's own `callback_id` in [`MainLoop::in_flight`].
#[derive(Debug, Clone)]
enum InFlightOp {
    Submit(ProxyId),
    Poll(ProxyId),
    Kill(ProxyId),
}

/// The live scheduling state and everything it takes one quantum to drive:
/// the task pool, the compiled graph, broadcast overlays, adapter registry,
/// and the channels that carry inbound messages and subprocess results.
pub struct MainLoop {
    pool: TaskPool,
    graph: GraphModel,
    broadcasts: BroadcastTable,
    xtriggers: XtriggerCache,
    clock: Arc<dyn Clock>,
    adapters: AdapterRegistry,
    subprocess: SubprocessPool,
    results_rx: mpsc::Receiver<CommandResult>,
    inbound: BusReceiver<TaskMessage>,
    icp: CyclePoint,
    fcp: Option<CyclePoint>,
    config: MainLoopConfig,
    in_flight: HashMap<String, InFlightOp>,
    job_ids: HashMap<ProxyId, String>,
    retry_policies: HashMap<String, RetryPolicy>,
    retry_counters: HashMap<ProxyId, RetryCounters>,
    spawn_cursor: HashMap<(String, String), CyclePoint>,
    poll_sequences: HashMap<ProxyId, PollSequence>,
    store: Option<PrivateStore>,
    next_flow_label: i64,
    is_held: bool,
    is_paused: bool,
}

impl MainLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: TaskPool,
        graph: GraphModel,
        broadcasts: BroadcastTable,
        clock: Arc<dyn Clock>,
        adapters: AdapterRegistry,
        subprocess: SubprocessPool,
        results_rx: mpsc::Receiver<CommandResult>,
        inbound: BusReceiver<TaskMessage>,
        icp: CyclePoint,
        fcp: Option<CyclePoint>,
        config: MainLoopConfig,
        store: Option<PrivateStore>,
        next_flow_label: i64,
    ) -> Self {
        let mut retry_policies = HashMap::new();
        for def in graph.definitions.values() {
            match RetryPolicy::parse(&def.execution.submission_retry_delays, &def.execution.execution_retry_delays) {
                Ok(policy) => {
                    retry_policies.insert(def.name.clone(), policy);
                }
                Err(err) => {
                    warn!(task = %def.name, error = %err, "MainLoop::new: malformed retry delay, task gets no retries");
                }
            }
        }
        debug!(tasks = graph.definitions.len(), suite = %config.suite_name, "MainLoop::new: constructed");
        Self {
            pool,
            graph,
            broadcasts,
            xtriggers: XtriggerCache::new(),
            clock,
            adapters,
            subprocess,
            results_rx,
            inbound,
            icp,
            fcp,
            config,
            in_flight: HashMap::new(),
            job_ids: HashMap::new(),
            retry_policies,
            retry_counters: HashMap::new(),
            spawn_cursor: HashMap::new(),
            poll_sequences: HashMap::new(),
            store,
            next_flow_label,
            is_held: false,
            is_paused: false,
        }
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    pub fn graph(&self) -> &GraphModel {
        &self.graph
    }

    pub fn broadcasts_mut(&mut self) -> &mut BroadcastTable {
        &mut self.broadcasts
    }

    /// Run one scheduling quantum: drain inbound messages and subprocess
    /// results, spawn parentless tasks, evaluate gates, fire due timers,
    /// release queued work, and housekeep terminal proxies.
    pub async fn run_quantum(&mut self) -> QuantumReport {
        let mut report = QuantumReport::default();

        let messages = self.inbound.drain_available();
        for message in messages {
            report.messages_handled += 1;
            self.handle_message(message, &mut report);
        }

        let mut results = Vec::new();
        while let Ok(result) = self.results_rx.try_recv() {
            results.push(result);
        }
        for result in results {
            report.results_handled += 1;
            self.handle_subprocess_result(result, &mut report);
        }

        self.spawn_parentless(&mut report);
        self.apply_clock_gates(&mut report);
        self.evaluate_xtriggers();
        self.fire_timers(&mut report);
        self.enqueue_ready();
        self.release_and_submit(&mut report);

        report.evicted = self.pool.housekeep();
        for id in &report.evicted {
            self.unpersist_proxy(id);
        }
        report.is_stalled = self.pool.is_stalled();
        report
    }

    fn timestamp(&self) -> String {
        self.clock.now().format("%Y%m%dT%H%M%SZ").to_string()
    }

    fn persist_proxy(&self, id: &ProxyId) {
        let Some(store) = &self.store else { return };
        let Some(proxy) = self.pool.get(id) else { return };
        let row = TaskPoolRow {
            name: id.task_name.clone(),
            point: id.point.to_string(),
            flow_label: id.flow.to_string(),
            submit_num: proxy.submit_num as i64,
            state: proxy.state.as_db_str().to_string(),
            is_held: proxy.is_held,
        };
        if let Err(err) = store.upsert_task_pool_row(&row) {
            warn!(proxy = %id, error = %err, "MainLoop::persist_proxy: failed to persist task_pool row");
        }
    }

    fn unpersist_proxy(&self, id: &ProxyId) {
        let Some(store) = &self.store else { return };
        if let Err(err) = store.remove_task_pool_row(&id.task_name, &id.point.to_string(), &id.flow.to_string()) {
            warn!(proxy = %id, error = %err, "MainLoop::unpersist_proxy: failed to remove task_pool row");
        }
    }

    fn persist_event(&self, id: &ProxyId, event: &str, message: &str) {
        let Some(store) = &self.store else { return };
        let timestamp = self.timestamp();
        if let Err(err) = store.record_event(&id.task_name, &id.point.to_string(), &id.flow.to_string(), event, message, &timestamp) {
            warn!(proxy = %id, error = %err, "MainLoop::persist_event: failed to record task_events row");
        }
    }

    fn persist_output(&self, id: &ProxyId, output: &str) {
        let Some(store) = &self.store else { return };
        let row = TaskOutputRow {
            name: id.task_name.clone(),
            point: id.point.to_string(),
            flow_label: id.flow.to_string(),
            output: output.to_string(),
            timestamp: self.timestamp(),
        };
        if let Err(err) = store.record_output(&row) {
            warn!(proxy = %id, output, error = %err, "MainLoop::persist_output: failed to record task_outputs row");
        }
    }

    fn handle_message(&mut self, message: TaskMessage, report: &mut QuantumReport) {
        let id = ProxyId::new(message.task_name.clone(), message.point, message.flow);
        let Some(proxy) = self.pool.get(&id) else {
            debug!(proxy = %id, "MainLoop::handle_message: no such proxy, dropping message");
            return;
        };
        let current_submit_num = proxy.submit_num;
        let custom_outputs: Vec<String> = self
            .graph
            .definition(&message.task_name)
            .map(|def| def.outputs.iter().filter(|o| !Qualifier::is_reserved_name(&o.name)).map(|o| o.name.clone()).collect())
            .unwrap_or_default();

        match interpret(&message, current_submit_num, &custom_outputs) {
            Interpretation::StateChange(text) => {
                self.apply_cause(&id, TransitionCause::Message(text.clone()), report);
                if let Some(output) = output_name_for_state_change(&text) {
                    self.complete_and_deliver(&id, message.flow, output);
                }
            }
            Interpretation::CustomOutput(name) => {
                self.complete_and_deliver(&id, message.flow, &name);
            }
            Interpretation::Stale | Interpretation::Unrecognized => {}
            Interpretation::Notable => {
                // Event-handler dispatch for warning/critical severities lives
                // on the subprocess pool's Handler category; wiring it up is
                // independent of state-machine progression.
            }
        }
    }

    /// Mark `output` complete on the producer proxy and deliver it against
    /// the graph's children index, satisfying matching prerequisite atoms
    /// and admitting any children that don't exist yet. Separately, deliver
    /// it against the removal index to withdraw any already-admitted proxy
    /// whose suicide prerequisite just fired.
    fn complete_and_deliver(&mut self, id: &ProxyId, flow: FlowLabel, output: &str) {
        if let Some(proxy) = self.pool.get_mut(id) {
            proxy.complete_output(output);
        }
        self.persist_output(id, output);

        // `update_proxy` and `proxy_exists` are both alive for the whole call
        // below. Borrowing `pool` mutably from one and `pool` again
        // (immutably, via a snapshot) from the other would not typecheck, so
        // the existence check is precomputed into an owned set first.
        let known_ids: HashSet<ProxyId> = self.pool.iter().map(|p| p.id.clone()).collect();
        let icp = self.icp;
        let fcp = self.fcp;
        let graph = &self.graph;
        let pool = &mut self.pool;

        let result = deliver_output(
            graph,
            icp,
            fcp,
            &id.task_name,
            id.point,
            flow,
            output,
            |child_id, key| {
                if let Some(proxy) = pool.get_mut(child_id) {
                    let mut changed = false;
                    for group in proxy.prerequisite_groups.iter_mut() {
                        changed |= group.satisfy(key);
                    }
                    changed
                } else {
                    false
                }
            },
            |child_id| known_ids.contains(child_id),
        );

        for spawn_id in result.spawn_candidates {
            if self.pool.contains(&spawn_id) {
                continue;
            }
            let Some(def) = self.graph.definition(&spawn_id.task_name) else { continue };
            let mut proxy = TaskProxy::from_definition(spawn_id.clone(), def);
            proxy.is_held = self.is_held;
            self.pool.admit(proxy);
        }

        self.deliver_suicide(id, flow, output);
    }

    /// Walk the removal index for `(producer task, output)` and withdraw any
    /// live proxy whose suicide prerequisite just became true. A suicide
    /// target that was never admitted stays unadmitted; this never spawns
    /// anything, only removes.
    fn deliver_suicide(&mut self, id: &ProxyId, flow: FlowLabel, output: &str) {
        let icp = self.icp;
        let fcp = self.fcp;
        let candidate_offsets: Vec<(String, Vec<String>)> = self
            .graph
            .removal_offsets_for(&id.task_name, output)
            .into_iter()
            .map(|(offset_text, children)| (offset_text.to_string(), children.clone()))
            .collect();

        for (offset_text, children) in candidate_offsets {
            let Some(offset) = resolve_producer_point(&offset_text, icp, fcp) else { continue };
            let Some(child_points) = child_point_for_offset(&offset, id.point, icp, fcp) else { continue };
            let key = ChildKey { parent_name: id.task_name.clone(), offset_text: offset_text.clone(), qualifier_text: output.to_string() };

            for child_name in &children {
                for child_point in &child_points {
                    let child_id = ProxyId::new(child_name.clone(), *child_point, flow);
                    let Some(proxy) = self.pool.get_mut(&child_id) else { continue };
                    let mut now_true = false;
                    for group in proxy.removal_prerequisites.iter_mut() {
                        group.satisfy(&key);
                        now_true |= group.is_true();
                    }
                    // A proxy already running or finished is past the point
                    // a suicide trigger can quietly withdraw it; it would
                    // need killing, not removal, which is an operator action.
                    if now_true && !proxy.state.is_active() && !proxy.state.is_terminal() {
                        self.pool.remove(&child_id);
                        self.pool.queues_mut().remove(child_name, &child_id);
                        self.unpersist_proxy(&child_id);
                        debug!(proxy = %child_id, producer = %id, output, "MainLoop::deliver_suicide: withdrew proxy on suicide trigger");
                    }
                }
            }
        }
    }

    /// Apply one state-machine transition to `id` and arrange whatever side
    /// effect it carries. The central place retry bookkeeping is read and
    /// advanced, since the state machine itself only consumes a yes/no on
    /// whether retries remain.
    fn apply_cause(&mut self, id: &ProxyId, cause: TransitionCause, report: &mut QuantumReport) {
        let Some(current) = self.pool.get(id).map(|p| p.state) else { return };
        let policy = self.policy_for(&id.task_name);

        let counters = *self.retry_counters.entry(id.clone()).or_default();
        let submission_retries_left = counters.submission_retries_left(&policy);
        let execution_retries_left = counters.execution_retries_left(&policy);

        let transition = match apply(current, &cause, submission_retries_left, execution_retries_left) {
            Ok(t) => t,
            Err(err) => {
                debug!(proxy = %id, cause = ?cause, error = %err, "MainLoop::apply_cause: no transition defined, ignoring");
                return;
            }
        };

        // Read the delay for the attempt about to be recorded, before the
        // counter advances below — the policy is indexed by attempts already
        // made, not attempts about to be made.
        let retry_delay = match &transition.effect {
            TransitionEffect::ScheduleRetryTimer { execution: false } => counters.next_submission_delay(&policy),
            TransitionEffect::ScheduleRetryTimer { execution: true } => counters.next_execution_delay(&policy),
            _ => None,
        };

        let entry = self.retry_counters.entry(id.clone()).or_default();
        match &cause {
            TransitionCause::SubprocessResult { .. } => entry.record_submission(),
            TransitionCause::Message(text) if text.starts_with("failed") => entry.record_execution_attempt(),
            _ => {}
        }

        if let Some(proxy) = self.pool.get_mut(id) {
            proxy.state = transition.state;
        }
        self.persist_proxy(id);
        if transition.state.is_terminal() {
            self.pool.queues_mut().remove(&id.task_name, id);
            self.persist_event(id, transition.state.as_db_str(), &format!("{cause:?}"));
        }

        self.handle_effect(id, transition.effect, retry_delay, report);
    }

    fn policy_for(&self, task_name: &str) -> RetryPolicy {
        self.retry_policies.get(task_name).cloned().unwrap_or_default()
    }

    fn handle_effect(&mut self, id: &ProxyId, effect: TransitionEffect, retry_delay: Option<Interval>, report: &mut QuantumReport) {
        match effect {
            TransitionEffect::None => {}
            TransitionEffect::Submit => self.submit_job(id, report),
            TransitionEffect::ScheduleSubmissionTimeout => self.arm_submission_timeout(id),
            TransitionEffect::ScheduleExecutionTimer => self.arm_execution_timer(id),
            TransitionEffect::SchedulePoll => self.issue_poll(id),
            TransitionEffect::ScheduleRetryTimer { .. } => self.arm_retry_timer(id, retry_delay),
            TransitionEffect::Kill => self.issue_kill(id),
        }
    }

    fn interval_to_duration(interval: Interval) -> Option<chrono::Duration> {
        match interval {
            Interval::Duration(d) => Some(chrono::Duration::days(d.flat_days()) + chrono::Duration::seconds(d.flat_seconds())),
            Interval::Integer(_) => None,
        }
    }

    fn arm_submission_timeout(&mut self, id: &ProxyId) {
        let Some(def) = self.graph.definition(&id.task_name) else { return };
        let Some(text) = def.execution.submission_timeout.clone() else { return };
        let Ok(interval) = text.parse::<Interval>() else { return };
        let Some(duration) = Self::interval_to_duration(interval) else { return };
        let deadline = crate::jobs::submission_timeout_at(self.clock.now(), Some(duration));
        if let Some(proxy) = self.pool.get_mut(id) {
            proxy.timers.submission_timeout = deadline;
        }
    }

    fn arm_execution_timer(&mut self, id: &ProxyId) {
        let Some(def) = self.graph.definition(&id.task_name) else { return };
        let limit = def
            .execution
            .execution_time_limit
            .clone()
            .and_then(|t| t.parse::<Interval>().ok())
            .and_then(Self::interval_to_duration);
        let poll_offsets: Option<Vec<chrono::Duration>> = if def.execution.execution_poll_intervals.is_empty() {
            None
        } else {
            Some(
                def.execution
                    .execution_poll_intervals
                    .iter()
                    .filter_map(|s| s.parse::<Interval>().ok().and_then(Self::interval_to_duration))
                    .collect(),
            )
        };
        let now = self.clock.now();
        let Some(sequence) = execution_timer_sequence(now, limit, poll_offsets) else { return };
        if let Some(next) = sequence.next_poll_at() {
            if let Some(proxy) = self.pool.get_mut(id) {
                proxy.timers.execution_timeout = Some(next);
            }
        }
        self.poll_sequences.insert(id.clone(), sequence);
    }

    fn arm_retry_timer(&mut self, id: &ProxyId, delay: Option<Interval>) {
        let duration = delay.and_then(Self::interval_to_duration).unwrap_or_else(chrono::Duration::zero);
        let next_retry = self.clock.now() + duration;
        if let Some(proxy) = self.pool.get_mut(id) {
            proxy.timers.next_retry = Some(next_retry);
        }
    }

    /// Advance the overrun poll sequence after an execution-time-limit poll
    /// fires, arming the next offset or dropping the sequence once exhausted.
    fn advance_poll_sequence(&mut self, id: &ProxyId) {
        let next = if let Some(sequence) = self.poll_sequences.get_mut(id) {
            sequence.advance();
            sequence.next_poll_at()
        } else {
            return;
        };
        match next {
            Some(next) => {
                if let Some(proxy) = self.pool.get_mut(id) {
                    proxy.timers.execution_timeout = Some(next);
                }
            }
            None => {
                self.poll_sequences.remove(id);
            }
        }
    }

    fn fire_timers(&mut self, report: &mut QuantumReport) {
        let now = self.clock.now();

        let due_submission_timeout: Vec<ProxyId> = self
            .pool
            .iter()
            .filter(|p| p.state == TaskState::Submitted && p.timers.submission_timeout.map(|t| now >= t).unwrap_or(false))
            .map(|p| p.id.clone())
            .collect();
        for id in due_submission_timeout {
            if let Some(proxy) = self.pool.get_mut(&id) {
                proxy.timers.submission_timeout = None;
            }
            self.apply_cause(&id, TransitionCause::Timer(TimerKind::SubmissionTimeout), report);
        }

        let due_execution_timeout: Vec<ProxyId> = self
            .pool
            .iter()
            .filter(|p| p.state == TaskState::Running && p.timers.execution_timeout.map(|t| now >= t).unwrap_or(false))
            .map(|p| p.id.clone())
            .collect();
        for id in due_execution_timeout {
            if let Some(proxy) = self.pool.get_mut(&id) {
                proxy.timers.execution_timeout = None;
            }
            self.apply_cause(&id, TransitionCause::Timer(TimerKind::ExecutionTimeLimit), report);
            self.advance_poll_sequence(&id);
        }

        let due_polls: Vec<ProxyId> = self
            .pool
            .iter()
            .filter(|p| p.timers.next_poll.map(|t| now >= t).unwrap_or(false))
            .map(|p| p.id.clone())
            .collect();
        for id in due_polls {
            if let Some(proxy) = self.pool.get_mut(&id) {
                proxy.timers.next_poll = None;
            }
            self.issue_poll(&id);
        }
    }

    fn batch_system_for(&self, id: &ProxyId) -> String {
        self.graph
            .definition(&id.task_name)
            .and_then(|def| def.execution.batch_system.clone())
            .unwrap_or_else(|| self.config.default_batch_system.clone())
    }

    fn static_settings(execution: &ExecutionSettings) -> HashMap<String, String> {
        let mut map = HashMap::new();
        if let Some(script) = &execution.script {
            map.insert("script".to_string(), script.clone());
        }
        if let Some(bs) = &execution.batch_system {
            map.insert("batch_system".to_string(), bs.clone());
        }
        if let Some(p) = &execution.platform {
            map.insert("platform".to_string(), p.clone());
        }
        for (k, v) in &execution.environment {
            map.insert(format!("environment.{k}"), v.clone());
        }
        map
    }

    fn submit_job(&mut self, id: &ProxyId, report: &mut QuantumReport) {
        let Some(def) = self.graph.definition(&id.task_name).cloned() else { return };
        let static_config = Self::static_settings(&def.execution);
        let effective = self.broadcasts.effective_settings(&static_config, &id.task_name, &id.point, &def.family_ancestry);
        let batch_system = effective.get("batch_system").cloned().unwrap_or_else(|| self.config.default_batch_system.clone());

        let Some(adapter) = self.adapters.get(&batch_system) else {
            warn!(proxy = %id, batch_system, "MainLoop::submit_job: unknown batch system, leaving proxy in preparing");
            return;
        };

        let counters = self.retry_counters.entry(id.clone()).or_default();
        let try_number = counters.cylc_task_submit_number();

        let job_script_path = format!("job-scripts/{}/{}/{}/{try_number:02}.sh", id.task_name, id.point, id.flow);
        let argv = adapter.submit_command(&job_script_path);
        let callback_id = format!("submit:{id}:{}", Uuid::now_v7());
        self.in_flight.insert(callback_id.clone(), InFlightOp::Submit(id.clone()));

        let mut command = Command::new(Category::Submission, argv, callback_id);
        command.environment = effective;
        self.subprocess.submit(command);
        if let Some(proxy) = self.pool.get_mut(id) {
            proxy.submit_num += 1;
        }
        report.submitted.push(id.clone());
    }

    fn handle_subprocess_result(&mut self, result: CommandResult, report: &mut QuantumReport) {
        let Some(op) = self.in_flight.remove(&result.callback_id) else {
            debug!(callback_id = %result.callback_id, "MainLoop::handle_subprocess_result: no in-flight operation, ignoring stray result");
            return;
        };
        match op {
            InFlightOp::Submit(id) => {
                if result.succeeded() {
                    let batch_system = self.batch_system_for(&id);
                    let job_id = self.adapters.get(&batch_system).and_then(|a| a.parse_submit_output(&result.stdout).ok());
                    if let Some(job_id) = job_id {
                        self.job_ids.insert(id.clone(), job_id);
                    }
                    self.apply_cause(&id, TransitionCause::SubprocessResult { ok: true }, report);
                } else {
                    self.apply_cause(&id, TransitionCause::SubprocessResult { ok: false }, report);
                }
            }
            InFlightOp::Poll(id) => self.handle_poll_result(&id, result, report),
            InFlightOp::Kill(_) => {}
        }
    }

    fn issue_poll(&mut self, id: &ProxyId) {
        let Some(job_id) = self.job_ids.get(id).cloned() else { return };
        let batch_system = self.batch_system_for(id);
        let platform = self.graph.definition(&id.task_name).and_then(|def| def.execution.platform.clone());
        let Some(adapter) = self.adapters.get(&batch_system) else { return };

        let argv = adapter.poll_command(&job_id, platform.as_deref());
        let callback_id = format!("poll:{id}:{}", Uuid::now_v7());
        self.in_flight.insert(callback_id.clone(), InFlightOp::Poll(id.clone()));
        self.subprocess.submit(Command::new(Category::Poll, argv, callback_id));
    }

    fn issue_kill(&mut self, id: &ProxyId) {
        let Some(job_id) = self.job_ids.get(id).cloned() else { return };
        let batch_system = self.batch_system_for(id);
        let Some(adapter) = self.adapters.get(&batch_system) else { return };

        let argv = adapter.kill_command(&job_id);
        let callback_id = format!("kill:{id}:{}", Uuid::now_v7());
        self.in_flight.insert(callback_id.clone(), InFlightOp::Kill(id.clone()));
        self.subprocess.submit(Command::new(Category::Kill, argv, callback_id));
    }

    /// `kill -0`'s verdict lives in its exit code, not its stdout, but
    /// [`crate::adapters::BackgroundAdapter::parse_poll_output`] is written
    /// as a pure stdout-to-outcome function for every adapter's sake. Bridge
    /// the two here rather than teaching the adapter about exit codes.
    fn handle_poll_result(&mut self, id: &ProxyId, result: CommandResult, report: &mut QuantumReport) {
        let batch_system = self.batch_system_for(id);
        let Some(adapter) = self.adapters.get(&batch_system) else { return };

        let stdout = if batch_system == "background" {
            result.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "1".to_string())
        } else {
            result.stdout.clone()
        };

        let Ok(outcome) = adapter.parse_poll_output(&stdout) else { return };
        match outcome.status {
            PollStatus::Running => {}
            PollStatus::Succeeded => {
                self.apply_cause(id, TransitionCause::Message("succeeded".to_string()), report);
                self.complete_and_deliver(id, id.flow, "succeeded");
            }
            PollStatus::Failed => {
                self.apply_cause(id, TransitionCause::Message("failed/poll detected nonzero exit".to_string()), report);
                self.complete_and_deliver(id, id.flow, "failed");
            }
            PollStatus::Gone => {
                self.apply_cause(id, TransitionCause::Message("failed/poll found job gone".to_string()), report);
                self.complete_and_deliver(id, id.flow, "failed");
            }
        }
    }

    /// Walk every parentless task's owning sequences one cycle point at a
    /// time, admitting the next candidate point under the runahead limit.
    /// `spawn_cursor` remembers the last point spawned per `(task,
    /// sequence)` pair so repeated quanta advance forward rather than
    /// re-evaluating from the initial cycle point every time.
    fn spawn_parentless(&mut self, report: &mut QuantumReport) {
        let candidates: Vec<(String, String, CyclePoint)> = {
            let mut out = Vec::new();
            for task_name in self.graph.parentless_task_names() {
                let Some(def) = self.graph.definition(task_name) else { continue };
                for sequence_text in &def.owning_sequences {
                    let Ok(spec) = SequenceSpec::parse(sequence_text) else { continue };
                    let Ok(sequence) = spec.bind(self.icp, self.fcp) else { continue };
                    let cursor_key = (task_name.to_string(), sequence_text.clone());
                    let candidate = match self.spawn_cursor.get(&cursor_key) {
                        Some(last) => sequence.next(last),
                        None if sequence.contains(&self.icp) => Some(self.icp),
                        None => sequence.next(&self.icp),
                    };
                    if let Some(point) = candidate {
                        out.push((task_name.to_string(), sequence_text.clone(), point));
                    }
                }
            }
            out
        };

        for (task_name, sequence_text, point) in candidates {
            let id = ProxyId::new(task_name.clone(), point, FlowLabel::Numbered(1));
            if self.pool.contains(&id) {
                self.spawn_cursor.insert((task_name, sequence_text), point);
                continue;
            }
            if !self.pool.can_admit(&point) {
                continue;
            }
            let Some(def) = self.graph.definition(&task_name) else { continue };
            let mut proxy = TaskProxy::from_definition(id.clone(), def);
            proxy.is_held = self.is_held;
            if self.pool.admit(proxy) {
                self.spawn_cursor.insert((task_name, sequence_text), point);
                report.spawned.push(id);
            }
        }
    }

    fn apply_clock_gates(&mut self, report: &mut QuantumReport) {
        let ids: Vec<ProxyId> = self.pool.iter().map(|p| p.id.clone()).collect();
        for id in ids {
            let Some(def) = self.graph.definition(&id.task_name) else { continue };
            let Some(gate) = def.clock_gate.clone() else {
                if let Some(proxy) = self.pool.get_mut(&id) {
                    proxy.external_triggers.clock_gate_passed = true;
                }
                continue;
            };
            let offset = gate.offset_text.parse::<Interval>().ok();
            let result = evaluate_clock_xtrigger(self.clock.as_ref(), &id.point, offset.as_ref());
            if gate.is_expire {
                let already_waiting = self.pool.get(&id).map(|p| p.state == TaskState::Waiting).unwrap_or(false);
                if let Some(proxy) = self.pool.get_mut(&id) {
                    proxy.external_triggers.clock_expired = result.satisfied;
                    proxy.external_triggers.clock_gate_passed = true;
                }
                if result.satisfied && already_waiting {
                    self.apply_cause(&id, TransitionCause::ClockExpire, report);
                }
            } else if let Some(proxy) = self.pool.get_mut(&id) {
                proxy.external_triggers.clock_gate_passed = result.satisfied;
            }
        }
    }

    /// Evaluate outstanding xtriggers. Only `wall_clock(...)`-signature
    /// xtriggers resolve here, in-process against the scheduler's clock;
    /// any other function has no in-process evaluator and stays pending
    /// until a subprocess-backed xtrigger poller exists.
    fn evaluate_xtriggers(&mut self) {
        let ids: Vec<ProxyId> =
            self.pool.iter().filter(|p| !p.external_triggers.pending_xtriggers.is_empty()).map(|p| p.id.clone()).collect();

        for id in ids {
            let pending = match self.pool.get(&id) {
                Some(proxy) => proxy.external_triggers.pending_xtriggers.clone(),
                None => continue,
            };
            let mut still_pending = Vec::new();

            for sig in pending {
                if self.xtriggers.resolved(&sig).is_some() {
                    continue;
                }
                let Some(offset_text) = sig.strip_prefix("wall_clock(").and_then(|s| s.strip_suffix(')')) else {
                    still_pending.push(sig);
                    continue;
                };
                let now = self.clock.now();
                if !self.xtriggers.due_for_poll(&sig, now) {
                    still_pending.push(sig);
                    continue;
                }
                let offset = if offset_text.is_empty() { None } else { offset_text.parse::<Interval>().ok() };
                let result = evaluate_clock_xtrigger(self.clock.as_ref(), &id.point, offset.as_ref());
                if result.satisfied {
                    self.xtriggers.record_result(&sig, result);
                } else {
                    let next_poll = now + chrono::Duration::seconds(default_poll_interval().as_secs() as i64);
                    self.xtriggers.mark_polling(&sig, next_poll);
                    still_pending.push(sig);
                }
            }

            if let Some(proxy) = self.pool.get_mut(&id) {
                proxy.external_triggers.pending_xtriggers = still_pending;
            }
        }
    }

    /// Move every proxy whose prerequisites, gates, and xtriggers are all
    /// satisfied into its routed internal queue. A proxy re-entering
    /// readiness after a retry is gated additionally on its own
    /// `next_retry` timer, since the state machine sends retries back to
    /// `waiting` rather than modelling a distinct "retry-pending" state.
    fn enqueue_ready(&mut self) {
        let now = self.clock.now();
        let candidates: Vec<(String, ProxyId)> = self
            .pool
            .iter()
            .filter(|p| p.is_ready_to_submit())
            .filter(|p| p.timers.next_retry.map(|t| now >= t).unwrap_or(true))
            .map(|p| (p.id.task_name.clone(), p.id.clone()))
            .collect();
        for (task_name, id) in candidates {
            self.pool.queues_mut().enqueue(&task_name, id);
        }
    }

    fn release_and_submit(&mut self, report: &mut QuantumReport) {
        if self.is_paused {
            return;
        }
        let released = self.pool.queues_mut().try_release_all();
        for id in released {
            if let Some(proxy) = self.pool.get_mut(&id) {
                proxy.timers.next_retry = None;
            }
            self.apply_cause(&id, TransitionCause::AutoReady, report);
        }
    }

    fn ids_for(&self, task_id: &TaskId) -> Vec<ProxyId> {
        self.pool.iter().filter(|p| p.id.task_name == task_id.task_name && p.id.point == task_id.point).map(|p| p.id.clone()).collect()
    }

    /// Apply one operator command synchronously. Trigger and kill are
    /// routed through the same state-machine causes
    /// (`OperatorTrigger`/`OperatorKill`) a message or timer would use,
    /// rather than duplicating transition logic here.
    pub fn apply_command(&mut self, command: OperatorCommand, report: &mut QuantumReport) -> Result<CommandOutcome, CommandError> {
        match command {
            OperatorCommand::Hold => {
                let ids: Vec<ProxyId> = self.pool.iter().map(|p| p.id.clone()).collect();
                let mut count = 0;
                for id in &ids {
                    if let Some(proxy) = self.pool.get_mut(id) {
                        if !proxy.is_held {
                            proxy.is_held = true;
                            count += 1;
                        }
                    }
                }
                self.is_held = true;
                Ok(CommandOutcome::Held { count })
            }
            OperatorCommand::Release => {
                let ids: Vec<ProxyId> = self.pool.iter().map(|p| p.id.clone()).collect();
                let mut count = 0;
                for id in &ids {
                    if let Some(proxy) = self.pool.get_mut(id) {
                        if proxy.is_held {
                            proxy.is_held = false;
                            count += 1;
                        }
                    }
                }
                self.is_held = false;
                Ok(CommandOutcome::Released { count })
            }
            OperatorCommand::Pause => {
                self.is_paused = true;
                Ok(CommandOutcome::Paused)
            }
            OperatorCommand::Resume => {
                self.is_paused = false;
                Ok(CommandOutcome::Resumed)
            }
            OperatorCommand::Reload => {
                // Re-parsing config and compiling a fresh graph happens
                // upstream (outside the scheduling core, same split as the
                // restart protocol's step 2); the soft-quiesce sequencing
                // itself — pause, wait for `preparing` to drain, checkpoint,
                // swap, resume — is the caller's to drive since only it
                // holds the new `GraphModel`.
                Ok(CommandOutcome::ReloadAcknowledged)
            }
            OperatorCommand::Trigger(request) => self.apply_trigger(request, report),
            OperatorCommand::Kill(task_id) => self.apply_kill(task_id, report),
            OperatorCommand::Poll(task_id) => self.apply_poll(task_id),
            OperatorCommand::Remove(task_id) => self.apply_remove(task_id),
            OperatorCommand::Reset(task_id, state) => self.apply_reset(task_id, state),
            OperatorCommand::BroadcastSet(entry) => {
                self.broadcasts.set(entry);
                Ok(CommandOutcome::BroadcastSet)
            }
            OperatorCommand::BroadcastClear(request) => {
                let before = self.broadcasts.entries().len();
                self.broadcasts.clear(&request.point, &request.namespace, request.paths.as_deref());
                let count = before - self.broadcasts.entries().len();
                Ok(CommandOutcome::BroadcastCleared { count })
            }
            OperatorCommand::Checkpoint(name) => self.apply_checkpoint(name),
            OperatorCommand::Insert(task_id) => self.apply_insert(task_id),
        }
    }

    fn apply_trigger(&mut self, request: TriggerRequest, report: &mut QuantumReport) -> Result<CommandOutcome, CommandError> {
        let ids = self.ids_for(&request.task_id);
        if ids.is_empty() {
            return self.trigger_spawn(request, report);
        }
        let mut triggered = Vec::new();
        for id in ids {
            self.apply_cause(&id, TransitionCause::OperatorTrigger, report);
            triggered.push(TaskId::new(id.task_name.clone(), id.point));
        }
        Ok(CommandOutcome::Triggered { tasks: triggered })
    }

    /// Force-triggering a task instance that hasn't been spawned yet admits
    /// it outright (bypassing runahead, as an explicit operator action) and
    /// immediately force-submits it under the requested flow.
    fn trigger_spawn(&mut self, request: TriggerRequest, report: &mut QuantumReport) -> Result<CommandOutcome, CommandError> {
        let Some(def) = self.graph.definition(&request.task_id.task_name).cloned() else {
            return Err(CommandError::UnknownTaskDefinition(request.task_id.task_name));
        };
        let flow = match request.flow {
            FlowSelector::New => {
                let label = FlowLabel::Numbered(self.next_flow_label);
                self.next_flow_label += 1;
                label
            }
            FlowSelector::None => FlowLabel::None,
            FlowSelector::Label(label) => label,
        };
        let id = ProxyId::new(request.task_id.task_name.clone(), request.task_id.point, flow);
        let proxy = TaskProxy::from_definition(id.clone(), &def);
        self.pool.restore(proxy);
        self.persist_proxy(&id);
        self.apply_cause(&id, TransitionCause::OperatorTrigger, report);
        Ok(CommandOutcome::Triggered { tasks: vec![TaskId::new(id.task_name.clone(), id.point)] })
    }

    fn apply_kill(&mut self, task_id: TaskId, report: &mut QuantumReport) -> Result<CommandOutcome, CommandError> {
        let ids = self.ids_for(&task_id);
        if ids.is_empty() {
            return Err(CommandError::NoSuchTask(task_id));
        }
        let mut killed = Vec::new();
        for id in ids {
            self.apply_cause(&id, TransitionCause::OperatorKill, report);
            killed.push(TaskId::new(id.task_name.clone(), id.point));
        }
        Ok(CommandOutcome::Killed { tasks: killed })
    }

    fn apply_poll(&mut self, task_id: TaskId) -> Result<CommandOutcome, CommandError> {
        let ids = self.ids_for(&task_id);
        if ids.is_empty() {
            return Err(CommandError::NoSuchTask(task_id));
        }
        let mut polled = Vec::new();
        for id in &ids {
            self.issue_poll(id);
            polled.push(TaskId::new(id.task_name.clone(), id.point));
        }
        Ok(CommandOutcome::PollScheduled { tasks: polled })
    }

    fn apply_remove(&mut self, task_id: TaskId) -> Result<CommandOutcome, CommandError> {
        let ids = self.ids_for(&task_id);
        if ids.is_empty() {
            return Err(CommandError::NoSuchTask(task_id));
        }
        let mut removed = Vec::new();
        for id in ids {
            self.pool.queues_mut().remove(&id.task_name, &id);
            self.pool.remove(&id);
            self.retry_counters.remove(&id);
            self.poll_sequences.remove(&id);
            self.job_ids.remove(&id);
            self.unpersist_proxy(&id);
            removed.push(TaskId::new(id.task_name.clone(), id.point));
        }
        Ok(CommandOutcome::Removed { tasks: removed })
    }

    /// Resets the first matching proxy's state outright — a blunt operator
    /// override, not a state-machine transition, so no effect is scheduled.
    /// When more than one flow occupies the same `(task, point)` slot the
    /// choice of which proxy is reset is otherwise unspecified.
    fn apply_reset(&mut self, task_id: TaskId, state: TaskState) -> Result<CommandOutcome, CommandError> {
        let Some(id) = self.ids_for(&task_id).into_iter().next() else {
            return Err(CommandError::NoSuchTask(task_id));
        };
        if let Some(proxy) = self.pool.get_mut(&id) {
            proxy.state = state;
        }
        self.persist_proxy(&id);
        Ok(CommandOutcome::Reset { task: task_id, state })
    }

    fn apply_checkpoint(&mut self, name: String) -> Result<CommandOutcome, CommandError> {
        if name.trim().is_empty() {
            return Err(CommandError::EmptyCheckpointName);
        }
        let Some(store) = self.store.as_mut() else {
            return Ok(CommandOutcome::Checkpointed { id: 0 });
        };
        match store.checkpoint(&name, None) {
            Ok(id) => Ok(CommandOutcome::Checkpointed { id }),
            Err(err) => {
                warn!(name, error = %err, "MainLoop::apply_checkpoint: store checkpoint failed");
                Ok(CommandOutcome::Checkpointed { id: 0 })
            }
        }
    }

    fn apply_insert(&mut self, task_id: TaskId) -> Result<CommandOutcome, CommandError> {
        let Some(def) = self.graph.definition(&task_id.task_name).cloned() else {
            return Err(CommandError::UnknownTaskDefinition(task_id.task_name));
        };
        let id = ProxyId::new(task_id.task_name.clone(), task_id.point, FlowLabel::Numbered(1));
        if self.pool.contains(&id) {
            return Ok(CommandOutcome::Inserted { task: task_id });
        }
        let proxy = TaskProxy::from_definition(id.clone(), &def);
        self.pool.restore(proxy);
        self.persist_proxy(&id);
        Ok(CommandOutcome::Inserted { task: task_id })
    }

    /// Begin a `stop` request: stop accepting new submissions and, if the
    /// mode demands it, kill every currently active job. Returns the ids
    /// killed, if any.
    pub fn begin_shutdown(&mut self, request: &ShutdownRequest, report: &mut QuantumReport) -> Vec<ProxyId> {
        self.is_paused = true;
        if !request.kills_active_jobs() {
            return Vec::new();
        }
        let active: Vec<ProxyId> = self.pool.iter().filter(|p| p.state.is_active()).map(|p| p.id.clone()).collect();
        for id in &active {
            self.apply_cause(id, TransitionCause::OperatorKill, report);
        }
        active
    }

    /// Whether every active job has drained — safe to stop the process now.
    pub fn shutdown_ready(&self) -> bool {
        !self.pool.iter().any(|p| p.state.is_active())
    }
}

/// The output name a recognized state-change message text implies, if any.
/// `vacated` returns a proxy to `submitted` without completing an output.
fn output_name_for_state_change(text: &str) -> Option<&'static str> {
    if text == "started" {
        Some("started")
    } else if text == "succeeded" {
        Some("succeeded")
    } else if text == "submit-failed" || text.starts_with("submit-failed/") {
        Some("submit-failed")
    } else if text.starts_with("failed") {
        Some("failed")
    } else {
        None
    }
}
