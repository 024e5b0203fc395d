//! End-to-end scheduling scenarios, driven entirely through `MainLoop`'s
//! public surface: compile a graph, build a loop, feed it task messages and
//! clock advances the way the daemon's own message bus would, and check
//! the pool's resulting state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;

use cylc_core::adapters::AdapterRegistry;
use cylc_core::broadcast::BroadcastTable;
use cylc_core::clock::{Clock, FakeClock};
use cylc_core::cycle::{CalendarMode, CyclePoint};
use cylc_core::flow::FlowLabel;
use cylc_core::graph::{compile, CustomOutputDecl, GraphSection};
use cylc_core::messaging::{channel, Severity, TaskMessage};
use cylc_core::pool::{ProxyId, RunaheadLimit, TaskPool};
use cylc_core::scheduler::{MainLoop, MainLoopConfig};
use cylc_core::subprocess::{CommandResult, QosLimits, SubprocessPool};

fn icp() -> CyclePoint {
    CyclePoint::parse_datetime("20240101T000000Z", CalendarMode::ProlepticGregorian).unwrap()
}

fn build_loop(
    sections: Vec<GraphSection>,
    families: HashMap<String, Vec<String>>,
    custom_outputs: Vec<CustomOutputDecl>,
    fcp: Option<CyclePoint>,
) -> (MainLoop, mpsc::Sender<CommandResult>, cylc_core::messaging::BusSender<TaskMessage>) {
    let mut graph = compile(&sections, &families, &custom_outputs).unwrap();
    graph.rebuild_children_index();
    let pool = TaskPool::new(RunaheadLimit::Count(10), 0);
    let broadcasts = BroadcastTable::new();
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let adapters = AdapterRegistry::with_builtins();
    let (subprocess, _discarded_results_rx) = SubprocessPool::new(4, QosLimits::default());
    let (inbound_tx, inbound_rx) = channel::<TaskMessage>(32);
    // A fresh channel stands in for the subprocess pool's own results
    // channel: these scenarios drive state purely off task messages, the
    // same boundary protocol the daemon's job scripts speak over, so no
    // real subprocess ever needs to report back here.
    let (results_tx, results_rx) = mpsc::channel::<CommandResult>(16);

    let main_loop = MainLoop::new(
        pool,
        graph,
        broadcasts,
        clock,
        adapters,
        subprocess,
        results_rx,
        inbound_rx,
        icp(),
        fcp,
        MainLoopConfig { default_batch_system: "background".to_string(), suite_name: "demo".to_string() },
        None,
        1,
    );
    (main_loop, results_tx, inbound_tx)
}

fn message(task_name: &str, point: CyclePoint, flow: FlowLabel, submit_num: u64, text: &str) -> TaskMessage {
    TaskMessage {
        task_name: task_name.to_string(),
        point,
        flow,
        submit_num,
        severity: Severity::Normal,
        text: text.to_string(),
        event_time: None,
    }
}

async fn succeed(
    main_loop: &mut MainLoop,
    inbound_tx: &cylc_core::messaging::BusSender<TaskMessage>,
    task_name: &str,
    point: CyclePoint,
) {
    let submit_num = main_loop.pool().get(&ProxyId::new(task_name, point, FlowLabel::Numbered(1))).map(|p| p.submit_num).unwrap_or(0);
    inbound_tx.send(message(task_name, point, FlowLabel::Numbered(1), submit_num, "succeeded")).await.unwrap();
    main_loop.run_quantum().await;
}

/// A plain linear chain: `a => b => c`. Succeeding `a` admits `b`;
/// succeeding `b` admits `c`.
#[tokio::test]
async fn test_linear_chain_propagates_to_final_task() {
    let sections = vec![GraphSection { sequence_text: "R1".into(), graph_text: "a => b => c".into() }];
    let (mut main_loop, _results_tx, inbound_tx) = build_loop(sections, HashMap::new(), vec![], None);

    main_loop.run_quantum().await;
    assert!(main_loop.pool().contains(&ProxyId::new("a", icp(), FlowLabel::Numbered(1))));

    succeed(&mut main_loop, &inbound_tx, "a", icp()).await;
    assert!(main_loop.pool().contains(&ProxyId::new("b", icp(), FlowLabel::Numbered(1))));

    succeed(&mut main_loop, &inbound_tx, "b", icp()).await;
    assert!(main_loop.pool().contains(&ProxyId::new("c", icp(), FlowLabel::Numbered(1))));
}

/// An inter-cycle dependency: `a[-P1D] => b`, with an initial cycle point
/// far enough back that the first instance of `b`'s dependency is already
/// satisfied by a prior cycle's `a`.
#[tokio::test]
async fn test_inter_cycle_dependency_spans_two_points() {
    let next_point = icp().add("P1D".parse().unwrap()).unwrap();
    let sections = vec![
        GraphSection { sequence_text: "R1".into(), graph_text: "a".into() },
        GraphSection { sequence_text: "R1".into(), graph_text: "a[-P1D] => b".into() },
    ];
    let (mut main_loop, _results_tx, inbound_tx) = build_loop(sections, HashMap::new(), vec![], None);

    main_loop.run_quantum().await;
    succeed(&mut main_loop, &inbound_tx, "a", icp()).await;

    // `b` at the next point depends on `a` at this point, one day back.
    assert!(main_loop.pool().contains(&ProxyId::new("b", next_point, FlowLabel::Numbered(1))));
}

/// A suicide trigger: `a => c` and `a:fail => !c`. When `a` fails instead
/// of succeeding, `c` is never admitted via the normal edge, and the
/// suicide edge's own entry in the removal index must never be mistaken for
/// a spawn candidate of its own — `c` stays absent from the pool either way.
#[tokio::test]
async fn test_suicide_trigger_never_admits_withdrawn_sibling() {
    let sections =
        vec![GraphSection { sequence_text: "R1".into(), graph_text: "a => c\na:fail => !c".into() }];
    let (mut main_loop, _results_tx, inbound_tx) = build_loop(sections, HashMap::new(), vec![], None);

    main_loop.run_quantum().await;
    let submit_num = main_loop.pool().get(&ProxyId::new("a", icp(), FlowLabel::Numbered(1))).unwrap().submit_num;
    inbound_tx.send(message("a", icp(), FlowLabel::Numbered(1), submit_num, "failed")).await.unwrap();
    main_loop.run_quantum().await;

    assert!(!main_loop.pool().contains(&ProxyId::new("c", icp(), FlowLabel::Numbered(1))), "c must never be admitted via its own suicide edge");
}

/// A suicide trigger withdraws a sibling that a normal edge already admitted.
/// `a => c` admits `c` once `a` succeeds; but if `c` was instead admitted
/// through some other path while `a:fail => !c` is outstanding and `a` then
/// fails, `c` is removed rather than left dangling forever.
#[tokio::test]
async fn test_suicide_trigger_withdraws_already_admitted_sibling() {
    let sections = vec![GraphSection {
        sequence_text: "R1".into(),
        graph_text: "a => c\nz => c\na:fail => !c".into(),
    }];
    let (mut main_loop, _results_tx, inbound_tx) = build_loop(sections, HashMap::new(), vec![], None);

    main_loop.run_quantum().await;
    let z_submit_num = main_loop.pool().get(&ProxyId::new("z", icp(), FlowLabel::Numbered(1))).unwrap().submit_num;
    inbound_tx.send(message("z", icp(), FlowLabel::Numbered(1), z_submit_num, "succeeded")).await.unwrap();
    main_loop.run_quantum().await;
    assert!(main_loop.pool().contains(&ProxyId::new("c", icp(), FlowLabel::Numbered(1))), "c is admitted once z succeeds");

    let a_submit_num = main_loop.pool().get(&ProxyId::new("a", icp(), FlowLabel::Numbered(1))).unwrap().submit_num;
    inbound_tx.send(message("a", icp(), FlowLabel::Numbered(1), a_submit_num, "failed")).await.unwrap();
    main_loop.run_quantum().await;

    assert!(!main_loop.pool().contains(&ProxyId::new("c", icp(), FlowLabel::Numbered(1))), "a's suicide trigger withdraws c even though it was already admitted");
}

/// A single finished producer fans out to several siblings triggered off the
/// same output — every one of them is admitted, not just the first.
#[tokio::test]
async fn test_fan_out_admits_every_sibling() {
    let sections = vec![GraphSection { sequence_text: "R1".into(), graph_text: "a => b1\na => b2\na => b3".into() }];
    let (mut main_loop, _results_tx, inbound_tx) = build_loop(sections, HashMap::new(), vec![], None);

    main_loop.run_quantum().await;
    succeed(&mut main_loop, &inbound_tx, "a", icp()).await;

    for name in ["b1", "b2", "b3"] {
        assert!(main_loop.pool().contains(&ProxyId::new(name, icp(), FlowLabel::Numbered(1))), "{name} must be admitted");
    }
}

/// A family trigger: `FAM:succeed-all => b` only admits `b` once every
/// family member has succeeded.
#[tokio::test]
async fn test_family_trigger_waits_for_every_member() {
    let mut families = HashMap::new();
    families.insert("FAM".to_string(), vec!["m1".to_string(), "m2".to_string()]);
    let sections = vec![GraphSection { sequence_text: "R1".into(), graph_text: "FAM:succeed-all => b".into() }];
    let (mut main_loop, _results_tx, inbound_tx) = build_loop(sections, families, vec![], None);

    main_loop.run_quantum().await;
    succeed(&mut main_loop, &inbound_tx, "m1", icp()).await;
    assert!(!main_loop.pool().contains(&ProxyId::new("b", icp(), FlowLabel::Numbered(1))), "b must wait on m2 too");

    succeed(&mut main_loop, &inbound_tx, "m2", icp()).await;
    assert!(main_loop.pool().contains(&ProxyId::new("b", icp(), FlowLabel::Numbered(1))));
}

/// A custom output gates a downstream task the same way a standard
/// `succeeded` qualifier would.
#[tokio::test]
async fn test_custom_output_gates_downstream_task() {
    let sections = vec![GraphSection { sequence_text: "R1".into(), graph_text: "a:data_ready => b".into() }];
    let custom_outputs = vec![CustomOutputDecl { task_name: "a".into(), output_name: "data_ready".into(), required: false }];
    let (mut main_loop, _results_tx, inbound_tx) = build_loop(sections, HashMap::new(), custom_outputs, None);

    main_loop.run_quantum().await;
    let submit_num = main_loop.pool().get(&ProxyId::new("a", icp(), FlowLabel::Numbered(1))).unwrap().submit_num;
    inbound_tx.send(message("a", icp(), FlowLabel::Numbered(1), submit_num, "data_ready")).await.unwrap();
    main_loop.run_quantum().await;

    assert!(main_loop.pool().contains(&ProxyId::new("b", icp(), FlowLabel::Numbered(1))));
}
