//! Benchmarks for prerequisite-group evaluation and output delivery, the
//! two operations the main loop runs once per completed task output per
//! quantum.
//!
//! Run with: cargo bench -p cylc-core

use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cylc_core::cycle::{CalendarMode, CyclePoint};
use cylc_core::flow::FlowLabel;
use cylc_core::graph::{
    compile, ChildKey, CustomOutputDecl, GraphSection, Offset, PrerequisiteAtom, Qualifier, TriggerExpr,
};
use cylc_core::pool::{deliver_output, PrerequisiteGroup};

fn icp() -> CyclePoint {
    CyclePoint::parse_datetime("20240101T000000Z", CalendarMode::ProlepticGregorian).unwrap()
}

/// A wide `a1 & a2 & ... & aN` group, satisfied one atom at a time — the
/// shape a fan-in task (many upstream siblings) ends up with.
fn build_and_group(width: usize) -> PrerequisiteGroup {
    let atoms: Vec<TriggerExpr> = (0..width)
        .map(|i| TriggerExpr::Atom(PrerequisiteAtom::new(format!("p{i}"), Offset::SamePoint, Qualifier::Succeeded)))
        .collect();
    PrerequisiteGroup::new("R1", TriggerExpr::And(atoms))
}

fn bench_prerequisite_satisfy(c: &mut Criterion) {
    let mut group = c.benchmark_group("prerequisite_satisfy");

    for width in [8usize, 64, 512] {
        group.bench_with_input(BenchmarkId::new("and_chain", width), &width, |b, &width| {
            b.iter(|| {
                let mut g = build_and_group(width);
                for i in 0..width {
                    let key = ChildKey {
                        parent_name: format!("p{i}"),
                        offset_text: String::new(),
                        qualifier_text: "succeeded".to_string(),
                    };
                    black_box(g.satisfy(&key));
                }
                black_box(g.is_true())
            });
        });
    }

    group.finish();
}

/// A graph where one task fans out to N children, all triggered off the
/// same `succeeded` output — the shape `deliver_output` walks every time a
/// widely-depended-on task (e.g. a daily "housekeeping done" task) finishes.
fn build_fan_out_graph(width: usize) -> cylc_core::graph::GraphModel {
    let graph_text = (0..width).map(|i| format!("a => c{i}")).collect::<Vec<_>>().join("\n");
    let sections = vec![GraphSection { sequence_text: "R1".to_string(), graph_text }];
    let mut model = compile(&sections, &HashMap::new(), &[] as &[CustomOutputDecl]).unwrap();
    model.rebuild_children_index();
    model
}

fn bench_deliver_output(c: &mut Criterion) {
    let mut group = c.benchmark_group("deliver_output");

    for width in [8usize, 64, 512] {
        let model = build_fan_out_graph(width);
        group.bench_with_input(BenchmarkId::new("fan_out", width), &width, |b, _| {
            b.iter(|| {
                let result = deliver_output(
                    &model,
                    icp(),
                    None,
                    "a",
                    icp(),
                    FlowLabel::Numbered(1),
                    "succeeded",
                    |_id, _key| black_box(true),
                    |_id| black_box(false),
                );
                black_box(result.spawn_candidates.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_prerequisite_satisfy, bench_deliver_output);
criterion_main!(benches);
