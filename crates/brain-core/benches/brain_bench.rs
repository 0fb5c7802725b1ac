//! # Brain Benchmarks
//!
//! Performance benchmarks for brain-core graph and engine operations.
//!
//! Run with: `cargo bench -p brain-core`

use brain_core::primitives::{GROUP, VALUE};
use brain_core::{
    Aspect, Brain, InstructionKind, LockBatch, NodeData, NodeId, Processor, ProgramBuilder,
};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

/// A cluster holding `size` fresh neurons.
fn create_cluster(brain: &Brain, size: usize) -> (NodeId, Vec<NodeId>) {
    let cluster = brain.create(NodeData::Cluster { meaning: GROUP });
    let items: Vec<_> = (0..size)
        .map(|_| {
            let item = brain.create(NodeData::Neuron);
            brain.insert_child(cluster, item).expect("insert");
            item
        })
        .collect();
    (cluster, items)
}

/// A chain of `depth` nested additions.
fn create_sum(brain: &Brain, depth: usize) -> NodeId {
    let b = ProgramBuilder::new(brain);
    let mut expr = b.int(0);
    for i in 0..depth {
        expr = b
            .expression(InstructionKind::Add, &[expr, b.int(i as i64)])
            .expect("expression");
    }
    expr
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_child_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("child_insertion");

    for size in [100, 1000, 5000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let brain = Brain::default();
                black_box(create_cluster(&brain, size))
            });
        });
    }

    group.finish();
}

fn bench_link_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("link_churn");

    for size in [100, 1000].iter() {
        let brain = Brain::default();
        let (hub, items) = create_cluster(&brain, *size);

        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter(|| {
                for item in items {
                    brain.set_link(hub, *item, VALUE).expect("set");
                }
                for item in items {
                    brain.remove_link(hub, *item, VALUE).expect("remove");
                }
            });
        });
    }

    group.finish();
}

fn bench_lock_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_batch");
    let brain = Brain::default();

    for size in [2, 16, 64].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut batch = LockBatch::new();
                for i in (0..size as u64).rev() {
                    batch.write(NodeId(2_000 + i), Aspect::Children);
                }
                black_box(brain.locks().request_locks(batch).expect("batch"))
            });
        });
    }

    group.finish();
}

fn bench_cascade_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("cascade_delete");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let brain = Brain::default();
                let (cluster, _) = create_cluster(&brain, size);
                black_box(brain.delete(cluster).expect("delete"))
            });
        });
    }

    group.finish();
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");

    for depth in [10, 50, 100].iter() {
        let brain = Arc::new(Brain::default());
        let expr = create_sum(&brain, *depth);

        group.bench_with_input(BenchmarkId::new("fast_path", depth), &expr, |b, &expr| {
            let mut p = Processor::new(Arc::clone(&brain));
            b.iter(|| black_box(p.try_eval_int(expr)));
        });

        group.bench_with_input(BenchmarkId::new("materialised", depth), &expr, |b, &expr| {
            b.iter(|| {
                let mut p = Processor::new(Arc::clone(&brain));
                let results = p.evaluate(expr).expect("evaluate");
                black_box((results, p.finish()))
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_child_insertion,
    bench_link_churn,
    bench_lock_batch,
    bench_cascade_delete,
    bench_evaluate,
);
criterion_main!(benches);
