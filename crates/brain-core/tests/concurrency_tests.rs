//! # Concurrency Tests
//!
//! Multi-thread stress over the lock manager and the graph store. A hang in
//! any of these is a deadlock.

use brain_core::primitives::{GROUP, VALUE};
use brain_core::{
    Aspect, Brain, InstructionKind, LockBatch, LockManager, NodeData, NodeId, Processor,
    instruction_id,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;

type Request = (u64, usize, bool);

fn aspect(index: usize) -> Aspect {
    Aspect::ALL[index % Aspect::ALL.len()]
}

fn run_batches(manager: &Arc<LockManager>, plans: Vec<Vec<Vec<Request>>>) {
    let barrier = Arc::new(Barrier::new(plans.len()));
    let workers: Vec<_> = plans
        .into_iter()
        .map(|batches| {
            let manager = Arc::clone(manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for requests in batches {
                    let mut batch = LockBatch::new();
                    for (node, index, write) in requests {
                        if write {
                            batch.write(NodeId(node), aspect(index));
                        } else {
                            batch.read(NodeId(node), aspect(index));
                        }
                    }
                    let guard = manager.request_locks(batch).expect("batch");
                    thread::yield_now();
                    drop(guard);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
}

// =============================================================================
// LOCK ORDERING
// =============================================================================

#[test]
fn opposite_order_batches_complete() {
    let brain = Arc::new(Brain::default());
    let x = brain.create(NodeData::Cluster { meaning: GROUP });
    let y = brain.create(NodeData::Neuron);

    let workers: Vec<_> = [false, true]
        .into_iter()
        .map(|reversed| {
            let brain = Arc::clone(&brain);
            thread::spawn(move || {
                for _ in 0..1_000 {
                    let mut batch = LockBatch::new();
                    if reversed {
                        batch.write(y, Aspect::Parents).write(x, Aspect::Children);
                    } else {
                        batch.write(x, Aspect::Children).write(y, Aspect::Parents);
                    }
                    let _guard = brain.locks().request_locks(batch).expect("batch");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    let stats = brain.locks().stats();
    assert_eq!(stats.acquired, stats.released);
    assert!(!brain.locks().is_locked(x, Aspect::Children));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Random overlapping batches from several threads always terminate
    /// and leave nothing held.
    #[test]
    fn random_overlapping_batches_terminate(
        plans in vec(
            vec(vec((1u64..6, 0usize..6, any::<bool>()), 1..6), 20..60),
            2..6,
        )
    ) {
        let manager = Arc::new(LockManager::default());
        run_batches(&manager, plans);

        let stats = manager.stats();
        prop_assert_eq!(stats.acquired, stats.released);
        for node in 1..6 {
            for index in 0..6 {
                prop_assert!(!manager.is_locked(NodeId(node), aspect(index)));
            }
        }
    }
}

// =============================================================================
// CLUSTER EDITS
// =============================================================================

#[test]
fn disjoint_clusters_keep_their_order() {
    let brain = Arc::new(Brain::default());
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let brain = Arc::clone(&brain);
            thread::spawn(move || {
                let cluster = brain.create(NodeData::Cluster { meaning: GROUP });
                let items: Vec<_> = (0..200).map(|_| brain.create(NodeData::Neuron)).collect();
                for item in &items {
                    brain.insert_child(cluster, *item).expect("insert");
                }
                for item in items.iter().step_by(2) {
                    assert!(brain.remove_child(cluster, *item).expect("remove"));
                }
                let expected: Vec<_> = items.iter().skip(1).step_by(2).copied().collect();
                (cluster, expected)
            })
        })
        .collect();

    for worker in workers {
        let (cluster, expected) = worker.join().expect("worker");
        assert_eq!(brain.children(cluster).expect("children"), expected);
    }
}

#[test]
fn shared_cluster_serialises_appends() {
    let brain = Arc::new(Brain::default());
    let cluster = brain.create(NodeData::Cluster { meaning: GROUP });
    let barrier = Arc::new(Barrier::new(4));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let brain = Arc::clone(&brain);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let items: Vec<_> = (0..100).map(|_| brain.create(NodeData::Neuron)).collect();
                barrier.wait();
                for item in &items {
                    brain.insert_child(cluster, *item).expect("insert");
                }
                items
            })
        })
        .collect();
    let per_thread: Vec<Vec<NodeId>> = workers
        .into_iter()
        .map(|w| w.join().expect("worker"))
        .collect();

    let children = brain.children(cluster).expect("children");
    assert_eq!(children.len(), 400);
    for items in &per_thread {
        let seen: Vec<_> = children
            .iter()
            .filter(|c| items.contains(c))
            .copied()
            .collect();
        assert_eq!(&seen, items, "a thread's appends were reordered");
        for item in items {
            assert_eq!(brain.parents(*item).expect("parents"), vec![cluster]);
        }
    }
}

#[test]
fn deletes_race_with_inserts_without_dangling() {
    let brain = Arc::new(Brain::default());
    let cluster = brain.create(NodeData::Cluster { meaning: GROUP });
    let hub = brain.create(NodeData::Neuron);
    let items: Vec<_> = (0..300).map(|_| brain.create(NodeData::Neuron)).collect();
    let items = Arc::new(items);

    let inserter = {
        let (brain, items) = (Arc::clone(&brain), Arc::clone(&items));
        thread::spawn(move || {
            for item in items.iter() {
                // the deleter may win the race
                let _ = brain.insert_child(cluster, *item);
                let _ = brain.set_link(hub, *item, VALUE);
            }
        })
    };
    let deleter = {
        let (brain, items) = (Arc::clone(&brain), Arc::clone(&items));
        thread::spawn(move || {
            for item in items.iter().rev() {
                brain.delete(*item).expect("delete");
            }
        })
    };
    inserter.join().expect("inserter");
    deleter.join().expect("deleter");

    let live: Vec<_> = items.iter().filter(|i| brain.exists(**i)).copied().collect();
    let children = brain.children(cluster).expect("children");
    assert!(children.iter().all(|c| brain.exists(*c)));
    assert!(children.iter().all(|c| live.contains(c)));
    for key in brain.links_out(hub).expect("links") {
        assert!(brain.exists(key.to));
    }
}

#[test]
fn concurrent_link_toggles_keep_one_link() {
    let brain = Arc::new(Brain::default());
    let a = brain.create(NodeData::Neuron);
    let b = brain.create(NodeData::Neuron);

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let brain = Arc::clone(&brain);
            thread::spawn(move || {
                for round in 0..250 {
                    if (round + i) % 2 == 0 {
                        brain.set_link(a, b, VALUE).expect("set");
                    } else {
                        brain.remove_link(a, b, VALUE).expect("remove");
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    let out = brain.links_out(a).expect("out");
    let incoming = brain.links_in(b).expect("in");
    assert!(out.len() <= 1);
    assert_eq!(out, incoming);
}

// =============================================================================
// PROCESSORS
// =============================================================================

#[test]
fn parallel_processors_share_one_brain() {
    let brain = Arc::new(Brain::default());
    let shared = brain.create(NodeData::Cluster { meaning: GROUP });
    let baseline = brain.node_count();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let brain = Arc::clone(&brain);
            thread::spawn(move || {
                let mut p = Processor::new(Arc::clone(&brain));
                for round in 0..50 {
                    let r = p
                        .execute(instruction_id(InstructionKind::New), &[])
                        .expect("new");
                    if round % 5 == 0 {
                        let args = [shared, r.results[0]];
                        p.execute(instruction_id(InstructionKind::AddChild), &args)
                            .expect("promote");
                    }
                }
                assert!(p.stack_stats().is_balanced());
                p.finish()
            })
        })
        .collect();

    let mut survived = 0;
    for worker in workers {
        let report = worker.join().expect("worker");
        assert_eq!(report.candidates, 50);
        survived += report.survived;
    }
    assert_eq!(survived, 40);
    assert_eq!(brain.node_count(), baseline + 40);
    assert_eq!(brain.child_count(shared).expect("count"), 40);
}
