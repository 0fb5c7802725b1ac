//! # Property-Based Tests
//!
//! Structural invariants of the graph store under random operation
//! sequences, checked with proptest.

use brain_core::primitives::{GROUP, VALUE};
use brain_core::{Brain, LinkKey, NodeData, NodeId, NodeKind};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeSet;

const MEANINGS: [NodeId; 2] = [GROUP, VALUE];

fn refers_to(key: &LinkKey, id: NodeId) -> bool {
    key.from == id || key.to == id || key.meaning == id
}

fn neurons(brain: &Brain, n: usize) -> Vec<NodeId> {
    (0..n).map(|_| brain.create(NodeData::Neuron)).collect()
}

#[derive(Debug, Clone)]
enum ChildOp {
    Insert { index: usize, item: usize },
    RemoveAt { index: usize },
    Move { from: usize, to: usize },
    Remove { item: usize },
}

fn child_op() -> impl Strategy<Value = ChildOp> {
    prop_oneof![
        (0usize..8, 0usize..4).prop_map(|(index, item)| ChildOp::Insert { index, item }),
        (0usize..8).prop_map(|index| ChildOp::RemoveAt { index }),
        (0usize..8, 0usize..8).prop_map(|(from, to)| ChildOp::Move { from, to }),
        (0usize..4).prop_map(|item| ChildOp::Remove { item }),
    ]
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// At most one link per identity triple, whatever the set/remove order.
    #[test]
    fn link_identity_is_unique(
        ops in vec((any::<bool>(), 0usize..4, 0usize..4, 0usize..2), 1..60)
    ) {
        let brain = Brain::default();
        let nodes = neurons(&brain, 4);
        let mut model = BTreeSet::new();

        for (set, from, to, meaning) in ops {
            let key = LinkKey::new(nodes[from], nodes[to], MEANINGS[meaning]);
            if set {
                let created = brain.set_link(key.from, key.to, key.meaning).expect("set");
                prop_assert_eq!(created, model.insert(key));
            } else {
                let removed = brain.remove_link(key.from, key.to, key.meaning).expect("remove");
                prop_assert_eq!(removed, model.remove(&key));
            }
        }

        prop_assert_eq!(brain.link_count(), model.len());
        for from in &nodes {
            let out = brain.links_out(*from).expect("links out");
            let unique: BTreeSet<_> = out.iter().copied().collect();
            prop_assert_eq!(unique.len(), out.len());
            for key in out {
                prop_assert!(model.contains(&key));
                prop_assert!(brain.find_link(key.from, key.to, key.meaning).expect("find").is_some());
                prop_assert!(brain.links_in(key.to).expect("links in").contains(&key));
            }
        }
    }

    /// After delete(n) nothing refers to n.
    #[test]
    fn delete_leaves_no_dangling_references(
        children in vec((0usize..3, 0usize..6), 0..20),
        links in vec((0usize..9, 0usize..9, 0usize..11), 0..25),
        info in vec((0usize..25, 0usize..9), 0..10),
        victim in 0usize..9,
    ) {
        let brain = Brain::default();
        let clusters: Vec<_> = (0..3)
            .map(|_| brain.create(NodeData::Cluster { meaning: GROUP }))
            .collect();
        let mut all = clusters.clone();
        all.extend(neurons(&brain, 6));

        for (cluster, child) in children {
            brain.insert_child(clusters[cluster], all[3 + child]).expect("insert");
        }
        let mut keys = Vec::new();
        for (from, to, meaning) in links {
            // Past the predefined meanings, any graph node can serve as one.
            let meaning = MEANINGS
                .get(meaning)
                .copied()
                .unwrap_or_else(|| all[meaning - MEANINGS.len()]);
            let key = LinkKey::new(all[from], all[to], meaning);
            brain.set_link(key.from, key.to, key.meaning).expect("link");
            keys.push(key);
        }
        for (link, item) in info {
            if let Some(key) = keys.get(link) {
                brain.add_link_info(*key, all[item]).expect("info");
            }
        }

        let victim = all[victim];
        prop_assert!(brain.delete(victim).expect("delete"));
        prop_assert!(!brain.exists(victim));

        let mut remaining = 0;
        for id in all.iter().filter(|id| **id != victim) {
            let out = brain.links_out(*id).expect("out");
            remaining += out.len();
            prop_assert!(out.iter().all(|k| !refers_to(k, victim)));
            for key in &out {
                prop_assert!(!brain.link_info(*key).expect("info").contains(&victim));
            }
            let incoming = brain.links_in(*id).expect("in");
            prop_assert!(incoming.iter().all(|k| !refers_to(k, victim)));
            prop_assert!(!brain.parents(*id).expect("parents").contains(&victim));
            if brain.kind(*id).expect("kind") == NodeKind::Cluster {
                prop_assert!(!brain.children(*id).expect("children").contains(&victim));
            }
        }
        prop_assert_eq!(brain.link_count(), remaining);
    }

    /// Positional child edits behave like the same edits on a Vec, and the
    /// parent lists mirror child multiplicity.
    #[test]
    fn child_edits_match_a_vec_model(ops in vec(child_op(), 1..50)) {
        let brain = Brain::default();
        let cluster = brain.create(NodeData::Cluster { meaning: GROUP });
        let items = neurons(&brain, 4);
        let mut model: Vec<NodeId> = Vec::new();

        for op in ops {
            match op {
                ChildOp::Insert { index, item } => {
                    let result = brain.insert_child_at(cluster, index, items[item]);
                    if index <= model.len() {
                        result.expect("insert");
                        model.insert(index, items[item]);
                    } else {
                        prop_assert!(result.is_err());
                    }
                }
                ChildOp::RemoveAt { index } => {
                    let result = brain.remove_child_at(cluster, index);
                    if index < model.len() {
                        prop_assert_eq!(result.expect("remove"), model.remove(index));
                    } else {
                        prop_assert!(result.is_err());
                    }
                }
                ChildOp::Move { from, to } => {
                    let result = brain.move_child(cluster, from, to);
                    if from < model.len() && to < model.len() {
                        result.expect("move");
                        let item = model.remove(from);
                        model.insert(to, item);
                    } else {
                        prop_assert!(result.is_err());
                    }
                }
                ChildOp::Remove { item } => {
                    let removed = brain.remove_child(cluster, items[item]).expect("remove");
                    let position = model.iter().position(|x| *x == items[item]);
                    prop_assert_eq!(removed, position.is_some());
                    if let Some(position) = position {
                        model.remove(position);
                    }
                }
            }
            prop_assert_eq!(brain.children(cluster).expect("children"), model.clone());
        }

        for item in &items {
            let expected = model.iter().filter(|x| *x == item).count();
            let parents = brain.parents(*item).expect("parents");
            prop_assert_eq!(parents.len(), expected);
            prop_assert_eq!(brain.child_occurrences(cluster, *item).expect("count"), expected);
        }
    }
}
