//! # Memory Lifecycle
//!
//! Temporary, frozen and permanent nodes, plus pooled scratch buffers.
//!
//! ## Temporary Nodes
//!
//! Nodes created by a processor are registered as temporary and counted per
//! owning processor. When the last owner releases a node it becomes a reclaim
//! candidate and survives only if it is:
//!
//! - frozen, or
//! - referenced by a module (`module_refs > 0`), or
//! - anchored: owned by a cluster or joined by a link to a node that is
//!   durable or itself survives
//!
//! Survival is computed as a fixpoint over the candidate set, so chains of
//! temporaries hanging off durable state survive together while isolated
//! islands of temporaries are reclaimed. Nodes still owned by another
//! processor do not anchor anything.
//!
//! ## Pooled Buffers
//!
//! `ListPool` recycles `Vec<NodeId>` buffers. Every buffer taken must be
//! given back; `PooledList` does that on drop. Returned buffers are cleared.

use crate::graph::{Brain, Removal};
use crate::primitives::is_predefined;
use crate::{BrainError, NodeId};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

// =============================================================================
// LIST POOL
// =============================================================================

/// Pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    /// Buffers allocated because the pool was empty.
    pub created: u64,
    /// Buffers served from the idle set.
    pub reused: u64,
    /// Buffers handed out and not yet returned.
    pub outstanding: usize,
    /// Buffers currently idle in the pool.
    pub idle: usize,
}

/// Recycling pool of id lists.
#[derive(Debug)]
pub struct ListPool {
    idle: Mutex<Vec<Vec<NodeId>>>,
    capacity: usize,
    created: AtomicU64,
    reused: AtomicU64,
    outstanding: AtomicUsize,
}

impl ListPool {
    /// Create a pool that keeps at most `capacity` idle buffers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Take an empty buffer. Pair with `give_back`.
    pub fn take(&self) -> Vec<NodeId> {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        match self.idle.lock().pop() {
            Some(list) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                list
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Vec::new()
            }
        }
    }

    /// Return a buffer. Its contents are cleared.
    pub fn give_back(&self, mut list: Vec<NodeId>) {
        list.clear();
        let _ = self
            .outstanding
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(list);
        }
    }

    /// Take a buffer that returns itself when dropped.
    pub fn scoped(&self) -> PooledList<'_> {
        PooledList {
            pool: self,
            list: self.take(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
        }
    }
}

/// A pooled buffer on loan.
#[derive(Debug)]
pub struct PooledList<'a> {
    pool: &'a ListPool,
    list: Vec<NodeId>,
}

impl Deref for PooledList<'_> {
    type Target = Vec<NodeId>;

    fn deref(&self) -> &Self::Target {
        &self.list
    }
}

impl DerefMut for PooledList<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.list
    }
}

impl Drop for PooledList<'_> {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.list));
    }
}

// =============================================================================
// TEMP REGISTRY
// =============================================================================

/// Owner counts of temporary nodes, across all processors.
#[derive(Debug, Default)]
pub(crate) struct TempRegistry {
    owners: Mutex<HashMap<NodeId, usize>>,
}

impl TempRegistry {
    fn acquire(&self, id: NodeId) {
        *self.owners.lock().entry(id).or_insert(0) += 1;
    }

    /// Drop one ownership per id; returns the ids nobody owns any more.
    fn release(&self, ids: &[NodeId]) -> Vec<NodeId> {
        let mut owners = self.owners.lock();
        let mut orphaned = Vec::new();
        for id in ids {
            let Some(count) = owners.get_mut(id) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                owners.remove(id);
                orphaned.push(*id);
            }
        }
        orphaned
    }

    fn owners(&self, id: NodeId) -> usize {
        self.owners.lock().get(&id).copied().unwrap_or(0)
    }

    pub(crate) fn len(&self) -> usize {
        self.owners.lock().len()
    }
}

/// Outcome of releasing a processor's temporaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReclaimReport {
    /// Nodes whose last owner released them.
    pub candidates: usize,
    /// Candidates kept (frozen, module-owned or anchored).
    pub survived: usize,
    /// Candidates deleted.
    pub reclaimed: usize,
}

// =============================================================================
// BRAIN LIFECYCLE OPERATIONS
// =============================================================================

impl Brain {
    /// Register `id` as temporary for one more owner.
    pub fn make_temp(&self, id: NodeId) {
        if is_predefined(id) || !self.exists(id) {
            return;
        }
        self.temps.acquire(id);
    }

    /// Number of processors currently owning `id` as a temporary.
    #[must_use]
    pub fn temp_owners(&self, id: NodeId) -> usize {
        self.temps.owners(id)
    }

    /// Release one ownership of each id and reclaim the ones that end up
    /// unowned and unanchored.
    pub fn release_temps(&self, ids: &[NodeId]) -> ReclaimReport {
        let candidates: BTreeSet<NodeId> = self
            .temps
            .release(ids)
            .into_iter()
            .filter(|id| self.exists(*id))
            .collect();
        if candidates.is_empty() {
            return ReclaimReport::default();
        }

        let mut survivors = BTreeSet::new();
        let mut anchors: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for id in &candidates {
            let Some(record) = self.try_record(*id) else {
                continue;
            };
            if record.is_frozen() || record.module_refs() > 0 {
                survivors.insert(*id);
            } else {
                anchors.insert(*id, record.anchors());
            }
        }

        loop {
            let mut grew = false;
            for (id, list) in &anchors {
                if survivors.contains(id) {
                    continue;
                }
                let anchored = list.iter().any(|anchor| {
                    survivors.contains(anchor)
                        || (!candidates.contains(anchor) && self.is_durable(*anchor))
                });
                if anchored {
                    survivors.insert(*id);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        // Another thread may have promoted a candidate since the anchors were
        // read, so each delete re-checks them under its own locks.
        let doomed: Vec<NodeId> = candidates.difference(&survivors).copied().collect();
        let mut reclaimed = 0;
        for id in doomed {
            let outcome = self.delete_unless(id, |record| {
                record.is_frozen()
                    || record.module_refs() > 0
                    || record.anchors().iter().any(|anchor| {
                        survivors.contains(anchor)
                            || (!candidates.contains(anchor) && self.is_durable(*anchor))
                    })
            });
            match outcome {
                Ok(Removal::Deleted) => reclaimed += 1,
                Ok(Removal::Kept) => {
                    tracing::debug!(node = %id, "temp promoted during reclaim");
                    survivors.insert(id);
                }
                Ok(Removal::Missing) => {}
                Err(e) => tracing::warn!(node = %id, error = %e, "temp reclaim failed"),
            }
        }

        tracing::debug!(
            candidates = candidates.len(),
            survived = survivors.len(),
            reclaimed,
            "temporaries released"
        );
        ReclaimReport {
            candidates: candidates.len(),
            survived: survivors.len(),
            reclaimed,
        }
    }

    fn is_durable(&self, id: NodeId) -> bool {
        self.exists(id) && self.temps.owners(id) == 0
    }

    /// Exempt a node from temp reclamation. Module-owned nodes are refused.
    pub fn freeze(&self, id: NodeId) -> Result<(), BrainError> {
        let record = self.try_record(id).ok_or(BrainError::NodeNotFound(id))?;
        if record.module_refs() > 0 {
            tracing::warn!(node = %id, "cannot freeze a module-owned node");
            return Err(BrainError::ModuleOwned(id));
        }
        record.set_frozen(true);
        Ok(())
    }

    /// Remove the freeze. Returns whether the node was frozen.
    pub fn unfreeze(&self, id: NodeId) -> Result<bool, BrainError> {
        if is_predefined(id) {
            return Err(BrainError::Predefined(id));
        }
        let record = self.try_record(id).ok_or(BrainError::NodeNotFound(id))?;
        Ok(record.set_frozen(false))
    }

    pub fn is_frozen(&self, id: NodeId) -> Result<bool, BrainError> {
        let record = self.try_record(id).ok_or(BrainError::NodeNotFound(id))?;
        Ok(record.is_frozen())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeData;
    use crate::events::{ChangeEvent, NodeEvent};
    use crate::primitives::{GROUP, VALUE};
    use std::sync::Arc;

    #[test]
    fn pool_clears_and_reuses_buffers() {
        let pool = ListPool::new(4);
        let mut list = pool.take();
        list.push(NodeId(9));
        pool.give_back(list);

        let again = pool.take();
        assert!(again.is_empty());
        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.outstanding, 1);
        pool.give_back(again);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn scoped_list_returns_on_drop() {
        let pool = ListPool::new(4);
        {
            let mut list = pool.scoped();
            list.extend([NodeId(1), NodeId(2)]);
            assert_eq!(list.len(), 2);
            assert_eq!(pool.stats().outstanding, 1);
        }
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.idle, 1);
    }

    #[test]
    fn pool_keeps_at_most_capacity_idle() {
        let pool = ListPool::new(1);
        let a = pool.take();
        let b = pool.take();
        pool.give_back(a);
        pool.give_back(b);
        assert_eq!(pool.stats().idle, 1);
    }

    #[test]
    fn unanchored_temp_is_reclaimed() {
        let brain = Brain::default();
        let n = brain.create(NodeData::Neuron);
        brain.make_temp(n);
        let report = brain.release_temps(&[n]);
        assert_eq!(report.reclaimed, 1);
        assert!(!brain.exists(n));
    }

    #[test]
    fn frozen_temp_survives() {
        let brain = Brain::default();
        let n = brain.create(NodeData::Neuron);
        brain.make_temp(n);
        brain.freeze(n).expect("freeze");
        let report = brain.release_temps(&[n]);
        assert_eq!(report.survived, 1);
        assert!(brain.exists(n));
    }

    #[test]
    fn chain_hanging_off_durable_cluster_survives() {
        let brain = Brain::default();
        let durable = brain.create(NodeData::Cluster { meaning: GROUP });
        let a = brain.create(NodeData::Neuron);
        let b = brain.create(NodeData::Neuron);
        brain.make_temp(a);
        brain.make_temp(b);
        brain.insert_child(durable, a).expect("promote");
        brain.set_link(b, a, VALUE).expect("link");

        let report = brain.release_temps(&[a, b]);
        assert_eq!(report.survived, 2);
        assert!(brain.exists(a) && brain.exists(b));
    }

    #[test]
    fn island_of_temps_is_reclaimed() {
        let brain = Brain::default();
        let a = brain.create(NodeData::Neuron);
        let b = brain.create(NodeData::Neuron);
        brain.make_temp(a);
        brain.make_temp(b);
        brain.set_link(a, b, VALUE).expect("link");

        let report = brain.release_temps(&[a, b]);
        assert_eq!(report.reclaimed, 2);
        assert_eq!(brain.link_count(), 0);
    }

    #[test]
    fn shared_temp_waits_for_last_owner() {
        let brain = Brain::default();
        let n = brain.create(NodeData::Neuron);
        brain.make_temp(n);
        brain.make_temp(n);
        assert_eq!(brain.temp_owners(n), 2);

        assert_eq!(brain.release_temps(&[n]).candidates, 0);
        assert!(brain.exists(n));
        assert_eq!(brain.release_temps(&[n]).reclaimed, 1);
    }

    #[test]
    fn module_owned_node_cannot_be_frozen() {
        let brain = Brain::default();
        let n = brain.create(NodeData::Neuron);
        brain.add_module_ref(n).expect("ref");
        assert_eq!(brain.freeze(n), Err(BrainError::ModuleOwned(n)));
        assert!(!brain.is_frozen(n).expect("flag"));

        brain.make_temp(n);
        assert_eq!(brain.release_temps(&[n]).survived, 1);
    }

    #[test]
    fn predefined_nodes_stay_frozen() {
        let brain = Brain::default();
        assert!(brain.is_frozen(GROUP).expect("flag"));
        assert_eq!(brain.unfreeze(GROUP), Err(BrainError::Predefined(GROUP)));
    }

    #[test]
    fn temp_promoted_while_reclaiming_survives() {
        let brain = Arc::new(Brain::default());
        let durable = brain.create(NodeData::Cluster { meaning: GROUP });
        let first = brain.create(NodeData::Neuron);
        let late = brain.create(NodeData::Neuron);
        brain.make_temp(first);
        brain.make_temp(late);

        // Promote `late` the moment `first` is gone, after the anchors were read.
        let promoter = Arc::clone(&brain);
        let _handle = brain.events().register(
            Arc::new(move |event: &ChangeEvent| {
                if matches!(event, ChangeEvent::Node(NodeEvent::Removed { .. })) {
                    promoter.insert_child(durable, late).expect("promote");
                }
            }),
            first,
        );

        let report = brain.release_temps(&[first, late]);
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.survived, 1);
        assert!(!brain.exists(first));
        assert!(brain.exists(late));
        assert_eq!(brain.children(durable).expect("children"), vec![late]);
    }
}
