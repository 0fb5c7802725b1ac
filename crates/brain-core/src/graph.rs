//! # Graph Store
//!
//! The Brain: authoritative storage of nodes, links and cluster membership.
//!
//! Every primitive operation builds one `LockBatch` for exactly the aspects it
//! touches, acquires it, validates, mutates, releases, and only then publishes
//! its change events. Validation happens before the first write, so a failed
//! operation leaves nothing behind.
//!
//! Operations whose lock set depends on graph contents (delete, remove_link,
//! endpoint changes, positional removal) snapshot the neighbourhood, lock it,
//! re-snapshot and retry when it moved in between.
//!
//! ## Storage
//!
//! Each node is a `NodeRecord` with one interior field per aspect. The field
//! mutexes are only held for the duration of a single read or write; mutual
//! exclusion between operations comes from the aspect locks.

use crate::events::{ChangeEvent, EventBus, LinkEvent, ListOwner, NodeEvent};
use crate::locks::{LockBatch, LockManager, LockStats};
use crate::memory::{ListPool, PoolStats, PooledList, TempRegistry};
use crate::primitives::{FIRST_DYNAMIC_ID, is_predefined};
use crate::processor::registry::predefined_entries;
use crate::{
    Aspect, BrainConfig, BrainError, BusStats, Link, LinkKey, NodeData, NodeId, NodeKind, Value,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

// =============================================================================
// NODE RECORD
// =============================================================================

/// An outgoing link as stored on its source node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutLink {
    to: NodeId,
    meaning: NodeId,
    info: Vec<NodeId>,
}

impl OutLink {
    fn key(&self, from: NodeId) -> LinkKey {
        LinkKey::new(from, self.to, self.meaning)
    }

    fn is(&self, key: &LinkKey) -> bool {
        self.to == key.to && self.meaning == key.meaning
    }
}

#[derive(Debug)]
pub(crate) struct NodeRecord {
    id: NodeId,
    kind: NodeKind,
    value: Mutex<Value>,
    children: Mutex<Vec<NodeId>>,
    parents: Mutex<Vec<NodeId>>,
    links_in: Mutex<Vec<LinkKey>>,
    links_out: Mutex<Vec<OutLink>>,
    /// Links whose info list contains this node.
    info_refs: Mutex<Vec<LinkKey>>,
    /// Links that use this node as their meaning. Guarded by `Info`.
    meaning_refs: Mutex<Vec<LinkKey>>,
    changed: AtomicBool,
    frozen: AtomicBool,
    module_refs: AtomicU32,
}

impl NodeRecord {
    fn new(id: NodeId, data: NodeData) -> Self {
        let (kind, value) = data.into_parts();
        Self {
            id,
            kind,
            value: Mutex::new(value),
            children: Mutex::new(Vec::new()),
            parents: Mutex::new(Vec::new()),
            links_in: Mutex::new(Vec::new()),
            links_out: Mutex::new(Vec::new()),
            info_refs: Mutex::new(Vec::new()),
            meaning_refs: Mutex::new(Vec::new()),
            changed: AtomicBool::new(true),
            frozen: AtomicBool::new(false),
            module_refs: AtomicU32::new(0),
        }
    }

    fn touch(&self) {
        self.changed.store(true, Ordering::Release);
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub(crate) fn set_frozen(&self, frozen: bool) -> bool {
        self.frozen.swap(frozen, Ordering::AcqRel)
    }

    pub(crate) fn module_refs(&self) -> u32 {
        self.module_refs.load(Ordering::Acquire)
    }

    /// Nodes that can keep this one alive: owning clusters, link endpoints
    /// and the endpoints of links using it as meaning.
    pub(crate) fn anchors(&self) -> Vec<NodeId> {
        let mut anchors = self.parents.lock().clone();
        anchors.extend(self.links_in.lock().iter().map(|key| key.from));
        anchors.extend(self.links_out.lock().iter().map(|out| out.to));
        for key in self.meaning_refs.lock().iter() {
            anchors.push(key.from);
            anchors.push(key.to);
        }
        anchors.retain(|id| *id != self.id);
        anchors
    }

    fn find_out(&self, key: &LinkKey) -> Option<OutLink> {
        self.links_out.lock().iter().find(|out| out.is(key)).cloned()
    }
}

fn remove_one<T: PartialEq>(list: &mut Vec<T>, item: &T) -> Option<usize> {
    let pos = list.iter().position(|x| x == item)?;
    list.remove(pos);
    Some(pos)
}

/// Predefined meanings are never deleted, so their uses are not indexed.
fn tracks_meaning(meaning: NodeId) -> bool {
    !is_predefined(meaning)
}

fn replace_one<T: PartialEq>(list: &mut [T], old: &T, new: T) -> bool {
    match list.iter_mut().find(|x| **x == *old) {
        Some(slot) => {
            *slot = new;
            true
        }
        None => false,
    }
}

/// The neighbourhood a delete has to detach.
#[derive(Debug, PartialEq)]
struct Detach {
    parents: Vec<NodeId>,
    children: Vec<NodeId>,
    outgoing: Vec<OutLink>,
    incoming: Vec<(LinkKey, Vec<NodeId>)>,
    info_refs: Vec<LinkKey>,
    /// Links whose meaning is the deleted node, with their info lists.
    meaning_links: Vec<(LinkKey, Vec<NodeId>)>,
}

/// Outcome of a conditional delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    Deleted,
    Missing,
    Kept,
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Snapshot of engine-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrainStats {
    pub nodes: usize,
    pub links: usize,
    /// Nodes currently owned by at least one processor.
    pub temps: usize,
    pub locks: LockStats,
    pub pool: PoolStats,
    pub bus: BusStats,
}

// =============================================================================
// BRAIN
// =============================================================================

/// The shared semantic graph.
///
/// `Brain` is `Send + Sync`; share it between processors with `Arc<Brain>`.
pub struct Brain {
    nodes: RwLock<BTreeMap<NodeId, Arc<NodeRecord>>>,
    next_id: AtomicU64,
    locks: LockManager,
    bus: EventBus,
    pub(crate) pool: ListPool,
    pub(crate) temps: TempRegistry,
    config: BrainConfig,
}

impl std::fmt::Debug for Brain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Brain")
            .field("nodes", &self.node_count())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Brain {
    fn default() -> Self {
        Self::build(BrainConfig::default())
    }
}

impl Brain {
    /// Create a Brain with the predefined nodes installed.
    pub fn new(config: BrainConfig) -> Result<Self, BrainError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: BrainConfig) -> Self {
        let mut nodes = BTreeMap::new();
        for entry in predefined_entries() {
            let record = NodeRecord::new(entry.id, entry.data);
            record.set_frozen(true);
            record.changed.store(false, Ordering::Release);
            nodes.insert(entry.id, Arc::new(record));
        }
        tracing::debug!(predefined = nodes.len(), "brain initialised");

        Self {
            nodes: RwLock::new(nodes),
            next_id: AtomicU64::new(FIRST_DYNAMIC_ID),
            locks: LockManager::new(config.lock_wait_warn()),
            bus: EventBus::new(),
            pool: ListPool::new(config.pool_capacity),
            temps: TempRegistry::default(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &BrainConfig {
        &self.config
    }

    /// The lock manager guarding this Brain.
    #[must_use]
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// The change feed.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Scratch id-list buffers.
    #[must_use]
    pub fn pool(&self) -> &ListPool {
        &self.pool
    }

    // -------------------------------------------------------------------------
    // internals
    // -------------------------------------------------------------------------

    pub(crate) fn try_record(&self, id: NodeId) -> Option<Arc<NodeRecord>> {
        self.nodes.read().get(&id).cloned()
    }

    fn record(&self, id: NodeId) -> Result<Arc<NodeRecord>, BrainError> {
        self.try_record(id).ok_or(BrainError::NodeNotFound(id))
    }

    fn cluster(&self, id: NodeId) -> Result<Arc<NodeRecord>, BrainError> {
        let record = self.record(id)?;
        if record.kind != NodeKind::Cluster {
            return Err(BrainError::NotACluster(id));
        }
        Ok(record)
    }

    /// Lock a fixed batch, run `apply`, release, then publish its events.
    fn locked<T>(
        &self,
        batch: LockBatch,
        apply: impl FnOnce(&mut Vec<ChangeEvent>) -> Result<T, BrainError>,
    ) -> Result<T, BrainError> {
        let guard = self.locks.request_locks(batch)?;
        let mut events = Vec::new();
        let out = apply(&mut events);
        drop(guard);
        if out.is_ok() && !events.is_empty() {
            self.bus.publish(&events);
        }
        out
    }

    /// Like `locked`, for lock sets derived from graph contents: snapshot,
    /// lock, re-snapshot, retry while the two differ.
    fn locked_stable<S: PartialEq, T>(
        &self,
        anchor: NodeId,
        snapshot: impl Fn() -> Result<S, BrainError>,
        plan: impl Fn(&S) -> LockBatch,
        apply: impl FnOnce(S, &mut Vec<ChangeEvent>) -> Result<T, BrainError>,
    ) -> Result<T, BrainError> {
        for attempt in 0..self.config.max_lock_retries {
            let seen = snapshot()?;
            let guard = self.locks.request_locks(plan(&seen))?;
            let current = snapshot()?;
            if current != seen {
                drop(guard);
                tracing::debug!(node = %anchor, attempt, "lock set moved, retrying");
                continue;
            }

            let mut events = Vec::new();
            let out = apply(current, &mut events);
            drop(guard);
            if out.is_ok() && !events.is_empty() {
                self.bus.publish(&events);
            }
            return out;
        }

        tracing::warn!(
            node = %anchor,
            retries = self.config.max_lock_retries,
            "lock set did not stabilise"
        );
        Err(BrainError::LockContention(anchor))
    }

    fn link_info_snapshot(&self, key: &LinkKey) -> Result<Option<Vec<NodeId>>, BrainError> {
        let from = self.record(key.from)?;
        Ok(from.find_out(key).map(|out| out.info))
    }

    fn with_info(&self, keys: Vec<LinkKey>) -> Vec<(LinkKey, Vec<NodeId>)> {
        keys.into_iter()
            .map(|key| {
                let info = self
                    .try_record(key.from)
                    .and_then(|source| source.find_out(&key))
                    .map(|out| out.info)
                    .unwrap_or_default();
                (key, info)
            })
            .collect()
    }

    fn detach_snapshot(&self, record: &NodeRecord) -> Detach {
        let incoming = self.with_info(record.links_in.lock().clone());
        let meaning_links = self.with_info(record.meaning_refs.lock().clone());

        Detach {
            parents: record.parents.lock().clone(),
            children: record.children.lock().clone(),
            outgoing: record.links_out.lock().clone(),
            incoming,
            info_refs: record.info_refs.lock().clone(),
            meaning_links,
        }
    }

    fn remove_info_ref(&self, item: NodeId, key: &LinkKey) {
        if let Some(record) = self.try_record(item) {
            remove_one(&mut record.info_refs.lock(), key);
        }
    }

    fn add_meaning_ref(&self, meaning: &NodeRecord, key: LinkKey) {
        if tracks_meaning(meaning.id) {
            meaning.meaning_refs.lock().push(key);
        }
    }

    fn remove_meaning_ref(&self, key: &LinkKey) {
        if !tracks_meaning(key.meaning) {
            return;
        }
        if let Some(record) = self.try_record(key.meaning) {
            remove_one(&mut record.meaning_refs.lock(), key);
        }
    }

    fn rekey_meaning_ref(&self, old: &LinkKey, new: LinkKey) {
        if !tracks_meaning(old.meaning) {
            return;
        }
        if let Some(record) = self.try_record(old.meaning) {
            replace_one(&mut record.meaning_refs.lock(), old, new);
        }
    }

    fn rekey_info_refs(&self, info: &[NodeId], old: &LinkKey, new: LinkKey) {
        for item in info {
            if let Some(record) = self.try_record(*item) {
                replace_one(&mut record.info_refs.lock(), old, new);
            }
        }
    }

    // =========================================================================
    // NODE LIFECYCLE
    // =========================================================================

    /// Allocate and register a node. Always succeeds.
    pub fn create(&self, data: NodeData) -> NodeId {
        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = Arc::new(NodeRecord::new(id, data));
        self.nodes.write().insert(id, record);
        tracing::trace!(node = %id, "node created");
        self.bus.publish(&[ChangeEvent::created(id)]);
        id
    }

    /// Remove a node and detach every link, membership and info entry that
    /// references it.
    ///
    /// Unknown ids are logged and yield `Ok(false)`.
    pub fn delete(&self, id: NodeId) -> Result<bool, BrainError> {
        if is_predefined(id) {
            tracing::warn!(node = %id, "refusing to delete predefined node");
            return Err(BrainError::Predefined(id));
        }
        if !self.exists(id) {
            tracing::warn!(node = %id, "delete of unknown node");
            return Ok(false);
        }

        let result = self.delete_unless(id, |_| false)? == Removal::Deleted;
        if result {
            tracing::debug!(node = %id, "node deleted");
        } else {
            tracing::warn!(node = %id, "node vanished before delete");
        }
        Ok(result)
    }

    /// Delete `id` unless `keep` holds once its whole neighbourhood is
    /// locked. Nothing can attach to the node while `keep` runs.
    pub(crate) fn delete_unless(
        &self,
        id: NodeId,
        keep: impl FnOnce(&NodeRecord) -> bool,
    ) -> Result<Removal, BrainError> {
        if is_predefined(id) {
            return Err(BrainError::Predefined(id));
        }
        self.locked_stable(
            id,
            || Ok(self.try_record(id).map(|record| self.detach_snapshot(&record))),
            |plan| {
                let mut batch = LockBatch::new();
                for aspect in Aspect::ALL {
                    batch.write(id, aspect);
                }
                let Some(plan) = plan else { return batch };
                for parent in &plan.parents {
                    batch.write(*parent, Aspect::Children);
                }
                for child in &plan.children {
                    batch.write(*child, Aspect::Parents);
                }
                for out in &plan.outgoing {
                    batch.write(out.to, Aspect::LinksIn);
                    if tracks_meaning(out.meaning) {
                        batch.write(out.meaning, Aspect::Info);
                    }
                    for item in &out.info {
                        batch.write(*item, Aspect::Info);
                    }
                }
                for (key, info) in plan.incoming.iter().chain(&plan.meaning_links) {
                    batch.write(key.from, Aspect::LinksOut);
                    batch.write(key.from, Aspect::Info);
                    batch.write(key.to, Aspect::LinksIn);
                    if tracks_meaning(key.meaning) {
                        batch.write(key.meaning, Aspect::Info);
                    }
                    for item in info {
                        batch.write(*item, Aspect::Info);
                    }
                }
                for key in &plan.info_refs {
                    batch.write(key.from, Aspect::Info);
                }
                batch
            },
            |plan, events| {
                let Some(plan) = plan else {
                    return Ok(Removal::Missing);
                };
                let record = self.record(id)?;
                if keep(&record) {
                    return Ok(Removal::Kept);
                }
                self.detach(&record, &plan, events);
                self.nodes.write().remove(&id);
                events.push(ChangeEvent::removed(id));
                Ok(Removal::Deleted)
            },
        )
    }

    fn detach(&self, record: &NodeRecord, plan: &Detach, events: &mut Vec<ChangeEvent>) {
        let id = record.id;

        // Info entries on links that survive this delete.
        let mut refs = plan.info_refs.clone();
        refs.dedup();
        for key in refs.iter().filter(|k| k.from != id && k.to != id) {
            let Some(source) = self.try_record(key.from) else {
                continue;
            };
            let mut removed = Vec::new();
            {
                let mut out = source.links_out.lock();
                if let Some(link) = out.iter_mut().find(|out| out.is(key)) {
                    while let Some(pos) = remove_one(&mut link.info, &id) {
                        removed.push(pos);
                    }
                }
            }
            source.touch();
            for pos in removed {
                events.push(ChangeEvent::list_removed(ListOwner::Info(*key), pos, id));
            }
        }

        for out in &plan.outgoing {
            let key = out.key(id);
            if out.to != id {
                if let Some(target) = self.try_record(out.to) {
                    target.links_in.lock().retain(|k| *k != key);
                    target.touch();
                }
            }
            for item in &out.info {
                self.remove_info_ref(*item, &key);
            }
            if out.meaning != id {
                self.remove_meaning_ref(&key);
            }
            events.push(ChangeEvent::Link(LinkEvent::FromLinkRemoved(key)));
            events.push(ChangeEvent::Link(LinkEvent::ToLinkRemoved(key)));
        }

        for (key, info) in plan.incoming.iter().filter(|(k, _)| k.from != id) {
            if let Some(source) = self.try_record(key.from) {
                source.links_out.lock().retain(|out| !out.is(key));
                source.touch();
            }
            for item in info {
                self.remove_info_ref(*item, key);
            }
            if key.meaning != id {
                self.remove_meaning_ref(key);
            }
            events.push(ChangeEvent::Link(LinkEvent::FromLinkRemoved(*key)));
            events.push(ChangeEvent::Link(LinkEvent::ToLinkRemoved(*key)));
        }

        // Links between other nodes that use this one as meaning.
        for (key, info) in plan
            .meaning_links
            .iter()
            .filter(|(k, _)| k.from != id && k.to != id)
        {
            if let Some(source) = self.try_record(key.from) {
                source.links_out.lock().retain(|out| !out.is(key));
                source.touch();
            }
            if let Some(target) = self.try_record(key.to) {
                target.links_in.lock().retain(|k| k != key);
                target.touch();
            }
            for item in info {
                self.remove_info_ref(*item, key);
            }
            events.push(ChangeEvent::Link(LinkEvent::FromLinkRemoved(*key)));
            events.push(ChangeEvent::Link(LinkEvent::ToLinkRemoved(*key)));
        }

        let mut parents = plan.parents.clone();
        parents.sort_unstable();
        parents.dedup();
        for parent in parents.into_iter().filter(|p| *p != id) {
            let Some(cluster) = self.try_record(parent) else {
                continue;
            };
            let mut removed = Vec::new();
            {
                let mut children = cluster.children.lock();
                while let Some(pos) = remove_one(&mut children, &id) {
                    removed.push(pos);
                }
            }
            cluster.touch();
            for pos in removed {
                events.push(ChangeEvent::list_removed(ListOwner::Children(parent), pos, id));
            }
        }

        let mut children = plan.children.clone();
        children.sort_unstable();
        children.dedup();
        for child in children.into_iter().filter(|c| *c != id) {
            if let Some(child) = self.try_record(child) {
                child.parents.lock().retain(|p| *p != id);
                child.touch();
            }
        }
    }

    // =========================================================================
    // LINKS
    // =========================================================================

    /// Look a link up by its identity triple.
    pub fn find_link(
        &self,
        from: NodeId,
        to: NodeId,
        meaning: NodeId,
    ) -> Result<Option<Link>, BrainError> {
        let key = LinkKey::new(from, to, meaning);
        let mut batch = LockBatch::new();
        batch.read(from, Aspect::LinksOut).read(from, Aspect::Info);
        self.locked(batch, |_| {
            let source = self.record(from)?;
            Ok(source.find_out(&key).map(|out| Link {
                from,
                to,
                meaning,
                info: out.info,
            }))
        })
    }

    /// Create a link. `Ok(false)` when the triple already exists.
    pub fn set_link(&self, from: NodeId, to: NodeId, meaning: NodeId) -> Result<bool, BrainError> {
        let key = LinkKey::new(from, to, meaning);
        let mut batch = LockBatch::new();
        batch.write(from, Aspect::LinksOut).write(to, Aspect::LinksIn);
        if tracks_meaning(meaning) {
            batch.write(meaning, Aspect::Info);
        }
        self.locked(batch, |events| {
            let source = self.record(from)?;
            let target = self.record(to)?;
            let meaning_record = self.record(meaning)?;
            if source.find_out(&key).is_some() {
                return Ok(false);
            }
            source.links_out.lock().push(OutLink {
                to,
                meaning,
                info: Vec::new(),
            });
            target.links_in.lock().push(key);
            self.add_meaning_ref(&meaning_record, key);
            source.touch();
            target.touch();
            events.push(ChangeEvent::Link(LinkEvent::FromLinkCreated(key)));
            events.push(ChangeEvent::Link(LinkEvent::ToLinkCreated(key)));
            Ok(true)
        })
    }

    /// Remove a link. `Ok(false)` when it does not exist.
    pub fn remove_link(
        &self,
        from: NodeId,
        to: NodeId,
        meaning: NodeId,
    ) -> Result<bool, BrainError> {
        let key = LinkKey::new(from, to, meaning);
        self.locked_stable(
            from,
            || self.link_info_snapshot(&key),
            |info| {
                let mut batch = LockBatch::new();
                batch
                    .write(from, Aspect::LinksOut)
                    .write(from, Aspect::Info)
                    .write(to, Aspect::LinksIn);
                if tracks_meaning(meaning) {
                    batch.write(meaning, Aspect::Info);
                }
                for item in info.iter().flatten() {
                    batch.write(*item, Aspect::Info);
                }
                batch
            },
            |info, events| {
                let Some(info) = info else { return Ok(false) };
                let source = self.record(from)?;
                source.links_out.lock().retain(|out| !out.is(&key));
                source.touch();
                if let Some(target) = self.try_record(to) {
                    target.links_in.lock().retain(|k| *k != key);
                    target.touch();
                }
                for item in &info {
                    self.remove_info_ref(*item, &key);
                }
                self.remove_meaning_ref(&key);
                events.push(ChangeEvent::Link(LinkEvent::FromLinkRemoved(key)));
                events.push(ChangeEvent::Link(LinkEvent::ToLinkRemoved(key)));
                Ok(true)
            },
        )
    }

    /// Point an existing link at a new target, keeping its info list.
    ///
    /// Returns the new identity triple.
    pub fn change_link_to(&self, link: LinkKey, new_to: NodeId) -> Result<LinkKey, BrainError> {
        let new_key = LinkKey::new(link.from, new_to, link.meaning);
        self.locked_stable(
            link.from,
            || self.link_info_snapshot(&link),
            |info| {
                let mut batch = LockBatch::new();
                batch
                    .write(link.from, Aspect::LinksOut)
                    .write(link.from, Aspect::Info)
                    .write(link.to, Aspect::LinksIn)
                    .write(new_to, Aspect::LinksIn);
                if tracks_meaning(link.meaning) {
                    batch.write(link.meaning, Aspect::Info);
                }
                for item in info.iter().flatten() {
                    batch.write(*item, Aspect::Info);
                }
                batch
            },
            |info, events| {
                let info = info.ok_or(BrainError::LinkNotFound(link))?;
                let source = self.record(link.from)?;
                let new_target = self.record(new_to)?;
                if new_key == link {
                    return Ok(link);
                }
                if source.find_out(&new_key).is_some() {
                    return Err(BrainError::LinkExists(new_key));
                }

                if let Some(out) = source.links_out.lock().iter_mut().find(|o| o.is(&link)) {
                    out.to = new_to;
                }
                if let Some(old_target) = self.try_record(link.to) {
                    old_target.links_in.lock().retain(|k| *k != link);
                    old_target.touch();
                }
                new_target.links_in.lock().push(new_key);
                self.rekey_info_refs(&info, &link, new_key);
                self.rekey_meaning_ref(&link, new_key);
                source.touch();
                new_target.touch();

                events.push(ChangeEvent::Link(LinkEvent::ToLinkRemoved(link)));
                events.push(ChangeEvent::Link(LinkEvent::ToChanged { link, new_to }));
                events.push(ChangeEvent::Link(LinkEvent::ToLinkCreated(new_key)));
                Ok(new_key)
            },
        )
    }

    /// Move an existing link to a new source, keeping its info list.
    ///
    /// Returns the new identity triple.
    pub fn change_link_from(
        &self,
        link: LinkKey,
        new_from: NodeId,
    ) -> Result<LinkKey, BrainError> {
        let new_key = LinkKey::new(new_from, link.to, link.meaning);
        self.locked_stable(
            link.from,
            || self.link_info_snapshot(&link),
            |info| {
                let mut batch = LockBatch::new();
                batch
                    .write(link.from, Aspect::LinksOut)
                    .write(link.from, Aspect::Info)
                    .write(new_from, Aspect::LinksOut)
                    .write(new_from, Aspect::Info)
                    .write(link.to, Aspect::LinksIn);
                if tracks_meaning(link.meaning) {
                    batch.write(link.meaning, Aspect::Info);
                }
                for item in info.iter().flatten() {
                    batch.write(*item, Aspect::Info);
                }
                batch
            },
            |info, events| {
                let info = info.ok_or(BrainError::LinkNotFound(link))?;
                let source = self.record(link.from)?;
                let new_source = self.record(new_from)?;
                if new_key == link {
                    return Ok(link);
                }
                if new_source.find_out(&new_key).is_some() {
                    return Err(BrainError::LinkExists(new_key));
                }

                let moved = {
                    let mut out = source.links_out.lock();
                    let pos = out.iter().position(|o| o.is(&link));
                    pos.map(|pos| out.remove(pos))
                };
                let moved = moved.ok_or(BrainError::LinkNotFound(link))?;
                new_source.links_out.lock().push(moved);
                if let Some(target) = self.try_record(link.to) {
                    replace_one(&mut target.links_in.lock(), &link, new_key);
                    target.touch();
                }
                self.rekey_info_refs(&info, &link, new_key);
                self.rekey_meaning_ref(&link, new_key);
                source.touch();
                new_source.touch();

                events.push(ChangeEvent::Link(LinkEvent::FromLinkRemoved(link)));
                events.push(ChangeEvent::Link(LinkEvent::ToLinkRemoved(link)));
                events.push(ChangeEvent::Link(LinkEvent::FromLinkCreated(new_key)));
                events.push(ChangeEvent::Link(LinkEvent::ToLinkCreated(new_key)));
                Ok(new_key)
            },
        )
    }

    /// Identity triples of the node's outgoing links, in creation order.
    pub fn links_out(&self, id: NodeId) -> Result<Vec<LinkKey>, BrainError> {
        let mut batch = LockBatch::new();
        batch.read(id, Aspect::LinksOut);
        self.locked(batch, |_| {
            let record = self.record(id)?;
            let out = record.links_out.lock();
            Ok(out.iter().map(|o| o.key(id)).collect())
        })
    }

    /// Identity triples of the node's incoming links, in creation order.
    pub fn links_in(&self, id: NodeId) -> Result<Vec<LinkKey>, BrainError> {
        let mut batch = LockBatch::new();
        batch.read(id, Aspect::LinksIn);
        self.locked(batch, |_| Ok(self.record(id)?.links_in.lock().clone()))
    }

    // =========================================================================
    // LINK INFO
    // =========================================================================

    /// Copy of a link's info list.
    pub fn link_info(&self, link: LinkKey) -> Result<Vec<NodeId>, BrainError> {
        let mut batch = LockBatch::new();
        batch.read(link.from, Aspect::LinksOut).read(link.from, Aspect::Info);
        self.locked(batch, |_| {
            self.link_info_snapshot(&link)?
                .ok_or(BrainError::LinkNotFound(link))
        })
    }

    /// Append `item` to a link's info list.
    pub fn add_link_info(&self, link: LinkKey, item: NodeId) -> Result<(), BrainError> {
        let mut batch = LockBatch::new();
        batch
            .read(link.from, Aspect::LinksOut)
            .write(link.from, Aspect::Info)
            .write(item, Aspect::Info);
        self.locked(batch, |events| {
            let source = self.record(link.from)?;
            let entry = self.record(item)?;
            let index = {
                let mut out = source.links_out.lock();
                let target = out
                    .iter_mut()
                    .find(|o| o.is(&link))
                    .ok_or(BrainError::LinkNotFound(link))?;
                target.info.push(item);
                target.info.len() - 1
            };
            entry.info_refs.lock().push(link);
            source.touch();
            events.push(ChangeEvent::inserted(ListOwner::Info(link), index, item));
            Ok(())
        })
    }

    /// Remove the first occurrence of `item` from a link's info list.
    pub fn remove_link_info(&self, link: LinkKey, item: NodeId) -> Result<bool, BrainError> {
        let mut batch = LockBatch::new();
        batch
            .read(link.from, Aspect::LinksOut)
            .write(link.from, Aspect::Info)
            .write(item, Aspect::Info);
        self.locked(batch, |events| {
            let source = self.record(link.from)?;
            let removed = {
                let mut out = source.links_out.lock();
                let target = out
                    .iter_mut()
                    .find(|o| o.is(&link))
                    .ok_or(BrainError::LinkNotFound(link))?;
                remove_one(&mut target.info, &item)
            };
            let Some(index) = removed else {
                return Ok(false);
            };
            self.remove_info_ref(item, &link);
            source.touch();
            events.push(ChangeEvent::list_removed(ListOwner::Info(link), index, item));
            Ok(true)
        })
    }

    // =========================================================================
    // CLUSTER CHILDREN
    // =========================================================================

    /// Copy of the cluster's child sequence, taken under one read lock.
    pub fn children(&self, cluster: NodeId) -> Result<Vec<NodeId>, BrainError> {
        let mut out = Vec::new();
        self.children_into(cluster, &mut out)?;
        Ok(out)
    }

    /// Append the cluster's children to `out`.
    pub fn children_into(&self, cluster: NodeId, out: &mut Vec<NodeId>) -> Result<(), BrainError> {
        let mut batch = LockBatch::new();
        batch.read(cluster, Aspect::Children);
        self.locked(batch, |_| {
            let record = self.cluster(cluster)?;
            out.extend_from_slice(&record.children.lock());
            Ok(())
        })
    }

    /// Children snapshot in a pooled buffer.
    pub fn children_pooled(&self, cluster: NodeId) -> Result<PooledList<'_>, BrainError> {
        let mut list = self.pool.scoped();
        self.children_into(cluster, &mut list)?;
        Ok(list)
    }

    /// Append `child` to the cluster.
    pub fn insert_child(&self, cluster: NodeId, child: NodeId) -> Result<(), BrainError> {
        self.insert_child_inner(cluster, None, child)
    }

    /// Insert `child` at `index` (`index == len` appends).
    pub fn insert_child_at(
        &self,
        cluster: NodeId,
        index: usize,
        child: NodeId,
    ) -> Result<(), BrainError> {
        self.insert_child_inner(cluster, Some(index), child)
    }

    fn insert_child_inner(
        &self,
        cluster: NodeId,
        index: Option<usize>,
        child: NodeId,
    ) -> Result<(), BrainError> {
        let mut batch = LockBatch::new();
        batch
            .write(cluster, Aspect::Children)
            .write(child, Aspect::Parents);
        self.locked(batch, |events| {
            let owner = self.cluster(cluster)?;
            let item = self.record(child)?;
            let index = {
                let mut children = owner.children.lock();
                let len = children.len();
                let index = index.unwrap_or(len);
                if index > len {
                    return Err(BrainError::IndexOutOfRange {
                        node: cluster,
                        index,
                        len,
                    });
                }
                children.insert(index, child);
                index
            };
            item.parents.lock().push(cluster);
            owner.touch();
            item.touch();
            events.push(ChangeEvent::inserted(ListOwner::Children(cluster), index, child));
            Ok(())
        })
    }

    /// Remove the first occurrence of `child`. `Ok(false)` if absent.
    pub fn remove_child(&self, cluster: NodeId, child: NodeId) -> Result<bool, BrainError> {
        let mut batch = LockBatch::new();
        batch
            .write(cluster, Aspect::Children)
            .write(child, Aspect::Parents);
        self.locked(batch, |events| {
            let owner = self.cluster(cluster)?;
            let Some(index) = remove_one(&mut owner.children.lock(), &child) else {
                return Ok(false);
            };
            if let Some(item) = self.try_record(child) {
                remove_one(&mut item.parents.lock(), &cluster);
                item.touch();
            }
            owner.touch();
            events.push(ChangeEvent::list_removed(
                ListOwner::Children(cluster),
                index,
                child,
            ));
            Ok(true)
        })
    }

    /// Remove and return the child at `index`.
    pub fn remove_child_at(&self, cluster: NodeId, index: usize) -> Result<NodeId, BrainError> {
        self.locked_stable(
            cluster,
            || self.peek_child(cluster, index),
            |child| {
                let mut batch = LockBatch::new();
                batch
                    .write(cluster, Aspect::Children)
                    .write(*child, Aspect::Parents);
                batch
            },
            |child, events| {
                let owner = self.cluster(cluster)?;
                owner.children.lock().remove(index);
                if let Some(item) = self.try_record(child) {
                    remove_one(&mut item.parents.lock(), &cluster);
                    item.touch();
                }
                owner.touch();
                events.push(ChangeEvent::list_removed(
                    ListOwner::Children(cluster),
                    index,
                    child,
                ));
                Ok(child)
            },
        )
    }

    /// Replace the first occurrence of `old` with `new`, in place.
    /// `Ok(false)` if `old` is not a child.
    pub fn replace_child(
        &self,
        cluster: NodeId,
        old: NodeId,
        new: NodeId,
    ) -> Result<bool, BrainError> {
        let mut batch = LockBatch::new();
        batch
            .write(cluster, Aspect::Children)
            .write(old, Aspect::Parents)
            .write(new, Aspect::Parents);
        self.locked(batch, |events| {
            let owner = self.cluster(cluster)?;
            let replacement = self.record(new)?;
            let index = {
                let mut children = owner.children.lock();
                let Some(index) = children.iter().position(|c| *c == old) else {
                    return Ok(false);
                };
                if old == new {
                    return Ok(true);
                }
                children[index] = new;
                index
            };
            if let Some(previous) = self.try_record(old) {
                remove_one(&mut previous.parents.lock(), &cluster);
                previous.touch();
            }
            replacement.parents.lock().push(cluster);
            replacement.touch();
            owner.touch();
            let owner_list = ListOwner::Children(cluster);
            events.push(ChangeEvent::list_removed(owner_list, index, old));
            events.push(ChangeEvent::inserted(owner_list, index, new));
            Ok(true)
        })
    }

    /// Move the child at `from_index` so it ends up at `to_index`.
    pub fn move_child(
        &self,
        cluster: NodeId,
        from_index: usize,
        to_index: usize,
    ) -> Result<(), BrainError> {
        let mut batch = LockBatch::new();
        batch.write(cluster, Aspect::Children);
        self.locked(batch, |events| {
            let owner = self.cluster(cluster)?;
            let item = {
                let mut children = owner.children.lock();
                let len = children.len();
                for index in [from_index, to_index] {
                    if index >= len {
                        return Err(BrainError::IndexOutOfRange {
                            node: cluster,
                            index,
                            len,
                        });
                    }
                }
                if from_index == to_index {
                    return Ok(());
                }
                let item = children.remove(from_index);
                children.insert(to_index, item);
                item
            };
            owner.touch();
            let owner_list = ListOwner::Children(cluster);
            events.push(ChangeEvent::list_removed(owner_list, from_index, item));
            events.push(ChangeEvent::inserted(owner_list, to_index, item));
            Ok(())
        })
    }

    /// Remove every child. Returns how many were removed.
    pub fn clear_children(&self, cluster: NodeId) -> Result<usize, BrainError> {
        self.locked_stable(
            cluster,
            || Ok(self.cluster(cluster)?.children.lock().clone()),
            |children| {
                let mut batch = LockBatch::new();
                batch.write(cluster, Aspect::Children);
                for child in children {
                    batch.write(*child, Aspect::Parents);
                }
                batch
            },
            |children, events| {
                let owner = self.cluster(cluster)?;
                owner.children.lock().clear();
                owner.touch();
                for (index, child) in children.iter().enumerate().rev() {
                    if let Some(item) = self.try_record(*child) {
                        remove_one(&mut item.parents.lock(), &cluster);
                        item.touch();
                    }
                    events.push(ChangeEvent::list_removed(
                        ListOwner::Children(cluster),
                        index,
                        *child,
                    ));
                }
                Ok(children.len())
            },
        )
    }

    fn peek_child(&self, cluster: NodeId, index: usize) -> Result<NodeId, BrainError> {
        let children = self.cluster(cluster)?.children.lock().clone();
        children
            .get(index)
            .copied()
            .ok_or(BrainError::IndexOutOfRange {
                node: cluster,
                index,
                len: children.len(),
            })
    }

    /// The child at `index`.
    pub fn child_at(&self, cluster: NodeId, index: usize) -> Result<NodeId, BrainError> {
        let mut batch = LockBatch::new();
        batch.read(cluster, Aspect::Children);
        self.locked(batch, |_| self.peek_child(cluster, index))
    }

    /// Position of the first occurrence of `child`.
    pub fn index_of_child(
        &self,
        cluster: NodeId,
        child: NodeId,
    ) -> Result<Option<usize>, BrainError> {
        let mut batch = LockBatch::new();
        batch.read(cluster, Aspect::Children);
        self.locked(batch, |_| {
            let owner = self.cluster(cluster)?;
            let position = owner.children.lock().iter().position(|c| *c == child);
            Ok(position)
        })
    }

    pub fn child_count(&self, cluster: NodeId) -> Result<usize, BrainError> {
        let mut batch = LockBatch::new();
        batch.read(cluster, Aspect::Children);
        self.locked(batch, |_| Ok(self.cluster(cluster)?.children.lock().len()))
    }

    /// How many times `child` occurs in the cluster.
    pub fn child_occurrences(&self, cluster: NodeId, child: NodeId) -> Result<usize, BrainError> {
        let mut batch = LockBatch::new();
        batch.read(cluster, Aspect::Children);
        self.locked(batch, |_| {
            let owner = self.cluster(cluster)?;
            let count = owner.children.lock().iter().filter(|c| **c == child).count();
            Ok(count)
        })
    }

    // =========================================================================
    // PARENTS
    // =========================================================================

    /// Clusters that own `id`, one entry per occurrence.
    pub fn parents(&self, id: NodeId) -> Result<Vec<NodeId>, BrainError> {
        let mut batch = LockBatch::new();
        batch.read(id, Aspect::Parents);
        self.locked(batch, |_| Ok(self.record(id)?.parents.lock().clone()))
    }

    /// Make `cluster` own `id` (appends `id` to its children).
    pub fn set_parent(&self, id: NodeId, cluster: NodeId) -> Result<(), BrainError> {
        self.insert_child(cluster, id)
    }

    /// Move `id` from `old_cluster` to the end of `new_cluster`.
    /// `Ok(false)` if `id` is not a child of `old_cluster`.
    pub fn replace_parent(
        &self,
        id: NodeId,
        old_cluster: NodeId,
        new_cluster: NodeId,
    ) -> Result<bool, BrainError> {
        let mut batch = LockBatch::new();
        batch
            .write(id, Aspect::Parents)
            .write(old_cluster, Aspect::Children)
            .write(new_cluster, Aspect::Children);
        self.locked(batch, |events| {
            let item = self.record(id)?;
            let old = self.cluster(old_cluster)?;
            let new = self.cluster(new_cluster)?;
            if !old.children.lock().contains(&id) {
                return Ok(false);
            }
            if old_cluster == new_cluster {
                return Ok(true);
            }

            let Some(removed_at) = remove_one(&mut old.children.lock(), &id) else {
                return Ok(false);
            };
            let inserted_at = {
                let mut children = new.children.lock();
                children.push(id);
                children.len() - 1
            };
            replace_one(&mut item.parents.lock(), &old_cluster, new_cluster);
            item.touch();
            old.touch();
            new.touch();
            events.push(ChangeEvent::list_removed(
                ListOwner::Children(old_cluster),
                removed_at,
                id,
            ));
            events.push(ChangeEvent::inserted(
                ListOwner::Children(new_cluster),
                inserted_at,
                id,
            ));
            Ok(true)
        })
    }

    // =========================================================================
    // VALUES
    // =========================================================================

    /// Copy of the node's payload.
    pub fn value(&self, id: NodeId) -> Result<Value, BrainError> {
        let mut batch = LockBatch::new();
        batch.read(id, Aspect::Value);
        self.locked(batch, |_| Ok(self.record(id)?.value.lock().clone()))
    }

    /// Replace the node's payload. The payload must fit the node's kind.
    pub fn set_value(&self, id: NodeId, value: Value) -> Result<(), BrainError> {
        if is_predefined(id) {
            return Err(BrainError::Predefined(id));
        }
        let mut batch = LockBatch::new();
        batch.write(id, Aspect::Value);
        self.locked(batch, |events| {
            let record = self.record(id)?;
            if !value.fits(record.kind) {
                return Err(BrainError::KindMismatch {
                    node: id,
                    expected: value.describe(),
                    found: record.kind,
                });
            }
            let old = std::mem::replace(&mut *record.value.lock(), value.clone());
            record.touch();
            if old != value {
                events.push(ChangeEvent::Node(NodeEvent::Changed {
                    id,
                    old,
                    new: value,
                }));
            }
            Ok(())
        })
    }

    pub fn int_value(&self, id: NodeId) -> Result<i64, BrainError> {
        match self.value(id)? {
            Value::Int(v) => Ok(v),
            _ => Err(self.mismatch(id, "int")),
        }
    }

    pub fn double_value(&self, id: NodeId) -> Result<f64, BrainError> {
        match self.value(id)? {
            Value::Double(v) => Ok(v),
            _ => Err(self.mismatch(id, "double")),
        }
    }

    pub fn text_value(&self, id: NodeId) -> Result<String, BrainError> {
        match self.value(id)? {
            Value::Text(v) => Ok(v),
            _ => Err(self.mismatch(id, "text")),
        }
    }

    /// The meaning of a cluster.
    pub fn meaning_of(&self, cluster: NodeId) -> Result<NodeId, BrainError> {
        self.cluster(cluster)?;
        match self.value(cluster)? {
            Value::Meaning(meaning) => Ok(meaning),
            _ => Err(self.mismatch(cluster, "meaning")),
        }
    }

    pub fn set_meaning(&self, cluster: NodeId, meaning: NodeId) -> Result<(), BrainError> {
        self.cluster(cluster)?;
        self.record(meaning)?;
        self.set_value(cluster, Value::Meaning(meaning))
    }

    fn mismatch(&self, id: NodeId, expected: &'static str) -> BrainError {
        match self.try_record(id) {
            Some(record) => BrainError::KindMismatch {
                node: id,
                expected,
                found: record.kind,
            },
            None => BrainError::NodeNotFound(id),
        }
    }

    // =========================================================================
    // FLAGS & MODULE REFERENCES
    // =========================================================================

    /// Set the dirty flag.
    pub fn mark_changed(&self, id: NodeId) -> Result<(), BrainError> {
        self.record(id)?.touch();
        Ok(())
    }

    pub fn is_changed(&self, id: NodeId) -> Result<bool, BrainError> {
        Ok(self.record(id)?.changed.load(Ordering::Acquire))
    }

    /// Clear the dirty flag, returning its previous state.
    pub fn clear_changed(&self, id: NodeId) -> Result<bool, BrainError> {
        Ok(self.record(id)?.changed.swap(false, Ordering::AcqRel))
    }

    /// Register one more owning module. Returns the new count.
    pub fn add_module_ref(&self, id: NodeId) -> Result<u32, BrainError> {
        let record = self.record(id)?;
        Ok(record.module_refs.fetch_add(1, Ordering::AcqRel).saturating_add(1))
    }

    /// Drop one owning module. Returns the new count.
    pub fn release_module_ref(&self, id: NodeId) -> Result<u32, BrainError> {
        let record = self.record(id)?;
        match record
            .module_refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => Ok(previous - 1),
            Err(_) => {
                tracing::warn!(node = %id, "module reference released below zero");
                Ok(0)
            }
        }
    }

    pub fn module_ref_count(&self, id: NodeId) -> Result<u32, BrainError> {
        Ok(self.record(id)?.module_refs())
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    /// Kind of a live node. Kinds never change, so no lock is taken.
    pub fn kind(&self, id: NodeId) -> Result<NodeKind, BrainError> {
        Ok(self.record(id)?.kind)
    }

    #[must_use]
    pub fn exists(&self, id: NodeId) -> bool {
        self.nodes.read().contains_key(&id)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Ids of all live nodes in ascending order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.read().keys().copied().collect()
    }

    /// Number of links. Unlocked, so only exact while the Brain is quiet.
    #[must_use]
    pub fn link_count(&self) -> usize {
        let records: Vec<Arc<NodeRecord>> = self.nodes.read().values().cloned().collect();
        records.iter().map(|r| r.links_out.lock().len()).sum()
    }

    #[must_use]
    pub fn stats(&self) -> BrainStats {
        BrainStats {
            nodes: self.node_count(),
            links: self.link_count(),
            temps: self.temps.len(),
            locks: self.locks.stats(),
            pool: self.pool.stats(),
            bus: self.bus.stats(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{GROUP, VALUE};

    fn brain() -> Brain {
        Brain::default()
    }

    fn cluster(brain: &Brain) -> NodeId {
        brain.create(NodeData::Cluster { meaning: GROUP })
    }

    #[test]
    fn create_assigns_fresh_ids_after_predefined_range() {
        let brain = brain();
        let a = brain.create(NodeData::Neuron);
        let b = brain.create(NodeData::Int(4));
        assert_eq!(a, NodeId(FIRST_DYNAMIC_ID));
        assert!(b > a);
        assert_eq!(brain.kind(b).expect("kind"), NodeKind::Int);
        assert!(brain.is_changed(a).expect("flag"));
    }

    #[test]
    fn predefined_nodes_are_installed_frozen() {
        let brain = brain();
        let group = brain.try_record(GROUP).expect("group");
        assert!(group.is_frozen());
        assert!(!brain.is_changed(GROUP).expect("flag"));
        assert!(matches!(brain.delete(GROUP), Err(BrainError::Predefined(_))));
    }

    #[test]
    fn set_link_is_unique_per_triple() {
        let brain = brain();
        let a = brain.create(NodeData::Neuron);
        let b = brain.create(NodeData::Neuron);
        assert!(brain.set_link(a, b, VALUE).expect("first"));
        assert!(!brain.set_link(a, b, VALUE).expect("second"));
        assert_eq!(brain.links_out(a).expect("out").len(), 1);
        assert_eq!(brain.links_in(b).expect("in").len(), 1);

        assert!(brain.remove_link(a, b, VALUE).expect("remove"));
        assert!(!brain.remove_link(a, b, VALUE).expect("remove again"));
        assert!(brain.find_link(a, b, VALUE).expect("find").is_none());
    }

    #[test]
    fn set_link_requires_live_endpoints() {
        let brain = brain();
        let a = brain.create(NodeData::Neuron);
        let result = brain.set_link(a, NodeId(99_999), VALUE);
        assert_eq!(result, Err(BrainError::NodeNotFound(NodeId(99_999))));
        assert!(brain.links_out(a).expect("out").is_empty());
    }

    #[test]
    fn move_child_reorders() {
        let brain = brain();
        let c = cluster(&brain);
        let a = brain.create(NodeData::Neuron);
        let b = brain.create(NodeData::Neuron);
        brain.insert_child(c, a).expect("a");
        brain.insert_child(c, b).expect("b");
        brain.move_child(c, 0, 1).expect("move");
        assert_eq!(brain.children(c).expect("children"), vec![b, a]);
    }

    #[test]
    fn invalid_index_does_not_corrupt() {
        let brain = brain();
        let c = cluster(&brain);
        let a = brain.create(NodeData::Neuron);
        brain.insert_child(c, a).expect("insert");

        let err = brain.move_child(c, 0, 3).expect_err("out of range");
        assert_eq!(
            err,
            BrainError::IndexOutOfRange {
                node: c,
                index: 3,
                len: 1
            }
        );
        assert!(brain.insert_child_at(c, 5, a).is_err());
        assert!(brain.remove_child_at(c, 1).is_err());
        assert_eq!(brain.children(c).expect("children"), vec![a]);
        assert_eq!(brain.parents(a).expect("parents"), vec![c]);
    }

    #[test]
    fn child_ops_require_cluster() {
        let brain = brain();
        let n = brain.create(NodeData::Neuron);
        let a = brain.create(NodeData::Neuron);
        assert_eq!(brain.insert_child(n, a), Err(BrainError::NotACluster(n)));
        assert!(brain.parents(a).expect("parents").is_empty());
    }

    #[test]
    fn duplicates_are_allowed_and_counted() {
        let brain = brain();
        let c = cluster(&brain);
        let a = brain.create(NodeData::Neuron);
        brain.insert_child(c, a).expect("one");
        brain.insert_child(c, a).expect("two");
        assert_eq!(brain.child_occurrences(c, a).expect("count"), 2);
        assert_eq!(brain.parents(a).expect("parents"), vec![c, c]);

        assert!(brain.remove_child(c, a).expect("remove"));
        assert_eq!(brain.child_occurrences(c, a).expect("count"), 1);
        assert_eq!(brain.parents(a).expect("parents"), vec![c]);
    }

    #[test]
    fn replace_child_keeps_position() {
        let brain = brain();
        let c = cluster(&brain);
        let a = brain.create(NodeData::Neuron);
        let b = brain.create(NodeData::Neuron);
        let x = brain.create(NodeData::Neuron);
        brain.insert_child(c, a).expect("a");
        brain.insert_child(c, b).expect("b");

        assert!(brain.replace_child(c, a, x).expect("replace"));
        assert_eq!(brain.children(c).expect("children"), vec![x, b]);
        assert!(brain.parents(a).expect("a parents").is_empty());
        assert_eq!(brain.parents(x).expect("x parents"), vec![c]);
        assert!(!brain.replace_child(c, a, x).expect("absent"));
    }

    #[test]
    fn replace_parent_moves_membership() {
        let brain = brain();
        let c1 = cluster(&brain);
        let c2 = cluster(&brain);
        let a = brain.create(NodeData::Neuron);
        brain.set_parent(a, c1).expect("set parent");

        assert!(brain.replace_parent(a, c1, c2).expect("replace"));
        assert!(brain.children(c1).expect("c1").is_empty());
        assert_eq!(brain.children(c2).expect("c2"), vec![a]);
        assert_eq!(brain.parents(a).expect("parents"), vec![c2]);
    }

    #[test]
    fn delete_cascades() {
        let brain = brain();
        let c = cluster(&brain);
        let a = brain.create(NodeData::Neuron);
        let b = brain.create(NodeData::Neuron);
        brain.insert_child(c, a).expect("a");
        brain.insert_child(c, b).expect("b");
        brain.set_link(a, b, VALUE).expect("a->b");
        brain.set_link(b, a, VALUE).expect("b->a");
        let kept = LinkKey::new(b, c, VALUE);
        brain.set_link(b, c, VALUE).expect("b->c");
        brain.add_link_info(kept, a).expect("info");

        assert!(brain.delete(a).expect("delete"));
        assert!(!brain.exists(a));
        assert_eq!(brain.children(c).expect("children"), vec![b]);
        assert_eq!(brain.links_out(b).expect("out"), vec![kept]);
        assert!(brain.links_in(b).expect("in").is_empty());
        assert!(brain.link_info(kept).expect("info").is_empty());
        assert!(!brain.delete(a).expect("second delete"));
    }

    #[test]
    fn delete_cluster_releases_children() {
        let brain = brain();
        let c = cluster(&brain);
        let a = brain.create(NodeData::Neuron);
        brain.insert_child(c, a).expect("insert");
        brain.delete(c).expect("delete");
        assert!(brain.parents(a).expect("parents").is_empty());
    }

    #[test]
    fn change_link_to_keeps_info_and_identity_rule() {
        let brain = brain();
        let a = brain.create(NodeData::Neuron);
        let b = brain.create(NodeData::Neuron);
        let c = brain.create(NodeData::Neuron);
        let i = brain.create(NodeData::Neuron);
        let key = LinkKey::new(a, b, VALUE);
        brain.set_link(a, b, VALUE).expect("link");
        brain.add_link_info(key, i).expect("info");

        let moved = brain.change_link_to(key, c).expect("change");
        assert_eq!(moved, LinkKey::new(a, c, VALUE));
        assert_eq!(brain.link_info(moved).expect("info"), vec![i]);
        assert!(brain.links_in(b).expect("b in").is_empty());
        assert_eq!(brain.links_in(c).expect("c in"), vec![moved]);

        brain.set_link(a, b, VALUE).expect("relink");
        let clash = brain.change_link_to(LinkKey::new(a, b, VALUE), c);
        assert_eq!(clash, Err(BrainError::LinkExists(moved)));

        // info back-reference follows the new key
        brain.delete(i).expect("delete info");
        assert!(brain.link_info(moved).expect("info").is_empty());
    }

    #[test]
    fn change_link_from_moves_source() {
        let brain = brain();
        let a = brain.create(NodeData::Neuron);
        let b = brain.create(NodeData::Neuron);
        let z = brain.create(NodeData::Neuron);
        brain.set_link(a, b, VALUE).expect("link");

        let moved = brain
            .change_link_from(LinkKey::new(a, b, VALUE), z)
            .expect("change");
        assert_eq!(moved, LinkKey::new(z, b, VALUE));
        assert!(brain.links_out(a).expect("a out").is_empty());
        assert_eq!(brain.links_out(z).expect("z out"), vec![moved]);
        assert_eq!(brain.links_in(b).expect("b in"), vec![moved]);
    }

    #[test]
    fn set_value_checks_kind_and_reports_change() {
        let brain = brain();
        let n = brain.create(NodeData::Int(1));
        brain.set_value(n, Value::Int(2)).expect("set");
        assert_eq!(brain.int_value(n).expect("int"), 2);

        let err = brain.set_value(n, Value::Text("x".into())).expect_err("mismatch");
        assert!(matches!(err, BrainError::KindMismatch { .. }));
        assert!(matches!(
            brain.double_value(n),
            Err(BrainError::KindMismatch { .. })
        ));
    }

    #[test]
    fn module_refs_saturate_at_zero() {
        let brain = brain();
        let n = brain.create(NodeData::Neuron);
        assert_eq!(brain.add_module_ref(n).expect("add"), 1);
        assert_eq!(brain.release_module_ref(n).expect("release"), 0);
        assert_eq!(brain.release_module_ref(n).expect("release"), 0);
    }

    #[test]
    fn clear_changed_returns_previous_state() {
        let brain = brain();
        let n = brain.create(NodeData::Neuron);
        assert!(brain.clear_changed(n).expect("clear"));
        assert!(!brain.is_changed(n).expect("flag"));
        brain.mark_changed(n).expect("mark");
        assert!(brain.is_changed(n).expect("flag"));
    }

    #[test]
    fn stats_count_links() {
        let brain = brain();
        let base = brain.node_count();
        let a = brain.create(NodeData::Neuron);
        let b = brain.create(NodeData::Neuron);
        brain.set_link(a, b, VALUE).expect("link");
        let stats = brain.stats();
        assert_eq!(stats.nodes, base + 2);
        assert_eq!(stats.links, 1);
        assert_eq!(stats.locks.acquired, stats.locks.released);
    }

    fn meaning_uses(brain: &Brain, meaning: NodeId) -> Vec<LinkKey> {
        let record = brain.try_record(meaning).expect("meaning");
        record.meaning_refs.lock().clone()
    }

    #[test]
    fn deleting_a_meaning_removes_links_that_use_it() {
        let brain = brain();
        let a = brain.create(NodeData::Neuron);
        let b = brain.create(NodeData::Neuron);
        let meaning = brain.create(NodeData::Neuron);
        let item = brain.create(NodeData::Neuron);
        brain.set_link(a, b, meaning).expect("link");
        brain
            .add_link_info(LinkKey::new(a, b, meaning), item)
            .expect("info");

        assert!(brain.delete(meaning).expect("delete"));
        assert!(brain.links_out(a).expect("out").is_empty());
        assert!(brain.links_in(b).expect("in").is_empty());
        assert_eq!(brain.link_count(), 0);
        assert!(brain.exists(item));
        let item = brain.try_record(item).expect("item");
        assert!(item.info_refs.lock().is_empty());
    }

    #[test]
    fn meaning_uses_follow_link_edits() {
        let brain = brain();
        let a = brain.create(NodeData::Neuron);
        let b = brain.create(NodeData::Neuron);
        let c = brain.create(NodeData::Neuron);
        let meaning = brain.create(NodeData::Neuron);

        brain.set_link(a, b, meaning).expect("link");
        assert_eq!(meaning_uses(&brain, meaning), vec![LinkKey::new(a, b, meaning)]);

        let moved = brain
            .change_link_to(LinkKey::new(a, b, meaning), c)
            .expect("change");
        assert_eq!(meaning_uses(&brain, meaning), vec![moved]);

        assert!(brain.remove_link(a, c, meaning).expect("remove"));
        assert!(meaning_uses(&brain, meaning).is_empty());

        brain.set_link(a, b, meaning).expect("link");
        assert!(brain.delete(a).expect("delete source"));
        assert!(meaning_uses(&brain, meaning).is_empty());
    }

    #[test]
    fn predefined_meanings_are_not_indexed() {
        let brain = brain();
        let a = brain.create(NodeData::Neuron);
        let b = brain.create(NodeData::Neuron);
        brain.set_link(a, b, VALUE).expect("link");
        assert!(meaning_uses(&brain, VALUE).is_empty());
    }
}
