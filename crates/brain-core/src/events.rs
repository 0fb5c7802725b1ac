//! # Change Notification Bus
//!
//! Every durable mutation of the Brain is turned into typed `ChangeEvent`s
//! and delivered to the observers registered for the affected node, then to
//! the "any node" observers.
//!
//! ## Delivery Rules
//!
//! - Synchronous, on the mutating thread, after the mutation's locks are
//!   released (so observers may read or write the Brain)
//! - In the order the sub-changes happened
//! - Registrations are owned by their `ObserverHandle`; a dropped or
//!   unregistered handle is skipped at delivery time, never an error
//! - Per-node registrations are purged after that node's `Removed` event
//!
//! Re-dispatching onto another execution context is the observer's job;
//! `ChannelObserver` is the stock way to hand events to another thread.

use crate::{LinkKey, NodeId, Value};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;

// =============================================================================
// EVENTS
// =============================================================================

/// Node lifecycle and value changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NodeEvent {
    Created { id: NodeId },
    Changed { id: NodeId, old: Value, new: Value },
    Removed { id: NodeId },
}

/// Link changes, split by the endpoint whose observers receive them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LinkEvent {
    /// Delivered to observers of `link.from`.
    FromLinkCreated(LinkKey),
    /// Delivered to observers of `link.from`.
    FromLinkRemoved(LinkKey),
    /// The link's target moved to `new_to`. Delivered to observers of `link.from`.
    ToChanged { link: LinkKey, new_to: NodeId },
    /// Delivered to observers of `link.to`.
    ToLinkCreated(LinkKey),
    /// Delivered to observers of `link.to`.
    ToLinkRemoved(LinkKey),
}

/// The ordered list an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ListOwner {
    /// Child sequence of a cluster.
    Children(NodeId),
    /// Info list of a link.
    Info(LinkKey),
}

impl ListOwner {
    fn subject(self) -> NodeId {
        match self {
            ListOwner::Children(cluster) => cluster,
            ListOwner::Info(link) => link.from,
        }
    }
}

/// Ordered list edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ListEvent {
    Inserted {
        owner: ListOwner,
        index: usize,
        item: NodeId,
    },
    Removed {
        owner: ListOwner,
        index: usize,
        item: NodeId,
    },
}

/// Any change published by the Brain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ChangeEvent {
    Node(NodeEvent),
    Link(LinkEvent),
    List(ListEvent),
}

impl ChangeEvent {
    /// The node whose observers receive this event.
    #[must_use]
    pub fn subject(&self) -> NodeId {
        match self {
            ChangeEvent::Node(
                NodeEvent::Created { id } | NodeEvent::Changed { id, .. } | NodeEvent::Removed { id },
            ) => *id,
            ChangeEvent::Link(
                LinkEvent::FromLinkCreated(link)
                | LinkEvent::FromLinkRemoved(link)
                | LinkEvent::ToChanged { link, .. },
            ) => link.from,
            ChangeEvent::Link(LinkEvent::ToLinkCreated(link) | LinkEvent::ToLinkRemoved(link)) => {
                link.to
            }
            ChangeEvent::List(
                ListEvent::Inserted { owner, .. } | ListEvent::Removed { owner, .. },
            ) => owner.subject(),
        }
    }

    /// Shorthand constructors used by the graph store.
    pub(crate) fn created(id: NodeId) -> Self {
        ChangeEvent::Node(NodeEvent::Created { id })
    }

    pub(crate) fn removed(id: NodeId) -> Self {
        ChangeEvent::Node(NodeEvent::Removed { id })
    }

    pub(crate) fn inserted(owner: ListOwner, index: usize, item: NodeId) -> Self {
        ChangeEvent::List(ListEvent::Inserted { owner, index, item })
    }

    pub(crate) fn list_removed(owner: ListOwner, index: usize, item: NodeId) -> Self {
        ChangeEvent::List(ListEvent::Removed { owner, index, item })
    }
}

// =============================================================================
// OBSERVERS
// =============================================================================

/// Receives change events.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &ChangeEvent);
}

impl<F> Observer for F
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    fn on_event(&self, event: &ChangeEvent) {
        self(event);
    }
}

/// Forwards events into a channel so another thread can consume them.
#[derive(Debug)]
pub struct ChannelObserver {
    sender: Sender<ChangeEvent>,
}

impl ChannelObserver {
    #[must_use]
    pub fn new(sender: Sender<ChangeEvent>) -> Self {
        Self { sender }
    }
}

impl Observer for ChannelObserver {
    fn on_event(&self, event: &ChangeEvent) {
        // A closed receiver means nobody listens any more.
        let _ = self.sender.send(event.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Node(NodeId),
    Any,
}

/// Owns one registration. Dropping it invalidates the registration.
#[derive(Debug)]
pub struct ObserverHandle {
    id: u64,
    target: Target,
    alive: Arc<AtomicBool>,
}

impl ObserverHandle {
    /// The watched node, or `None` for "any node" registrations.
    #[must_use]
    pub fn node(&self) -> Option<NodeId> {
        match self.target {
            Target::Node(node) => Some(node),
            Target::Any => None,
        }
    }

    /// False once unregistered, dropped, or purged after the node was removed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

struct Registration {
    id: u64,
    alive: Arc<AtomicBool>,
    observer: Arc<dyn Observer>,
}

impl Registration {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct Registry {
    by_node: HashMap<NodeId, Vec<Registration>>,
    any: Vec<Registration>,
}

impl Registry {
    fn prune(&mut self) {
        self.by_node.retain(|_, regs| {
            regs.retain(Registration::is_alive);
            !regs.is_empty()
        });
        self.any.retain(Registration::is_alive);
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BusStats {
    /// Observer invocations.
    pub delivered: u64,
    /// Registrations skipped because their handle was gone.
    pub skipped: u64,
    /// Live registrations.
    pub registrations: usize,
}

// =============================================================================
// BUS
// =============================================================================

/// Observer registry and synchronous dispatcher.
pub struct EventBus {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
            delivered: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Watch events whose subject is `node`.
    pub fn register(&self, observer: Arc<dyn Observer>, node: NodeId) -> ObserverHandle {
        self.add(observer, Target::Node(node))
    }

    /// Watch every event.
    pub fn register_any(&self, observer: Arc<dyn Observer>) -> ObserverHandle {
        self.add(observer, Target::Any)
    }

    /// Remove a per-node registration.
    pub fn unregister(&self, handle: ObserverHandle) {
        self.remove(&handle);
    }

    /// Remove an "any node" registration.
    pub fn unregister_any(&self, handle: ObserverHandle) {
        self.remove(&handle);
    }

    /// Number of live registrations watching `node`.
    #[must_use]
    pub fn observer_count(&self, node: NodeId) -> usize {
        self.registry
            .read()
            .by_node
            .get(&node)
            .map(|regs| regs.iter().filter(|r| r.is_alive()).count())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        let registry = self.registry.read();
        let registrations = registry
            .by_node
            .values()
            .flatten()
            .chain(registry.any.iter())
            .filter(|r| r.is_alive())
            .count();
        BusStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            registrations,
        }
    }

    /// Deliver events in order. Called by the graph store after its locks
    /// are released.
    pub(crate) fn publish(&self, events: &[ChangeEvent]) {
        let mut saw_dead = false;

        for event in events {
            let subject = event.subject();
            let targets: Vec<Arc<dyn Observer>> = {
                let registry = self.registry.read();
                let node_regs = registry.by_node.get(&subject).into_iter().flatten();
                let mut live = Vec::new();
                for reg in node_regs.chain(registry.any.iter()) {
                    if reg.is_alive() {
                        live.push(Arc::clone(&reg.observer));
                    } else {
                        saw_dead = true;
                        self.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                live
            };

            for observer in &targets {
                observer.on_event(event);
            }
            self.delivered
                .fetch_add(targets.len() as u64, Ordering::Relaxed);

            if let ChangeEvent::Node(NodeEvent::Removed { id }) = event {
                self.purge(*id);
            }
        }

        if saw_dead {
            self.registry.write().prune();
        }
    }

    fn add(&self, observer: Arc<dyn Observer>, target: Target) -> ObserverHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let alive = Arc::new(AtomicBool::new(true));
        let registration = Registration {
            id,
            alive: Arc::clone(&alive),
            observer,
        };

        let mut registry = self.registry.write();
        match target {
            Target::Node(node) => registry.by_node.entry(node).or_default().push(registration),
            Target::Any => registry.any.push(registration),
        }
        ObserverHandle { id, target, alive }
    }

    fn remove(&self, handle: &ObserverHandle) {
        handle.alive.store(false, Ordering::Release);
        let mut registry = self.registry.write();
        match handle.target {
            Target::Node(node) => {
                if let Some(regs) = registry.by_node.get_mut(&node) {
                    regs.retain(|r| r.id != handle.id);
                    if regs.is_empty() {
                        registry.by_node.remove(&node);
                    }
                }
            }
            Target::Any => registry.any.retain(|r| r.id != handle.id),
        }
    }

    fn purge(&self, node: NodeId) {
        if let Some(regs) = self.registry.write().by_node.remove(&node) {
            for reg in regs {
                reg.alive.store(false, Ordering::Release);
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::mpsc;

    fn recorder() -> (Arc<Mutex<Vec<ChangeEvent>>>, Arc<dyn Observer>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: Arc<dyn Observer> =
            Arc::new(move |event: &ChangeEvent| sink.lock().push(event.clone()));
        (seen, observer)
    }

    #[test]
    fn link_events_reach_the_matching_endpoint() {
        let bus = EventBus::new();
        let key = LinkKey::new(NodeId(1), NodeId(2), NodeId(3));
        let (from_seen, from_obs) = recorder();
        let (to_seen, to_obs) = recorder();
        let _h1 = bus.register(from_obs, NodeId(1));
        let _h2 = bus.register(to_obs, NodeId(2));

        bus.publish(&[
            ChangeEvent::Link(LinkEvent::FromLinkCreated(key)),
            ChangeEvent::Link(LinkEvent::ToLinkCreated(key)),
        ]);

        assert_eq!(
            *from_seen.lock(),
            vec![ChangeEvent::Link(LinkEvent::FromLinkCreated(key))]
        );
        assert_eq!(
            *to_seen.lock(),
            vec![ChangeEvent::Link(LinkEvent::ToLinkCreated(key))]
        );
    }

    #[test]
    fn dropped_handle_is_skipped() {
        let bus = EventBus::new();
        let (seen, observer) = recorder();
        let handle = bus.register(observer, NodeId(7));
        drop(handle);

        bus.publish(&[ChangeEvent::created(NodeId(7))]);
        assert!(seen.lock().is_empty());
        assert_eq!(bus.stats().skipped, 1);
        assert_eq!(bus.observer_count(NodeId(7)), 0);
    }

    #[test]
    fn any_observers_see_everything_in_order() {
        let bus = EventBus::new();
        let (seen, observer) = recorder();
        let handle = bus.register_any(observer);
        assert!(handle.node().is_none());

        let events = vec![
            ChangeEvent::created(NodeId(1)),
            ChangeEvent::inserted(ListOwner::Children(NodeId(1)), 0, NodeId(2)),
            ChangeEvent::removed(NodeId(1)),
        ];
        bus.publish(&events);
        assert_eq!(*seen.lock(), events);

        bus.unregister_any(handle);
        bus.publish(&[ChangeEvent::created(NodeId(3))]);
        assert_eq!(seen.lock().len(), 3);
    }

    #[test]
    fn removed_event_purges_node_registrations() {
        let bus = EventBus::new();
        let (_seen, observer) = recorder();
        let handle = bus.register(observer, NodeId(5));
        assert!(handle.is_active());

        bus.publish(&[ChangeEvent::removed(NodeId(5))]);
        assert!(!handle.is_active());
        assert_eq!(bus.observer_count(NodeId(5)), 0);
    }

    #[test]
    fn channel_observer_hands_off_events() {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::channel();
        let _handle = bus.register(Arc::new(ChannelObserver::new(tx)), NodeId(8));

        bus.publish(&[ChangeEvent::created(NodeId(8))]);
        let received = rx.try_recv().expect("event");
        assert_eq!(received, ChangeEvent::created(NodeId(8)));
    }
}
