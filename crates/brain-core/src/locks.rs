//! # Lock Manager
//!
//! Shared/exclusive locks on `(node, aspect)` pairs.
//!
//! ## Ordering Discipline
//!
//! Every acquisition goes through a `LockBatch`, which is sorted into the
//! canonical order `(node id, aspect)` before any lock is taken. Since all
//! threads take locks in the same total order, no cycle of waiters can form.
//! Any code path that needs more than one lock must build a single batch.
//!
//! ## Re-entrancy
//!
//! A thread may request a pair it already holds (nested scopes). Reads nest
//! under reads or writes, writes nest under writes. A read may be upgraded
//! to a write only while the thread is the sole reader; anything else would
//! deadlock and is reported as `BrainError::InvariantViolation`.
//!
//! Waits never time out. A wait that exceeds the configured threshold is
//! logged once and continues.

use crate::{Aspect, BrainError, NodeId};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

// =============================================================================
// REQUESTS & BATCHES
// =============================================================================

/// One lock request: a node aspect and the access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockRequest {
    pub node: NodeId,
    pub aspect: Aspect,
    pub writeable: bool,
}

impl LockRequest {
    #[must_use]
    pub const fn new(node: NodeId, aspect: Aspect, writeable: bool) -> Self {
        Self {
            node,
            aspect,
            writeable,
        }
    }
}

/// A set of lock requests acquired and released as a unit.
#[derive(Debug, Clone, Default)]
pub struct LockBatch {
    requests: Vec<LockRequest>,
}

impl LockBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a shared request. Requests for `NodeId::EMPTY` are ignored.
    pub fn read(&mut self, node: NodeId, aspect: Aspect) -> &mut Self {
        self.push(LockRequest::new(node, aspect, false))
    }

    /// Add an exclusive request. Requests for `NodeId::EMPTY` are ignored.
    pub fn write(&mut self, node: NodeId, aspect: Aspect) -> &mut Self {
        self.push(LockRequest::new(node, aspect, true))
    }

    /// Add a request.
    pub fn push(&mut self, request: LockRequest) -> &mut Self {
        if !request.node.is_empty() {
            self.requests.push(request);
        }
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Sort into canonical order and merge duplicates (write wins).
    #[must_use]
    pub fn into_canonical(mut self) -> Vec<LockRequest> {
        self.requests.sort_by_key(|r| (r.node, r.aspect));
        let mut merged: Vec<LockRequest> = Vec::with_capacity(self.requests.len());
        for request in self.requests {
            match merged.last_mut() {
                Some(last) if last.node == request.node && last.aspect == request.aspect => {
                    last.writeable |= request.writeable;
                }
                _ => merged.push(request),
            }
        }
        merged
    }
}

// =============================================================================
// LOCK STATE
// =============================================================================

#[derive(Debug, Default)]
struct LockState {
    writer: Option<ThreadId>,
    write_depth: usize,
    readers: Vec<(ThreadId, usize)>,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }

    fn reader_depth(&self, thread: ThreadId) -> usize {
        self.readers
            .iter()
            .find(|(t, _)| *t == thread)
            .map(|(_, depth)| *depth)
            .unwrap_or(0)
    }

    fn add_reader(&mut self, thread: ThreadId) {
        match self.readers.iter_mut().find(|(t, _)| *t == thread) {
            Some((_, depth)) => *depth += 1,
            None => self.readers.push((thread, 1)),
        }
    }

    /// `Ok(true)` when granted, `Ok(false)` when the caller must wait.
    fn try_grant(&mut self, thread: ThreadId, writeable: bool) -> Result<bool, String> {
        if !writeable {
            return match self.writer {
                Some(owner) if owner != thread => Ok(false),
                _ => {
                    self.add_reader(thread);
                    Ok(true)
                }
            };
        }

        match self.writer {
            Some(owner) if owner == thread => {
                self.write_depth += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                let others = self.readers.iter().any(|(t, _)| *t != thread);
                if others && self.reader_depth(thread) > 0 {
                    return Err("read lock upgrade while other readers hold the aspect".into());
                }
                if others {
                    return Ok(false);
                }
                self.writer = Some(thread);
                self.write_depth = 1;
                Ok(true)
            }
        }
    }

    /// Returns false when the thread did not hold the lock in that mode.
    fn release(&mut self, thread: ThreadId, writeable: bool) -> bool {
        if writeable {
            if self.writer != Some(thread) || self.write_depth == 0 {
                return false;
            }
            self.write_depth -= 1;
            if self.write_depth == 0 {
                self.writer = None;
            }
            return true;
        }

        let Some(pos) = self.readers.iter().position(|(t, _)| *t == thread) else {
            return false;
        };
        let (_, depth) = &mut self.readers[pos];
        *depth -= 1;
        if *depth == 0 {
            self.readers.swap_remove(pos);
        }
        true
    }
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Snapshot of lock manager counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockStats {
    /// Individual `(node, aspect)` grants.
    pub acquired: u64,
    /// Individual `(node, aspect)` releases.
    pub released: u64,
    /// Grants that had to block first.
    pub waits: u64,
    /// Batches granted.
    pub batches: u64,
}

#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicU64,
    released: AtomicU64,
    waits: AtomicU64,
    batches: AtomicU64,
}

// =============================================================================
// LOCK MANAGER
// =============================================================================

/// Grants and releases aspect locks.
#[derive(Debug)]
pub struct LockManager {
    table: Mutex<HashMap<(NodeId, Aspect), LockState>>,
    released: Condvar,
    warn_after: Option<Duration>,
    counters: Counters,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(None)
    }
}

impl LockManager {
    /// Create a lock manager. `warn_after` enables slow-wait logging.
    #[must_use]
    pub fn new(warn_after: Option<Duration>) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            warn_after,
            counters: Counters::default(),
        }
    }

    /// Acquire a single aspect lock, blocking until granted.
    pub fn request_lock(
        &self,
        node: NodeId,
        aspect: Aspect,
        writeable: bool,
    ) -> Result<LockGuard<'_>, BrainError> {
        let mut batch = LockBatch::new();
        batch.push(LockRequest::new(node, aspect, writeable));
        self.request_locks(batch)
    }

    /// Acquire every lock in the batch, in canonical order.
    ///
    /// On failure nothing stays held.
    pub fn request_locks(&self, batch: LockBatch) -> Result<LockGuard<'_>, BrainError> {
        let requests = batch.into_canonical();
        let thread = thread::current().id();
        let mut held = Vec::with_capacity(requests.len());

        for request in requests {
            if let Err(e) = self.acquire_one(request, thread) {
                self.release_all(&held, thread);
                return Err(e);
            }
            held.push(request);
        }

        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        Ok(LockGuard {
            manager: self,
            held,
            thread,
            _not_send: PhantomData,
        })
    }

    /// Whether any thread currently holds the aspect.
    #[must_use]
    pub fn is_locked(&self, node: NodeId, aspect: Aspect) -> bool {
        self.table.lock().contains_key(&(node, aspect))
    }

    /// Whether the calling thread holds the aspect in any mode.
    #[must_use]
    pub fn held_by_current_thread(&self, node: NodeId, aspect: Aspect) -> bool {
        let thread = thread::current().id();
        self.table
            .lock()
            .get(&(node, aspect))
            .is_some_and(|s| s.writer == Some(thread) || s.reader_depth(thread) > 0)
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
            waits: self.counters.waits.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
        }
    }

    fn acquire_one(&self, request: LockRequest, thread: ThreadId) -> Result<(), BrainError> {
        let key = (request.node, request.aspect);
        let mut table = self.table.lock();
        let mut waiting_since: Option<Instant> = None;
        let mut warned = false;

        loop {
            let state = table.entry(key).or_default();
            match state.try_grant(thread, request.writeable) {
                Ok(true) => break,
                Ok(false) => {}
                Err(reason) => {
                    if state.is_free() {
                        table.remove(&key);
                    }
                    tracing::error!(
                        node = %request.node,
                        aspect = ?request.aspect,
                        "lock misuse: {}",
                        reason
                    );
                    return Err(BrainError::InvariantViolation(format!(
                        "{} on {} {:?}",
                        reason, request.node, request.aspect
                    )));
                }
            }

            let since = *waiting_since.get_or_insert_with(|| {
                self.counters.waits.fetch_add(1, Ordering::Relaxed);
                Instant::now()
            });

            if let (Some(limit), false) = (self.warn_after, warned) {
                let elapsed = since.elapsed();
                if elapsed < limit {
                    self.released.wait_for(&mut table, limit - elapsed);
                    continue;
                }
                warned = true;
                tracing::warn!(
                    node = %request.node,
                    aspect = ?request.aspect,
                    writeable = request.writeable,
                    waited_ms = elapsed.as_millis() as u64,
                    "slow lock wait"
                );
            }
            self.released.wait(&mut table);
        }

        self.counters.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn release_all(&self, held: &[LockRequest], thread: ThreadId) {
        if held.is_empty() {
            return;
        }
        {
            let mut table = self.table.lock();
            for request in held.iter().rev() {
                let key = (request.node, request.aspect);
                let released = match table.get_mut(&key) {
                    Some(state) => {
                        let ok = state.release(thread, request.writeable);
                        if state.is_free() {
                            table.remove(&key);
                        }
                        ok
                    }
                    None => false,
                };
                if released {
                    self.counters.released.fetch_add(1, Ordering::Relaxed);
                } else {
                    tracing::error!(
                        node = %request.node,
                        aspect = ?request.aspect,
                        "release of a lock that is not held"
                    );
                }
            }
        }
        self.released.notify_all();
    }
}

// =============================================================================
// GUARD
// =============================================================================

/// Holds a granted batch; releases it on drop.
///
/// Bound to the acquiring thread.
#[derive(Debug)]
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    held: Vec<LockRequest>,
    thread: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl LockGuard<'_> {
    /// The granted requests in acquisition order.
    #[must_use]
    pub fn held(&self) -> &[LockRequest] {
        &self.held
    }

    /// Release explicitly (same as dropping).
    pub fn release(self) {}
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release_all(&self.held, self.thread);
    }
}

// =============================================================================
// TESTS
// =============================================================================
