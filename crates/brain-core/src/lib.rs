//! # brain-core
//!
//! A concurrent semantic graph engine: THE BRAIN.
//!
//! Nodes carry a kind and a value, are grouped into ordered clusters and
//! connected by typed links (`from`, `to`, `meaning`) that carry their own
//! info lists. Programs are stored in the same graph and run by the
//! `Processor`.
//!
//! ## Concurrency
//!
//! Every operation locks the node aspects it touches through the
//! `LockManager`, in one canonical order, so batches never deadlock.
//! Change events are published after locks are released.
//!
//! ## Memory
//!
//! Nodes created during evaluation are temporaries. Releasing them reclaims
//! every one not anchored by a frozen, module-owned or otherwise durable node.

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod diagnostics;
pub mod events;
pub mod graph;
pub mod locks;
pub mod memory;
pub mod primitives;
pub mod processor;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use config::BrainConfig;
pub use types::{Aspect, BrainError, Link, LinkKey, NodeData, NodeId, NodeKind, Value};

// =============================================================================
// RE-EXPORTS: Graph Store & Lifecycle
// =============================================================================

pub use graph::{Brain, BrainStats};
pub use locks::{LockBatch, LockGuard, LockManager, LockRequest, LockStats};
pub use memory::{ListPool, PoolStats, PooledList, ReclaimReport};

// =============================================================================
// RE-EXPORTS: Notifications & Diagnostics
// =============================================================================

pub use diagnostics::{
    CollectingDiagnostics, Diagnostic, Diagnostics, Severity, TracingDiagnostics,
};
pub use events::{
    BusStats, ChangeEvent, ChannelObserver, EventBus, LinkEvent, ListEvent, ListOwner, NodeEvent,
    Observer, ObserverHandle,
};

// =============================================================================
// RE-EXPORTS: Instruction Engine
// =============================================================================

pub use processor::{
    ExecutionResult, InstructionKind, Processor, ProgramBuilder, StackStats, instruction_id,
};
