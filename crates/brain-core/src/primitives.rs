//! # Innate Primitives
//!
//! Reserved ids and runtime defaults for the Brain.
//!
//! The Brain starts with a fixed set of predefined nodes: meaning nodes used
//! by the engine itself and one node per instruction. They are installed by
//! `Brain::new` at the ids below, are frozen, and cannot be deleted.

use crate::NodeId;

// =============================================================================
// RESERVED ID RANGES
// =============================================================================

/// First id of the instruction block. Instruction `n` of the registry table
/// lives at `INSTRUCTION_BASE + n`.
pub const INSTRUCTION_BASE: u64 = 100;

/// Highest reserved id. Everything at or below it is predefined.
pub const PREDEFINED_MAX: u64 = 1023;

/// First id handed out by the node factory.
pub const FIRST_DYNAMIC_ID: u64 = PREDEFINED_MAX + 1;

// =============================================================================
// PREDEFINED MEANINGS
// =============================================================================

/// Default meaning for plain groups.
pub const GROUP: NodeId = NodeId(1);

/// Link meaning: statement -> instruction.
pub const INSTRUCTION: NodeId = NodeId(2);

/// Link meaning: statement -> argument cluster; also the argument cluster meaning.
pub const ARGUMENTS: NodeId = NodeId(3);

/// Meaning of a cluster holding a code block.
pub const CODE: NodeId = NodeId(4);

/// Boolean true.
pub const TRUE: NodeId = NodeId(5);

/// Boolean false.
pub const FALSE: NodeId = NodeId(6);

/// Generic "value of" link meaning.
pub const VALUE: NodeId = NodeId(7);

// =============================================================================
// RUNTIME DEFAULTS
// =============================================================================

/// Idle buffers kept by the list pool.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// Lock waits longer than this are logged (never aborted).
pub const DEFAULT_LOCK_WAIT_WARN_MS: u64 = 1000;

/// Snapshot/lock/verify attempts for compound operations.
pub const DEFAULT_MAX_LOCK_RETRIES: usize = 64;

/// Nested expression depth before evaluation gives up.
pub const DEFAULT_MAX_EVAL_DEPTH: usize = 256;

/// Check whether an id belongs to the predefined range.
#[must_use]
pub const fn is_predefined(id: NodeId) -> bool {
    id.0 != 0 && id.0 <= PREDEFINED_MAX
}
