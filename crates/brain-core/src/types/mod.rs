//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the Brain:
//! - Node identity (`NodeId`) and classification (`NodeKind`)
//! - Kind-specific payloads (`Value`) and creation specs (`NodeData`)
//! - Link identity (`LinkKey`) and link snapshots (`Link`)
//! - Lockable structural facets (`Aspect`)
//! - Error types (`BrainError`)
//!
//! ## Identity Guarantees
//!
//! - `NodeId(0)` is reserved and never resolves to a live node
//! - Ids are never reused while the engine is alive
//! - A link is identified by its `(from, to, meaning)` triple

use crate::processor::InstructionKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// NODE IDENTITY
// =============================================================================

/// Unique identifier for a node in the Brain.
///
/// Stable for the node's lifetime. `NodeId::EMPTY` means "none".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The reserved "empty/none" id.
    pub const EMPTY: NodeId = NodeId(0);

    /// Get the raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Check whether this is the reserved empty id.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// NODE KIND
// =============================================================================

/// The closed set of node variants.
///
/// The kind decides which `Value` payloads a node accepts and never
/// changes after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Plain node without payload.
    Neuron,
    /// Node owning an ordered child sequence and a meaning.
    Cluster,
    /// Integer value node.
    Int,
    /// Floating point value node.
    Double,
    /// Text value node.
    Text,
    /// Executable operation (predefined only).
    Instruction,
    /// Expression that runs an instruction for its side effects.
    Statement,
    /// Expression that runs an instruction and yields its results.
    ResultStatement,
    /// Processor-local value slot.
    Variable,
}

impl NodeKind {
    /// Kinds that carry a scalar value.
    #[must_use]
    pub const fn is_value(self) -> bool {
        matches!(self, NodeKind::Int | NodeKind::Double | NodeKind::Text)
    }

    /// Kinds that the processor evaluates instead of passing through.
    #[must_use]
    pub const fn is_expression(self) -> bool {
        matches!(
            self,
            NodeKind::Statement | NodeKind::ResultStatement | NodeKind::Variable
        )
    }
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// The kind-specific payload held under the `Value` aspect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// No payload (neurons, statements, variables).
    #[default]
    Empty,
    /// Cluster meaning.
    Meaning(NodeId),
    /// Integer payload.
    Int(i64),
    /// Floating point payload.
    Double(f64),
    /// Text payload.
    Text(String),
    /// Instruction payload (immutable).
    Instruction(InstructionKind),
}

impl Value {
    /// Short name of the payload variant, for error messages.
    #[must_use]
    pub const fn describe(&self) -> &'static str {
        match self {
            Value::Empty => "empty",
            Value::Meaning(_) => "meaning",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Instruction(_) => "instruction",
        }
    }

    /// Check whether this payload may be stored on a node of `kind`.
    #[must_use]
    pub fn fits(&self, kind: NodeKind) -> bool {
        matches!(
            (kind, self),
            (
                NodeKind::Neuron
                    | NodeKind::Statement
                    | NodeKind::ResultStatement
                    | NodeKind::Variable,
                Value::Empty
            ) | (NodeKind::Cluster, Value::Meaning(_))
                | (NodeKind::Int, Value::Int(_))
                | (NodeKind::Double, Value::Double(_))
                | (NodeKind::Text, Value::Text(_))
                | (NodeKind::Instruction, Value::Instruction(_))
        )
    }
}

/// Everything needed to create a node: kind and initial payload together,
/// so a creation request can never mismatch.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Neuron,
    Cluster { meaning: NodeId },
    Int(i64),
    Double(f64),
    Text(String),
    Instruction(InstructionKind),
    Statement,
    ResultStatement,
    Variable,
}

impl NodeData {
    /// The kind a node created from this data will have.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Neuron => NodeKind::Neuron,
            NodeData::Cluster { .. } => NodeKind::Cluster,
            NodeData::Int(_) => NodeKind::Int,
            NodeData::Double(_) => NodeKind::Double,
            NodeData::Text(_) => NodeKind::Text,
            NodeData::Instruction(_) => NodeKind::Instruction,
            NodeData::Statement => NodeKind::Statement,
            NodeData::ResultStatement => NodeKind::ResultStatement,
            NodeData::Variable => NodeKind::Variable,
        }
    }

    /// Split into kind and initial payload.
    #[must_use]
    pub fn into_parts(self) -> (NodeKind, Value) {
        let kind = self.kind();
        let value = match self {
            NodeData::Cluster { meaning } => Value::Meaning(meaning),
            NodeData::Int(v) => Value::Int(v),
            NodeData::Double(v) => Value::Double(v),
            NodeData::Text(v) => Value::Text(v),
            NodeData::Instruction(k) => Value::Instruction(k),
            NodeData::Neuron
            | NodeData::Statement
            | NodeData::ResultStatement
            | NodeData::Variable => Value::Empty,
        };
        (kind, value)
    }
}

// =============================================================================
// ASPECTS
// =============================================================================

/// An independently lockable facet of a node.
///
/// The declaration order is the canonical lock order within one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Aspect {
    Value,
    Children,
    Parents,
    LinksIn,
    LinksOut,
    /// Info lists of the node's outgoing links, plus the node's own
    /// back-references from info lists it appears in.
    Info,
}

impl Aspect {
    /// All aspects in canonical order.
    pub const ALL: [Aspect; 6] = [
        Aspect::Value,
        Aspect::Children,
        Aspect::Parents,
        Aspect::LinksIn,
        Aspect::LinksOut,
        Aspect::Info,
    ];
}

// =============================================================================
// LINKS
// =============================================================================

/// The identity triple of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkKey {
    pub from: NodeId,
    pub to: NodeId,
    pub meaning: NodeId,
}

impl LinkKey {
    #[must_use]
    pub const fn new(from: NodeId, to: NodeId, meaning: NodeId) -> Self {
        Self { from, to, meaning }
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.from, self.meaning, self.to)
    }
}

/// A copied view of a link, including its ordered info list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub from: NodeId,
    pub to: NodeId,
    pub meaning: NodeId,
    pub info: Vec<NodeId>,
}

impl Link {
    /// The identity triple of this link.
    #[must_use]
    pub fn key(&self) -> LinkKey {
        LinkKey::new(self.from, self.to, self.meaning)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Brain.
///
/// - Recoverable conditions are returned, never thrown
/// - `InvariantViolation` marks a programmer defect; the operation that hit it
///   is aborted without partial mutation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrainError {
    /// The node is not registered (never created or already deleted).
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// No link exists for the given identity triple.
    #[error("Link not found: {0}")]
    LinkNotFound(LinkKey),

    /// A link with the target identity triple already exists.
    #[error("Link already exists: {0}")]
    LinkExists(LinkKey),

    /// The node exists but is not a cluster.
    #[error("Node {0} is not a cluster")]
    NotACluster(NodeId),

    /// The node's kind does not accept the requested payload or role.
    #[error("Kind mismatch on {node}: expected {expected}, found {found:?}")]
    KindMismatch {
        node: NodeId,
        expected: &'static str,
        found: NodeKind,
    },

    /// An index-based edit was out of bounds.
    #[error("Index {index} out of range for {node} (len {len})")]
    IndexOutOfRange { node: NodeId, index: usize, len: usize },

    /// The node is owned by a module and cannot be frozen.
    #[error("Node {0} is module-owned")]
    ModuleOwned(NodeId),

    /// The node is predefined and cannot be removed.
    #[error("Node {0} is predefined")]
    Predefined(NodeId),

    /// The lock set of a compound operation kept changing under it.
    #[error("Lock set for {0} did not stabilise")]
    LockContention(NodeId),

    /// A graph-encoded program is structurally invalid (bad arity, missing
    /// instruction link, uncoercible argument).
    #[error("Malformed program: {0}")]
    Malformed(String),

    /// A lock or engine invariant was broken by the caller.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BrainError {
    /// Hard failures abort the current operation; everything else is a
    /// recoverable condition.
    #[must_use]
    pub const fn is_hard(&self) -> bool {
        matches!(self, BrainError::InvariantViolation(_))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_id_is_reserved() {
        assert!(NodeId::EMPTY.is_empty());
        assert!(!NodeId(7).is_empty());
        assert_eq!(NodeId(7).to_string(), "#7");
    }

    #[test]
    fn aspect_order_is_canonical() {
        let mut shuffled = vec![Aspect::Info, Aspect::Value, Aspect::LinksIn, Aspect::Children];
        shuffled.sort();
        assert_eq!(
            shuffled,
            vec![Aspect::Value, Aspect::Children, Aspect::LinksIn, Aspect::Info]
        );
        assert_eq!(Aspect::ALL.first(), Some(&Aspect::Value));
    }

    #[test]
    fn payload_fits_kind() {
        assert!(Value::Int(3).fits(NodeKind::Int));
        assert!(!Value::Int(3).fits(NodeKind::Double));
        assert!(Value::Meaning(NodeId(1)).fits(NodeKind::Cluster));
        assert!(Value::Empty.fits(NodeKind::Neuron));
        assert!(!Value::Empty.fits(NodeKind::Cluster));
    }

    #[test]
    fn node_data_splits_into_kind_and_payload() {
        let (kind, value) = NodeData::Text("hi".into()).into_parts();
        assert_eq!(kind, NodeKind::Text);
        assert_eq!(value, Value::Text("hi".into()));

        let (kind, value) = NodeData::Cluster { meaning: NodeId(4) }.into_parts();
        assert_eq!(kind, NodeKind::Cluster);
        assert_eq!(value, Value::Meaning(NodeId(4)));
    }

    #[test]
    fn link_key_display() {
        let key = LinkKey::new(NodeId(1), NodeId(2), NodeId(3));
        assert_eq!(key.to_string(), "#1 -[#3]-> #2");
    }
}
