//! Helpers for writing programs into a Brain.
//!
//! Nodes created here are ordinary durable nodes; delete them (or the
//! clusters holding them) when the program is no longer needed.

use super::instruction::InstructionKind;
use super::registry::instruction_id;
use crate::graph::Brain;
use crate::primitives::{ARGUMENTS, CODE, INSTRUCTION};
use crate::{BrainError, NodeData, NodeId};

/// Builds statements, expressions and code blocks.
#[derive(Debug, Clone, Copy)]
pub struct ProgramBuilder<'a> {
    brain: &'a Brain,
}

impl<'a> ProgramBuilder<'a> {
    #[must_use]
    pub fn new(brain: &'a Brain) -> Self {
        Self { brain }
    }

    /// A statement whose results are discarded.
    pub fn statement(&self, kind: InstructionKind, args: &[NodeId]) -> Result<NodeId, BrainError> {
        self.encode(NodeData::Statement, kind, args)
    }

    /// An expression: a statement that yields its results to the caller.
    pub fn expression(&self, kind: InstructionKind, args: &[NodeId]) -> Result<NodeId, BrainError> {
        self.encode(NodeData::ResultStatement, kind, args)
    }

    fn encode(
        &self,
        data: NodeData,
        kind: InstructionKind,
        args: &[NodeId],
    ) -> Result<NodeId, BrainError> {
        let statement = self.brain.create(data);
        self.brain
            .set_link(statement, instruction_id(kind), INSTRUCTION)?;
        let arguments = self.cluster(ARGUMENTS, args)?;
        self.brain.set_link(statement, arguments, ARGUMENTS)?;
        Ok(statement)
    }

    /// A code block running `statements` in order.
    pub fn block(&self, statements: &[NodeId]) -> Result<NodeId, BrainError> {
        self.cluster(CODE, statements)
    }

    pub fn cluster(&self, meaning: NodeId, children: &[NodeId]) -> Result<NodeId, BrainError> {
        let cluster = self.brain.create(NodeData::Cluster { meaning });
        for child in children {
            self.brain.insert_child(cluster, *child)?;
        }
        Ok(cluster)
    }

    #[must_use]
    pub fn variable(&self) -> NodeId {
        self.brain.create(NodeData::Variable)
    }

    #[must_use]
    pub fn int(&self, value: i64) -> NodeId {
        self.brain.create(NodeData::Int(value))
    }

    #[must_use]
    pub fn double(&self, value: f64) -> NodeId {
        self.brain.create(NodeData::Double(value))
    }

    #[must_use]
    pub fn text(&self, value: &str) -> NodeId {
        self.brain.create(NodeData::Text(value.to_owned()))
    }
}
