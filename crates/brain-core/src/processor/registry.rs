//! # Predefined Node Registry
//!
//! Static table of every node `Brain::new` installs: the meaning nodes and
//! one Instruction node per `InstructionKind`. Instruction ids are derived
//! from the enum discriminant, so the mapping is fixed at compile time.

use super::instruction::InstructionKind;
use crate::primitives::{
    ARGUMENTS, CODE, FALSE, GROUP, INSTRUCTION, INSTRUCTION_BASE, PREDEFINED_MAX, TRUE, VALUE,
};
use crate::{NodeData, NodeId};

/// All instructions in discriminant order.
pub const INSTRUCTIONS: [InstructionKind; 45] = {
    use InstructionKind as I;
    [
        I::Delete,
        I::AddChild,
        I::InsertChild,
        I::RemoveChild,
        I::ReplaceChild,
        I::MoveChild,
        I::AddLink,
        I::RemoveLink,
        I::ChangeLinkTo,
        I::ChangeLinkFrom,
        I::AddInfo,
        I::Freeze,
        I::Unfreeze,
        I::SetValue,
        I::Assign,
        I::ClearChildren,
        I::New,
        I::NewCluster,
        I::NewInt,
        I::NewDouble,
        I::NewText,
        I::Add,
        I::Subtract,
        I::Multiply,
        I::Divide,
        I::Modulus,
        I::Count,
        I::GetFirst,
        I::GetLast,
        I::GetAt,
        I::IndexOf,
        I::GetFirstOut,
        I::GetMeaning,
        I::Concat,
        I::Equal,
        I::Less,
        I::Greater,
        I::Contains,
        I::GetChildren,
        I::GetParents,
        I::GetOutgoing,
        I::GetIncoming,
        I::GetInfo,
        I::Distinct,
        I::Reverse,
    ]
};

const MEANINGS: [(NodeId, &str); 7] = [
    (GROUP, "group"),
    (INSTRUCTION, "instruction"),
    (ARGUMENTS, "arguments"),
    (CODE, "code"),
    (TRUE, "true"),
    (FALSE, "false"),
    (VALUE, "value"),
];

/// The predefined node holding `kind`.
#[must_use]
pub const fn instruction_id(kind: InstructionKind) -> NodeId {
    NodeId(INSTRUCTION_BASE + kind as u64)
}

/// Reverse of `instruction_id`.
#[must_use]
pub fn instruction_for(id: NodeId) -> Option<InstructionKind> {
    let index = id.0.checked_sub(INSTRUCTION_BASE)?;
    INSTRUCTIONS.get(usize::try_from(index).ok()?).copied()
}

/// A node installed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct PredefinedEntry {
    pub id: NodeId,
    pub name: &'static str,
    pub data: NodeData,
}

/// Every predefined node, meanings first.
#[must_use]
pub fn predefined_entries() -> Vec<PredefinedEntry> {
    let meanings = MEANINGS.iter().map(|(id, name)| PredefinedEntry {
        id: *id,
        name: *name,
        data: NodeData::Neuron,
    });
    let instructions = INSTRUCTIONS.iter().map(|kind| PredefinedEntry {
        id: instruction_id(*kind),
        name: kind.name(),
        data: NodeData::Instruction(*kind),
    });
    let entries: Vec<_> = meanings.chain(instructions).collect();
    debug_assert!(entries.iter().all(|e| e.id.0 <= PREDEFINED_MAX));
    entries
}

/// Look a predefined node up by name.
#[must_use]
pub fn predefined_by_name(name: &str) -> Option<NodeId> {
    MEANINGS
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(id, _)| *id)
        .or_else(|| {
            INSTRUCTIONS
                .iter()
                .find(|kind| kind.name().eq_ignore_ascii_case(name))
                .map(|kind| instruction_id(*kind))
        })
}
