//! Generic (materialising) implementation of every instruction.
//!
//! `apply` receives fully evaluated arguments and appends its results to
//! `out`. New scalar results are temporaries of the running processor.
//!
//! Instructions that repeat a graph edit over their operands check every
//! operand first. Should a later edit still fail (another thread got in
//! between), the edits already made are recorded as a mutation.

use super::coerce::{as_double, as_int, as_text, bool_node};
use super::engine::Processor;
use super::instruction::{Comparison, InstructionKind};
use crate::primitives::is_predefined;
use crate::{Brain, BrainError, LinkKey, NodeData, NodeId, NodeKind, Value};
use std::collections::BTreeSet;

impl Processor {
    pub(super) fn apply(
        &mut self,
        kind: InstructionKind,
        args: &[NodeId],
        out: &mut Vec<NodeId>,
    ) -> Result<(), BrainError> {
        use InstructionKind as I;

        let arity = kind.arity();
        if !arity.accepts(args.len()) {
            return Err(BrainError::Malformed(format!(
                "{} expects {} argument(s), got {}",
                kind.name(),
                arity,
                args.len()
            )));
        }

        let brain = std::sync::Arc::clone(&self.brain);
        match kind {
            // -----------------------------------------------------------------
            // Void
            // -----------------------------------------------------------------
            I::Delete => {
                check_all(args, |id| {
                    if is_predefined(id) {
                        return Err(BrainError::Predefined(id));
                    }
                    Ok(())
                })?;
                for id in args {
                    if brain.delete(*id)? {
                        self.mutated = true;
                    } else {
                        self.warn(&format!("{kind}@{id}"), "node does not exist");
                    }
                }
            }
            I::AddChild => {
                expect_cluster(&brain, args[0])?;
                check_all(&args[1..], |id| brain.kind(id).map(|_| ()))?;
                for item in &args[1..] {
                    brain.insert_child(args[0], *item)?;
                    self.mutated = true;
                }
            }
            I::InsertChild => {
                let index = index_arg(&brain, args[1])?;
                brain.insert_child_at(args[0], index, args[2])?;
            }
            I::RemoveChild => {
                expect_cluster(&brain, args[0])?;
                for item in &args[1..] {
                    if brain.remove_child(args[0], *item)? {
                        self.mutated = true;
                    } else {
                        let tag = format!("{kind}@{}", args[0]);
                        self.warn(&tag, &format!("{item} is not a child"));
                    }
                }
            }
            I::ReplaceChild => {
                if !brain.replace_child(args[0], args[1], args[2])? {
                    return Err(BrainError::Malformed(format!(
                        "{} is not a child of {}",
                        args[1], args[0]
                    )));
                }
            }
            I::MoveChild => {
                let from = index_arg(&brain, args[1])?;
                let to = index_arg(&brain, args[2])?;
                brain.move_child(args[0], from, to)?;
            }
            I::AddLink => {
                brain.set_link(args[0], args[1], args[2])?;
            }
            I::RemoveLink => {
                if !brain.remove_link(args[0], args[1], args[2])? {
                    return Err(BrainError::LinkNotFound(LinkKey::new(
                        args[0], args[1], args[2],
                    )));
                }
            }
            I::ChangeLinkTo => {
                brain.change_link_to(LinkKey::new(args[0], args[1], args[2]), args[3])?;
            }
            I::ChangeLinkFrom => {
                brain.change_link_from(LinkKey::new(args[0], args[1], args[2]), args[3])?;
            }
            I::AddInfo => {
                let link = LinkKey::new(args[0], args[1], args[2]);
                if brain.find_link(link.from, link.to, link.meaning)?.is_none() {
                    return Err(BrainError::LinkNotFound(link));
                }
                check_all(&args[3..], |id| brain.kind(id).map(|_| ()))?;
                for item in &args[3..] {
                    brain.add_link_info(link, *item)?;
                    self.mutated = true;
                }
            }
            I::Freeze => {
                check_all(args, |id| {
                    if brain.module_ref_count(id)? > 0 {
                        return Err(BrainError::ModuleOwned(id));
                    }
                    Ok(())
                })?;
                for id in args {
                    brain.freeze(*id)?;
                    self.mutated = true;
                }
            }
            I::Unfreeze => {
                check_all(args, |id| {
                    if is_predefined(id) {
                        return Err(BrainError::Predefined(id));
                    }
                    brain.kind(id).map(|_| ())
                })?;
                for id in args {
                    brain.unfreeze(*id)?;
                    self.mutated = true;
                }
            }
            I::SetValue => self.set_value_from(args[0], args[1])?,
            I::Assign => {
                let variable = args[0];
                let found = brain.kind(variable)?;
                if found != NodeKind::Variable {
                    return Err(BrainError::KindMismatch {
                        node: variable,
                        expected: "variable",
                        found,
                    });
                }
                self.variables.insert(variable, args[1..].to_vec());
            }
            I::ClearChildren => {
                check_all(args, |id| expect_cluster(&brain, id))?;
                for id in args {
                    brain.clear_children(*id)?;
                    self.mutated = true;
                }
            }

            // -----------------------------------------------------------------
            // Single
            // -----------------------------------------------------------------
            I::New => out.push(self.new_temp(NodeData::Neuron)),
            I::NewCluster => {
                brain.kind(args[0])?;
                let cluster = self.new_temp(NodeData::Cluster { meaning: args[0] });
                for child in &args[1..] {
                    brain.insert_child(cluster, *child)?;
                }
                out.push(cluster);
            }
            I::NewInt => {
                let v = as_int(&brain, args[0]).ok_or_else(|| not_a(args[0], "integer"))?;
                out.push(self.new_temp(NodeData::Int(v)));
            }
            I::NewDouble => {
                let v = as_double(&brain, args[0]).ok_or_else(|| not_a(args[0], "number"))?;
                out.push(self.new_temp(NodeData::Double(v)));
            }
            I::NewText => {
                let v = as_text(&brain, args[0]).ok_or_else(|| not_a(args[0], "text"))?;
                out.push(self.new_temp(NodeData::Text(v)));
            }
            I::Add | I::Subtract | I::Multiply | I::Divide | I::Modulus => {
                let op = kind.arithmetic().ok_or_else(|| {
                    BrainError::InvariantViolation(format!("{kind} has no arithmetic"))
                })?;
                let ints: Option<Vec<i64>> = args.iter().map(|a| as_int(&brain, *a)).collect();
                if let Some(v) = ints.and_then(|values| op.fold_int(&values)) {
                    out.push(self.new_temp(NodeData::Int(v)));
                    return Ok(());
                }
                let doubles: Option<Vec<f64>> =
                    args.iter().map(|a| as_double(&brain, *a)).collect();
                let v = doubles
                    .and_then(|values| op.fold_double(&values))
                    .ok_or_else(|| {
                        BrainError::Malformed(format!("{kind} needs numeric operands"))
                    })?;
                out.push(self.new_temp(NodeData::Double(v)));
            }
            I::Count => {
                let n = i64::try_from(args.len())
                    .map_err(|_| BrainError::Malformed("count overflow".into()))?;
                out.push(self.new_temp(NodeData::Int(n)));
            }
            I::GetFirst => {
                let children = brain.children_pooled(args[0])?;
                out.extend(children.first().copied());
            }
            I::GetLast => {
                let children = brain.children_pooled(args[0])?;
                out.extend(children.last().copied());
            }
            I::GetAt => {
                let index = index_arg(&brain, args[1])?;
                out.push(brain.child_at(args[0], index)?);
            }
            I::IndexOf => {
                if let Some(index) = brain.index_of_child(args[0], args[1])? {
                    let index = i64::try_from(index)
                        .map_err(|_| BrainError::Malformed("index overflow".into()))?;
                    out.push(self.new_temp(NodeData::Int(index)));
                }
            }
            I::GetFirstOut => {
                let links = brain.links_out(args[0])?;
                out.extend(
                    links
                        .iter()
                        .find(|key| key.meaning == args[1])
                        .map(|key| key.to),
                );
            }
            I::GetMeaning => out.push(brain.meaning_of(args[0])?),
            I::Concat => {
                let mut text = String::new();
                for arg in args {
                    text.push_str(&as_text(&brain, *arg).ok_or_else(|| not_a(*arg, "text"))?);
                }
                out.push(self.new_temp(NodeData::Text(text)));
            }
            I::Equal | I::Less | I::Greater => {
                let op = kind.comparison().ok_or_else(|| {
                    BrainError::InvariantViolation(format!("{kind} has no comparison"))
                })?;
                out.push(bool_node(compare(&brain, op, args[0], args[1])?));
            }
            I::Contains => {
                let found = brain.child_occurrences(args[0], args[1])? > 0;
                out.push(bool_node(found));
            }

            // -----------------------------------------------------------------
            // Multi
            // -----------------------------------------------------------------
            I::GetChildren => {
                for cluster in args {
                    brain.children_into(*cluster, out)?;
                }
            }
            I::GetParents => {
                for id in args {
                    out.extend(brain.parents(*id)?);
                }
            }
            I::GetOutgoing => {
                let links = brain.links_out(args[0])?;
                out.extend(
                    links
                        .iter()
                        .filter(|key| key.meaning == args[1])
                        .map(|key| key.to),
                );
            }
            I::GetIncoming => {
                let links = brain.links_in(args[0])?;
                out.extend(
                    links
                        .iter()
                        .filter(|key| key.meaning == args[1])
                        .map(|key| key.from),
                );
            }
            I::GetInfo => out.extend(brain.link_info(LinkKey::new(args[0], args[1], args[2]))?),
            I::Distinct => {
                let mut seen = BTreeSet::new();
                out.extend(args.iter().copied().filter(|id| seen.insert(*id)));
            }
            I::Reverse => out.extend(args.iter().rev().copied()),
        }
        Ok(())
    }

    fn set_value_from(&mut self, target: NodeId, source: NodeId) -> Result<(), BrainError> {
        let brain = std::sync::Arc::clone(&self.brain);
        let value = match brain.kind(target)? {
            NodeKind::Int => {
                Value::Int(as_int(&brain, source).ok_or_else(|| not_a(source, "integer"))?)
            }
            NodeKind::Double => {
                Value::Double(as_double(&brain, source).ok_or_else(|| not_a(source, "number"))?)
            }
            NodeKind::Text => {
                Value::Text(as_text(&brain, source).ok_or_else(|| not_a(source, "text"))?)
            }
            NodeKind::Cluster => {
                brain.kind(source)?;
                Value::Meaning(source)
            }
            found => {
                return Err(BrainError::KindMismatch {
                    node: target,
                    expected: "value node",
                    found,
                });
            }
        };
        brain.set_value(target, value)
    }
}

fn check_all(
    ids: &[NodeId],
    check: impl Fn(NodeId) -> Result<(), BrainError>,
) -> Result<(), BrainError> {
    ids.iter().try_for_each(|id| check(*id))
}

fn expect_cluster(brain: &Brain, id: NodeId) -> Result<(), BrainError> {
    match brain.kind(id)? {
        NodeKind::Cluster => Ok(()),
        _ => Err(BrainError::NotACluster(id)),
    }
}

fn not_a(node: NodeId, what: &str) -> BrainError {
    BrainError::Malformed(format!("{node} is not a valid {what}"))
}

fn index_arg(brain: &Brain, node: NodeId) -> Result<usize, BrainError> {
    as_int(brain, node)
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| not_a(node, "index"))
}

/// Integers, then doubles, then texts. Equality falls back to identity.
fn compare(
    brain: &Brain,
    op: Comparison,
    a: NodeId,
    b: NodeId,
) -> Result<bool, BrainError> {
    let ordering = if let (Some(x), Some(y)) = (as_int(brain, a), as_int(brain, b)) {
        Some(x.cmp(&y))
    } else if let (Some(x), Some(y)) = (as_double(brain, a), as_double(brain, b)) {
        x.partial_cmp(&y)
    } else if let (Some(x), Some(y)) = (as_text(brain, a), as_text(brain, b)) {
        Some(x.cmp(&y))
    } else {
        None
    };
    match (ordering, op) {
        (Some(ordering), _) => Ok(op.holds(ordering)),
        (None, Comparison::Equal) => Ok(a == b),
        (None, _) => Err(BrainError::Malformed(format!(
            "{a} and {b} cannot be ordered"
        ))),
    }
}
