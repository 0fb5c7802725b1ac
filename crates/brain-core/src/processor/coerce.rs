//! Value coercion helpers.
//!
//! Pure reads. A node that cannot be interpreted yields `None`, never a
//! sentinel, so callers can tell "computed 0" from "no value".

use crate::graph::Brain;
use crate::primitives::{FALSE, TRUE};
use crate::{NodeId, Value};

/// Integer view: Int nodes and Text that parses as an integer.
#[must_use]
pub fn as_int(brain: &Brain, id: NodeId) -> Option<i64> {
    match brain.value(id).ok()? {
        Value::Int(v) => Some(v),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Floating point view: Double, Int, and numeric Text.
#[must_use]
pub fn as_double(brain: &Brain, id: NodeId) -> Option<f64> {
    match brain.value(id).ok()? {
        Value::Double(v) => Some(v),
        Value::Int(v) => Some(v as f64),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Boolean view: the TRUE/FALSE nodes, integers (non-zero is true) and
/// the texts "true"/"false".
#[must_use]
pub fn as_bool(brain: &Brain, id: NodeId) -> Option<bool> {
    if id == TRUE {
        return Some(true);
    }
    if id == FALSE {
        return Some(false);
    }
    match brain.value(id).ok()? {
        Value::Int(v) => Some(v != 0),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Text view of scalar nodes.
#[must_use]
pub fn as_text(brain: &Brain, id: NodeId) -> Option<String> {
    match brain.value(id).ok()? {
        Value::Text(s) => Some(s),
        Value::Int(v) => Some(v.to_string()),
        Value::Double(v) => Some(v.to_string()),
        _ => None,
    }
}

/// The predefined node for a boolean.
#[must_use]
pub const fn bool_node(value: bool) -> NodeId {
    if value { TRUE } else { FALSE }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeData;

    #[test]
    fn mismatched_kinds_yield_none() {
        let brain = Brain::default();
        let neuron = brain.create(NodeData::Neuron);
        let zero = brain.create(NodeData::Int(0));
        assert_eq!(as_int(&brain, neuron), None);
        assert_eq!(as_int(&brain, zero), Some(0));
        assert_eq!(as_double(&brain, NodeId(999_999)), None);
    }

    #[test]
    fn text_parses_when_numeric() {
        let brain = Brain::default();
        let t = brain.create(NodeData::Text(" 42 ".into()));
        let x = brain.create(NodeData::Text("abc".into()));
        assert_eq!(as_int(&brain, t), Some(42));
        assert_eq!(as_double(&brain, t), Some(42.0));
        assert_eq!(as_int(&brain, x), None);
        assert_eq!(as_text(&brain, x).as_deref(), Some("abc"));
    }

    #[test]
    fn booleans() {
        let brain = Brain::default();
        let one = brain.create(NodeData::Int(1));
        let d = brain.create(NodeData::Double(1.0));
        assert_eq!(as_bool(&brain, TRUE), Some(true));
        assert_eq!(as_bool(&brain, FALSE), Some(false));
        assert_eq!(as_bool(&brain, one), Some(true));
        assert_eq!(as_bool(&brain, d), None);
        assert_eq!(bool_node(true), TRUE);
    }
}
