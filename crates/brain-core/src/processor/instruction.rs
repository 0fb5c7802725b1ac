//! # Instruction Set
//!
//! The closed set of operations a program can run, their declared arity and
//! result class, and the optional fast-path capabilities.
//!
//! ## Fast Path
//!
//! Arithmetic, counting and comparison can be computed straight from their
//! argument expressions through `TryAsInt`, `TryAsDouble` and `TryAsBool`,
//! without materialising intermediate result nodes. A fast-path evaluator
//! returns `None` whenever it cannot answer (non-numeric argument, overflow,
//! nested statement without a fast path); the engine then falls back to the
//! generic path.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// =============================================================================
// INSTRUCTION KIND
// =============================================================================

/// Every instruction the engine can execute.
///
/// The discriminant order is the layout of the predefined instruction block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InstructionKind {
    // void
    Delete,
    AddChild,
    InsertChild,
    RemoveChild,
    ReplaceChild,
    MoveChild,
    AddLink,
    RemoveLink,
    ChangeLinkTo,
    ChangeLinkFrom,
    AddInfo,
    Freeze,
    Unfreeze,
    SetValue,
    Assign,
    ClearChildren,
    // single result
    New,
    NewCluster,
    NewInt,
    NewDouble,
    NewText,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    Count,
    GetFirst,
    GetLast,
    GetAt,
    IndexOf,
    GetFirstOut,
    GetMeaning,
    Concat,
    Equal,
    Less,
    Greater,
    Contains,
    // multi result
    GetChildren,
    GetParents,
    GetOutgoing,
    GetIncoming,
    GetInfo,
    Distinct,
    Reverse,
}

/// What an instruction produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstructionClass {
    /// Side effect only.
    Void,
    /// Exactly one result node on success.
    Single,
    /// Zero or more result nodes.
    Multi,
}

/// Declared argument count, checked against the evaluated argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Arity {
    Fixed(usize),
    Variable { min: usize },
}

impl Arity {
    #[must_use]
    pub const fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Fixed(n) => count == n,
            Arity::Variable { min } => count >= min,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "{n}"),
            Arity::Variable { min } => write!(f, "at least {min}"),
        }
    }
}

impl InstructionKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        use InstructionKind as I;
        match self {
            I::Delete => "Delete",
            I::AddChild => "AddChild",
            I::InsertChild => "InsertChild",
            I::RemoveChild => "RemoveChild",
            I::ReplaceChild => "ReplaceChild",
            I::MoveChild => "MoveChild",
            I::AddLink => "AddLink",
            I::RemoveLink => "RemoveLink",
            I::ChangeLinkTo => "ChangeLinkTo",
            I::ChangeLinkFrom => "ChangeLinkFrom",
            I::AddInfo => "AddInfo",
            I::Freeze => "Freeze",
            I::Unfreeze => "Unfreeze",
            I::SetValue => "SetValue",
            I::Assign => "Assign",
            I::ClearChildren => "ClearChildren",
            I::New => "New",
            I::NewCluster => "NewCluster",
            I::NewInt => "NewInt",
            I::NewDouble => "NewDouble",
            I::NewText => "NewText",
            I::Add => "Add",
            I::Subtract => "Subtract",
            I::Multiply => "Multiply",
            I::Divide => "Divide",
            I::Modulus => "Modulus",
            I::Count => "Count",
            I::GetFirst => "GetFirst",
            I::GetLast => "GetLast",
            I::GetAt => "GetAt",
            I::IndexOf => "IndexOf",
            I::GetFirstOut => "GetFirstOut",
            I::GetMeaning => "GetMeaning",
            I::Concat => "Concat",
            I::Equal => "Equal",
            I::Less => "Less",
            I::Greater => "Greater",
            I::Contains => "Contains",
            I::GetChildren => "GetChildren",
            I::GetParents => "GetParents",
            I::GetOutgoing => "GetOutgoing",
            I::GetIncoming => "GetIncoming",
            I::GetInfo => "GetInfo",
            I::Distinct => "Distinct",
            I::Reverse => "Reverse",
        }
    }

    #[must_use]
    pub const fn class(self) -> InstructionClass {
        use InstructionKind as I;
        match self {
            I::Delete
            | I::AddChild
            | I::InsertChild
            | I::RemoveChild
            | I::ReplaceChild
            | I::MoveChild
            | I::AddLink
            | I::RemoveLink
            | I::ChangeLinkTo
            | I::ChangeLinkFrom
            | I::AddInfo
            | I::Freeze
            | I::Unfreeze
            | I::SetValue
            | I::Assign
            | I::ClearChildren => InstructionClass::Void,
            I::GetChildren
            | I::GetParents
            | I::GetOutgoing
            | I::GetIncoming
            | I::GetInfo
            | I::Distinct
            | I::Reverse => InstructionClass::Multi,
            _ => InstructionClass::Single,
        }
    }

    #[must_use]
    pub const fn arity(self) -> Arity {
        use InstructionKind as I;
        match self {
            I::New => Arity::Fixed(0),
            I::NewInt
            | I::NewDouble
            | I::NewText
            | I::GetFirst
            | I::GetLast
            | I::GetMeaning => Arity::Fixed(1),
            I::GetAt
            | I::IndexOf
            | I::GetFirstOut
            | I::Equal
            | I::Less
            | I::Greater
            | I::Contains
            | I::SetValue
            | I::GetOutgoing
            | I::GetIncoming => Arity::Fixed(2),
            I::InsertChild
            | I::ReplaceChild
            | I::MoveChild
            | I::AddLink
            | I::RemoveLink
            | I::GetInfo => Arity::Fixed(3),
            I::ChangeLinkTo | I::ChangeLinkFrom => Arity::Fixed(4),
            I::AddInfo => Arity::Variable { min: 4 },
            I::AddChild
            | I::RemoveChild
            | I::Add
            | I::Subtract
            | I::Multiply
            | I::Divide
            | I::Modulus => Arity::Variable { min: 2 },
            I::Delete
            | I::Freeze
            | I::Unfreeze
            | I::Assign
            | I::ClearChildren
            | I::NewCluster
            | I::Concat
            | I::GetChildren
            | I::GetParents => Arity::Variable { min: 1 },
            I::Count | I::Distinct | I::Reverse => Arity::Variable { min: 0 },
        }
    }

    /// Instructions that change the graph. Every node they receive is
    /// marked changed afterwards, whatever the outcome.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(self.class(), InstructionClass::Void) && !matches!(self, InstructionKind::Assign)
    }

    /// Leading argument expressions passed through unevaluated.
    #[must_use]
    pub const fn raw_args(self) -> usize {
        match self {
            InstructionKind::Assign => 1,
            _ => 0,
        }
    }

    #[must_use]
    pub const fn arithmetic(self) -> Option<Arithmetic> {
        match self {
            InstructionKind::Add => Some(Arithmetic::Add),
            InstructionKind::Subtract => Some(Arithmetic::Subtract),
            InstructionKind::Multiply => Some(Arithmetic::Multiply),
            InstructionKind::Divide => Some(Arithmetic::Divide),
            InstructionKind::Modulus => Some(Arithmetic::Modulus),
            _ => None,
        }
    }

    #[must_use]
    pub const fn comparison(self) -> Option<Comparison> {
        match self {
            InstructionKind::Equal => Some(Comparison::Equal),
            InstructionKind::Less => Some(Comparison::Less),
            InstructionKind::Greater => Some(Comparison::Greater),
            _ => None,
        }
    }

    /// Integer fast path, if this instruction has one.
    #[must_use]
    pub fn as_try_int(self) -> Option<&'static dyn TryAsInt> {
        use InstructionKind as I;
        match self {
            I::Add => Some(&Arithmetic::Add),
            I::Subtract => Some(&Arithmetic::Subtract),
            I::Multiply => Some(&Arithmetic::Multiply),
            I::Divide => Some(&Arithmetic::Divide),
            I::Modulus => Some(&Arithmetic::Modulus),
            I::Count => Some(&Count),
            _ => None,
        }
    }

    /// Floating point fast path, if this instruction has one.
    #[must_use]
    pub fn as_try_double(self) -> Option<&'static dyn TryAsDouble> {
        use InstructionKind as I;
        match self {
            I::Add => Some(&Arithmetic::Add),
            I::Subtract => Some(&Arithmetic::Subtract),
            I::Multiply => Some(&Arithmetic::Multiply),
            I::Divide => Some(&Arithmetic::Divide),
            I::Modulus => Some(&Arithmetic::Modulus),
            _ => None,
        }
    }

    /// Boolean fast path, if this instruction has one.
    #[must_use]
    pub fn as_try_bool(self) -> Option<&'static dyn TryAsBool> {
        match self {
            InstructionKind::Equal => Some(&Comparison::Equal),
            InstructionKind::Less => Some(&Comparison::Less),
            InstructionKind::Greater => Some(&Comparison::Greater),
            _ => None,
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// FAST PATH CAPABILITIES
// =============================================================================

/// Side-effect free evaluation of argument expressions, provided by the
/// engine to the fast-path implementations.
pub trait FastEval {
    fn int_of(&mut self, expr: NodeId) -> Option<i64>;
    fn double_of(&mut self, expr: NodeId) -> Option<f64>;
    fn bool_of(&mut self, expr: NodeId) -> Option<bool>;
    /// How many result nodes the expression would yield.
    fn count_of(&mut self, expr: NodeId) -> Option<usize>;
}

pub trait TryAsInt: Sync {
    fn try_as_int(&self, args: &[NodeId], eval: &mut dyn FastEval) -> Option<i64>;
}

pub trait TryAsDouble: Sync {
    fn try_as_double(&self, args: &[NodeId], eval: &mut dyn FastEval) -> Option<f64>;
}

pub trait TryAsBool: Sync {
    fn try_as_bool(&self, args: &[NodeId], eval: &mut dyn FastEval) -> Option<bool>;
}

/// Left-folded arithmetic over two or more operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arithmetic {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
}

impl Arithmetic {
    /// Checked integer step; `None` on overflow or a zero divisor.
    #[must_use]
    pub fn apply_int(self, a: i64, b: i64) -> Option<i64> {
        match self {
            Arithmetic::Add => a.checked_add(b),
            Arithmetic::Subtract => a.checked_sub(b),
            Arithmetic::Multiply => a.checked_mul(b),
            Arithmetic::Divide => a.checked_div(b),
            Arithmetic::Modulus => a.checked_rem(b),
        }
    }

    /// Floating point step; `None` for a zero divisor.
    #[must_use]
    pub fn apply_double(self, a: f64, b: f64) -> Option<f64> {
        match self {
            Arithmetic::Add => Some(a + b),
            Arithmetic::Subtract => Some(a - b),
            Arithmetic::Multiply => Some(a * b),
            Arithmetic::Divide | Arithmetic::Modulus if b == 0.0 => None,
            Arithmetic::Divide => Some(a / b),
            Arithmetic::Modulus => Some(a % b),
        }
    }

    /// Fold integer operands. `None` unless there are at least two.
    #[must_use]
    pub fn fold_int(self, values: &[i64]) -> Option<i64> {
        let (first, rest) = values.split_first()?;
        if rest.is_empty() {
            return None;
        }
        rest.iter().try_fold(*first, |acc, v| self.apply_int(acc, *v))
    }

    /// Fold floating point operands. `None` unless there are at least two.
    #[must_use]
    pub fn fold_double(self, values: &[f64]) -> Option<f64> {
        let (first, rest) = values.split_first()?;
        if rest.is_empty() {
            return None;
        }
        rest.iter().try_fold(*first, |acc, v| self.apply_double(acc, *v))
    }
}

impl TryAsInt for Arithmetic {
    fn try_as_int(&self, args: &[NodeId], eval: &mut dyn FastEval) -> Option<i64> {
        let values = args
            .iter()
            .map(|arg| eval.int_of(*arg))
            .collect::<Option<Vec<_>>>()?;
        self.fold_int(&values)
    }
}

impl TryAsDouble for Arithmetic {
    fn try_as_double(&self, args: &[NodeId], eval: &mut dyn FastEval) -> Option<f64> {
        let values = args
            .iter()
            .map(|arg| eval.double_of(*arg))
            .collect::<Option<Vec<_>>>()?;
        self.fold_double(&values)
    }
}

/// Number of evaluated arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Count;

impl TryAsInt for Count {
    fn try_as_int(&self, args: &[NodeId], eval: &mut dyn FastEval) -> Option<i64> {
        let mut total = 0usize;
        for arg in args {
            total = total.checked_add(eval.count_of(*arg)?)?;
        }
        i64::try_from(total).ok()
    }
}

/// Binary comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    Less,
    Greater,
}

impl Comparison {
    #[must_use]
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Equal => ordering == Ordering::Equal,
            Comparison::Less => ordering == Ordering::Less,
            Comparison::Greater => ordering == Ordering::Greater,
        }
    }
}

impl TryAsBool for Comparison {
    fn try_as_bool(&self, args: &[NodeId], eval: &mut dyn FastEval) -> Option<bool> {
        let [left, right] = args else {
            return None;
        };
        if let (Some(a), Some(b)) = (eval.int_of(*left), eval.int_of(*right)) {
            return Some(self.holds(a.cmp(&b)));
        }
        let a = eval.double_of(*left)?;
        let b = eval.double_of(*right)?;
        a.partial_cmp(&b).map(|ordering| self.holds(ordering))
    }
}

// =============================================================================
// TESTS
// =============================================================================
