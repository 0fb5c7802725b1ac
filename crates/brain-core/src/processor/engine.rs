//! # Processor
//!
//! Executes programs stored as nodes of the Brain.
//!
//! ## Program Encoding
//!
//! - `Statement` / `ResultStatement` nodes link to an Instruction node with
//!   meaning `INSTRUCTION` and to an argument cluster with meaning
//!   `ARGUMENTS`. A `Statement` discards its results.
//! - `Variable` nodes evaluate to the list last assigned with `Assign`.
//! - Any other node evaluates to itself.
//! - A code block is a cluster with meaning `CODE`, run in child order.
//!
//! ## Evaluation
//!
//! Each instruction evaluation pushes a frame, evaluates its argument
//! expressions into it, pops it, runs the instruction on the popped
//! arguments and appends its results to the caller's frame. Result
//! statements first try the fast path, which computes arithmetic, counts
//! and comparisons without materialising nested results.
//!
//! ## Errors
//!
//! Malformed programs are reported to the diagnostics sink, tagged
//! `Instruction@#statement`, and yield no result. Only invariant violations
//! propagate as `Err`.

use super::coerce;
use super::instruction::{FastEval, InstructionKind};
use super::stack::{FrameStack, StackStats};
use crate::diagnostics::{Diagnostics, TracingDiagnostics};
use crate::graph::Brain;
use crate::memory::ReclaimReport;
use crate::primitives::{ARGUMENTS, CODE, INSTRUCTION};
use crate::{BrainError, NodeData, NodeId, NodeKind, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of one top-level execution.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ExecutionResult {
    /// Result nodes in production order.
    pub results: Vec<NodeId>,
    /// Whether the graph was changed, including by an instruction that
    /// failed part-way through its operands.
    pub mutated: bool,
}

/// A single-threaded execution context over a shared Brain.
///
/// Owns the temporaries it creates; `finish` (or drop) releases them.
pub struct Processor {
    pub(super) brain: Arc<Brain>,
    diagnostics: Arc<dyn Diagnostics>,
    stack: FrameStack,
    temps: Vec<NodeId>,
    pub(super) variables: HashMap<NodeId, Vec<NodeId>>,
    depth: usize,
    pub(super) mutated: bool,
    memo: FastMemo,
}

/// Fast-path values of result statements, valid for one fast evaluation.
#[derive(Debug, Default)]
struct FastMemo {
    ints: HashMap<NodeId, Option<i64>>,
    doubles: HashMap<NodeId, Option<f64>>,
    bools: HashMap<NodeId, Option<bool>>,
    counts: HashMap<NodeId, Option<usize>>,
}

impl FastMemo {
    fn clear(&mut self) {
        self.ints.clear();
        self.doubles.clear();
        self.bools.clear();
        self.counts.clear();
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("temps", &self.temps.len())
            .field("variables", &self.variables.len())
            .field("stack", &self.stack.stats())
            .finish_non_exhaustive()
    }
}

impl Processor {
    /// Processor reporting through `tracing`.
    #[must_use]
    pub fn new(brain: Arc<Brain>) -> Self {
        Self::with_diagnostics(brain, Arc::new(TracingDiagnostics))
    }

    #[must_use]
    pub fn with_diagnostics(brain: Arc<Brain>, diagnostics: Arc<dyn Diagnostics>) -> Self {
        Self {
            brain,
            diagnostics,
            stack: FrameStack::default(),
            temps: Vec::new(),
            variables: HashMap::new(),
            depth: 0,
            mutated: false,
            memo: FastMemo::default(),
        }
    }

    #[must_use]
    pub fn brain(&self) -> &Arc<Brain> {
        &self.brain
    }

    // =========================================================================
    // ENTRY POINTS
    // =========================================================================

    /// Run `instruction` on the given argument expressions.
    pub fn execute(
        &mut self,
        instruction: NodeId,
        args: &[NodeId],
    ) -> Result<ExecutionResult, BrainError> {
        let kind = match self.instruction_kind(instruction) {
            Ok(kind) => kind,
            Err(e) => {
                self.report(&format!("execute@{instruction}"), &e)?;
                return Ok(ExecutionResult::default());
            }
        };
        self.run_root(|p| p.eval_instruction(kind, args, instruction))
    }

    /// Evaluate one expression and return what it yields.
    pub fn evaluate(&mut self, expr: NodeId) -> Result<Vec<NodeId>, BrainError> {
        Ok(self.run_root(|p| p.eval_reported(expr))?.results)
    }

    /// Run a `Statement` or `ResultStatement` node.
    pub fn run_statement(&mut self, statement: NodeId) -> Result<ExecutionResult, BrainError> {
        match self.brain.kind(statement) {
            Ok(NodeKind::Statement | NodeKind::ResultStatement) => {
                self.run_root(|p| p.eval_reported(statement))
            }
            Ok(found) => {
                let e = BrainError::KindMismatch {
                    node: statement,
                    expected: "statement",
                    found,
                };
                self.report(&format!("run@{statement}"), &e)?;
                Ok(ExecutionResult::default())
            }
            Err(e) => {
                self.report(&format!("run@{statement}"), &e)?;
                Ok(ExecutionResult::default())
            }
        }
    }

    /// Run every child of a `CODE` cluster in order.
    pub fn run_block(&mut self, block: NodeId) -> Result<ExecutionResult, BrainError> {
        let tag = format!("block@{block}");
        let statements = match self.block_statements(block) {
            Ok(statements) => statements,
            Err(e) => {
                self.report(&tag, &e)?;
                return Ok(ExecutionResult::default());
            }
        };
        tracing::debug!(block = %block, statements = statements.len(), "running block");
        self.run_root(|p| {
            for statement in &statements {
                p.eval_reported(*statement)?;
            }
            Ok(())
        })
    }

    fn block_statements(&self, block: NodeId) -> Result<Vec<NodeId>, BrainError> {
        let meaning = self.brain.meaning_of(block)?;
        if meaning != CODE {
            return Err(BrainError::Malformed(format!(
                "{block} is not a code block (meaning {meaning})"
            )));
        }
        self.brain.children(block)
    }

    /// Integer value of an expression via the fast path, without creating nodes.
    pub fn try_eval_int(&mut self, expr: NodeId) -> Option<i64> {
        self.fast_scope(|p| p.int_of(expr))
    }

    /// Floating point value of an expression via the fast path.
    pub fn try_eval_double(&mut self, expr: NodeId) -> Option<f64> {
        self.fast_scope(|p| p.double_of(expr))
    }

    /// Boolean value of an expression via the fast path.
    pub fn try_eval_bool(&mut self, expr: NodeId) -> Option<bool> {
        self.fast_scope(|p| p.bool_of(expr))
    }

    // =========================================================================
    // STATE
    // =========================================================================

    /// Current contents of a variable.
    #[must_use]
    pub fn variable(&self, variable: NodeId) -> Option<&[NodeId]> {
        self.variables.get(&variable).map(Vec::as_slice)
    }

    /// Temporaries owned by this processor.
    #[must_use]
    pub fn temps(&self) -> &[NodeId] {
        &self.temps
    }

    /// Take ownership of `id` as a temporary.
    pub fn make_temp(&mut self, id: NodeId) {
        self.brain.make_temp(id);
        self.temps.push(id);
    }

    #[must_use]
    pub fn stack_stats(&self) -> StackStats {
        self.stack.stats()
    }

    /// Frames currently on the stack; zero between executions.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.depth()
    }

    /// Release this processor's temporaries and clear its variables.
    /// Safe to call more than once.
    pub fn finish(&mut self) -> ReclaimReport {
        self.variables.clear();
        let temps = std::mem::take(&mut self.temps);
        if temps.is_empty() {
            return ReclaimReport::default();
        }
        self.brain.release_temps(&temps)
    }

    // =========================================================================
    // EVALUATION
    // =========================================================================

    fn run_root(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<(), BrainError>,
    ) -> Result<ExecutionResult, BrainError> {
        let brain = Arc::clone(&self.brain);
        self.mutated = false;
        self.depth = 0;
        self.stack.push(brain.pool());
        let outcome = body(self);
        let frame = self.stack.pop()?;
        let results = frame.clone();
        brain.pool().give_back(frame);
        outcome?;
        Ok(ExecutionResult {
            results,
            mutated: self.mutated,
        })
    }

    /// `eval_expression` at the top level, where there is no enclosing
    /// instruction to fail.
    fn eval_reported(&mut self, expr: NodeId) -> Result<(), BrainError> {
        match self.eval_expression(expr) {
            Err(e) if !e.is_hard() => self.report(&format!("evaluate@{expr}"), &e),
            outcome => outcome,
        }
    }

    /// Append what `expr` yields to the top frame. An unknown id fails the
    /// enclosing instruction rather than shifting its operands.
    fn eval_expression(&mut self, expr: NodeId) -> Result<(), BrainError> {
        let kind = self.brain.kind(expr)?;
        match kind {
            NodeKind::Statement | NodeKind::ResultStatement => self.eval_statement(expr, kind),
            NodeKind::Variable => {
                let values = self.variables.get(&expr).cloned().unwrap_or_default();
                self.stack.emit(&values)
            }
            _ => self.stack.emit(&[expr]),
        }
    }

    fn eval_statement(&mut self, statement: NodeId, kind: NodeKind) -> Result<(), BrainError> {
        if self.depth >= self.brain.config().max_eval_depth {
            let e = BrainError::Malformed(format!(
                "evaluation deeper than {}",
                self.brain.config().max_eval_depth
            ));
            return self.report(&format!("evaluate@{statement}"), &e);
        }
        let (instruction, args) = match self.decode(statement) {
            Ok(decoded) => decoded,
            Err(e) => return self.report(&format!("decode@{statement}"), &e),
        };

        self.depth += 1;
        let outcome = if kind == NodeKind::ResultStatement {
            match self.try_fast(instruction, &args) {
                Some(node) => self.stack.emit(&[node]),
                None => self.eval_instruction(instruction, &args, statement),
            }
        } else {
            self.eval_discarding(instruction, &args, statement)
        };
        self.depth -= 1;
        outcome
    }

    fn eval_discarding(
        &mut self,
        kind: InstructionKind,
        args: &[NodeId],
        origin: NodeId,
    ) -> Result<(), BrainError> {
        let brain = Arc::clone(&self.brain);
        self.stack.push(brain.pool());
        let outcome = self.eval_instruction(kind, args, origin);
        brain.pool().give_back(self.stack.pop()?);
        outcome
    }

    /// Evaluate arguments in a fresh frame, run the instruction, append its
    /// results to the caller's frame.
    fn eval_instruction(
        &mut self,
        kind: InstructionKind,
        arg_exprs: &[NodeId],
        origin: NodeId,
    ) -> Result<(), BrainError> {
        let brain = Arc::clone(&self.brain);
        let pool = brain.pool();

        self.stack.push(pool);
        let evaluated = self.eval_args(kind, arg_exprs);
        let args = self.stack.pop()?;

        let mut out = pool.take();
        let outcome = evaluated.and_then(|()| self.apply(kind, &args, &mut out));
        if kind.is_mutating() {
            self.touch(&args);
        }
        let result = match outcome {
            Ok(()) => {
                if kind.is_mutating() {
                    self.mutated = true;
                }
                self.stack.emit(&out)
            }
            Err(e) => self.report(&format!("{}@{}", kind.name(), origin), &e),
        };

        pool.give_back(out);
        pool.give_back(args);
        result
    }

    fn eval_args(&mut self, kind: InstructionKind, exprs: &[NodeId]) -> Result<(), BrainError> {
        let raw = kind.raw_args().min(exprs.len());
        let (passed, evaluated) = exprs.split_at(raw);
        self.stack.emit(passed)?;
        for expr in evaluated {
            self.eval_expression(*expr)?;
        }
        Ok(())
    }

    fn try_fast(&mut self, kind: InstructionKind, args: &[NodeId]) -> Option<NodeId> {
        if let Some(op) = kind.as_try_bool() {
            return self
                .fast_scope(|p| op.try_as_bool(args, p))
                .map(coerce::bool_node);
        }
        let int = kind
            .as_try_int()
            .and_then(|op| self.fast_scope(|p| op.try_as_int(args, p)));
        if let Some(v) = int {
            return Some(self.new_temp(NodeData::Int(v)));
        }
        let op = kind.as_try_double()?;
        let v = self.fast_scope(|p| op.try_as_double(args, p))?;
        Some(self.new_temp(NodeData::Double(v)))
    }

    fn fast_scope<T>(&mut self, eval: impl FnOnce(&mut Self) -> T) -> T {
        self.memo.clear();
        let out = eval(self);
        self.memo.clear();
        out
    }

    /// Instruction and argument expressions of a statement node.
    pub(super) fn decode(
        &self,
        statement: NodeId,
    ) -> Result<(InstructionKind, Vec<NodeId>), BrainError> {
        let links = self.brain.links_out(statement)?;
        let instruction = links
            .iter()
            .find(|key| key.meaning == INSTRUCTION)
            .map(|key| key.to)
            .ok_or_else(|| {
                BrainError::Malformed(format!("{statement} has no instruction link"))
            })?;
        let kind = self.instruction_kind(instruction)?;
        let args = match links.iter().find(|key| key.meaning == ARGUMENTS) {
            Some(key) => self.brain.children(key.to)?,
            None => Vec::new(),
        };
        Ok((kind, args))
    }

    fn instruction_kind(&self, instruction: NodeId) -> Result<InstructionKind, BrainError> {
        match self.brain.value(instruction)? {
            Value::Instruction(kind) => Ok(kind),
            _ => Err(BrainError::KindMismatch {
                node: instruction,
                expected: "instruction",
                found: self.brain.kind(instruction)?,
            }),
        }
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Create a node owned by this processor.
    pub(super) fn new_temp(&mut self, data: NodeData) -> NodeId {
        let id = self.brain.create(data);
        self.make_temp(id);
        id
    }

    fn touch(&self, nodes: &[NodeId]) {
        for id in nodes {
            // Nodes deleted by the instruction itself are gone; nothing to mark.
            let _ = self.brain.mark_changed(*id);
        }
    }

    /// Send a recoverable error to the sink; hand hard failures back.
    fn report(&self, tag: &str, error: &BrainError) -> Result<(), BrainError> {
        if error.is_hard() {
            tracing::error!(tag, error = %error, "aborting evaluation");
            return Err(error.clone());
        }
        self.diagnostics.log_error(tag, &error.to_string());
        Ok(())
    }

    pub(super) fn warn(&self, tag: &str, message: &str) {
        self.diagnostics.log_warning(tag, message);
    }

    fn single_variable(&self, variable: NodeId) -> Option<NodeId> {
        match self.variables.get(&variable)?.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    fn fast_nested<T>(
        &mut self,
        expr: NodeId,
        eval: impl FnOnce(InstructionKind, &[NodeId], &mut Self) -> Option<T>,
    ) -> Option<T> {
        if self.depth >= self.brain.config().max_eval_depth {
            return None;
        }
        let (kind, args) = self.decode(expr).ok()?;
        self.depth += 1;
        let out = eval(kind, &args, self);
        self.depth -= 1;
        out
    }
}

// =============================================================================
// FAST PATH EVALUATION
// =============================================================================

impl FastEval for Processor {
    fn int_of(&mut self, expr: NodeId) -> Option<i64> {
        match self.brain.kind(expr).ok()? {
            NodeKind::Variable => {
                let value = self.single_variable(expr)?;
                self.int_of(value)
            }
            NodeKind::ResultStatement => {
                if let Some(hit) = self.memo.ints.get(&expr) {
                    return *hit;
                }
                let v = self.fast_nested(expr, |kind, args, p| {
                    kind.as_try_int()?.try_as_int(args, p)
                });
                self.memo.ints.insert(expr, v);
                v
            }
            NodeKind::Statement => None,
            _ => coerce::as_int(&self.brain, expr),
        }
    }

    fn double_of(&mut self, expr: NodeId) -> Option<f64> {
        match self.brain.kind(expr).ok()? {
            NodeKind::Variable => {
                let value = self.single_variable(expr)?;
                self.double_of(value)
            }
            NodeKind::ResultStatement => {
                if let Some(hit) = self.memo.doubles.get(&expr) {
                    return *hit;
                }
                let v = match self.int_of(expr) {
                    Some(v) => Some(v as f64),
                    None => self.fast_nested(expr, |kind, args, p| {
                        kind.as_try_double()?.try_as_double(args, p)
                    }),
                };
                self.memo.doubles.insert(expr, v);
                v
            }
            NodeKind::Statement => None,
            _ => coerce::as_double(&self.brain, expr),
        }
    }

    fn bool_of(&mut self, expr: NodeId) -> Option<bool> {
        match self.brain.kind(expr).ok()? {
            NodeKind::Variable => {
                let value = self.single_variable(expr)?;
                self.bool_of(value)
            }
            NodeKind::ResultStatement => {
                if let Some(hit) = self.memo.bools.get(&expr) {
                    return *hit;
                }
                let v = self.fast_nested(expr, |kind, args, p| {
                    kind.as_try_bool()?.try_as_bool(args, p)
                });
                self.memo.bools.insert(expr, v);
                v
            }
            NodeKind::Statement => None,
            _ => coerce::as_bool(&self.brain, expr),
        }
    }

    fn count_of(&mut self, expr: NodeId) -> Option<usize> {
        match self.brain.kind(expr).ok()? {
            NodeKind::Variable => Some(self.variables.get(&expr).map_or(0, Vec::len)),
            // Its effects only happen on the generic path.
            NodeKind::Statement => None,
            NodeKind::ResultStatement => {
                if let Some(hit) = self.memo.counts.get(&expr) {
                    return *hit;
                }
                let yields_one = self.int_of(expr).is_some()
                    || self.double_of(expr).is_some()
                    || self.bool_of(expr).is_some();
                let count = yields_one.then_some(1);
                self.memo.counts.insert(expr, count);
                count
            }
            _ => Some(1),
        }
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        let report = self.finish();
        if report.candidates > 0 {
            tracing::debug!(reclaimed = report.reclaimed, "processor dropped");
        }
    }
}
