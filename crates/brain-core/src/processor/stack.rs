//! Argument/result frame stack of a processor.
//!
//! Frames are pooled id lists. Each push is matched by a pop in the same
//! function, on success and error paths alike; `StackStats` lets tests check.

use crate::memory::ListPool;
use crate::{BrainError, NodeId};
use serde::Serialize;

/// Push/pop counters of one processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StackStats {
    pub pushes: u64,
    pub pops: u64,
    pub max_depth: usize,
}

impl StackStats {
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.pushes == self.pops
    }
}

#[derive(Debug, Default)]
pub(crate) struct FrameStack {
    frames: Vec<Vec<NodeId>>,
    stats: StackStats,
}

impl FrameStack {
    pub(crate) fn push(&mut self, pool: &ListPool) {
        self.frames.push(pool.take());
        self.stats.pushes += 1;
        self.stats.max_depth = self.stats.max_depth.max(self.frames.len());
    }

    /// Pop the top frame. The caller gives the buffer back to the pool.
    pub(crate) fn pop(&mut self) -> Result<Vec<NodeId>, BrainError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| BrainError::InvariantViolation("pop on empty frame stack".into()))?;
        self.stats.pops += 1;
        Ok(frame)
    }

    /// Append to the top frame.
    pub(crate) fn emit(&mut self, items: &[NodeId]) -> Result<(), BrainError> {
        let top = self
            .frames
            .last_mut()
            .ok_or_else(|| BrainError::InvariantViolation("emit without a frame".into()))?;
        top.extend_from_slice(items);
        Ok(())
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn stats(&self) -> StackStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_come_from_the_pool_and_balance() {
        let pool = ListPool::new(4);
        let mut stack = FrameStack::default();
        stack.push(&pool);
        stack.emit(&[NodeId(1)]).expect("emit");
        stack.push(&pool);
        assert_eq!(stack.depth(), 2);

        pool.give_back(stack.pop().expect("inner"));
        let outer = stack.pop().expect("outer");
        assert_eq!(outer, vec![NodeId(1)]);
        pool.give_back(outer);

        let stats = stack.stats();
        assert!(stats.is_balanced());
        assert_eq!(stats.max_depth, 2);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn empty_stack_is_an_invariant_violation() {
        let mut stack = FrameStack::default();
        assert!(matches!(stack.pop(), Err(BrainError::InvariantViolation(_))));
        assert!(stack.emit(&[NodeId(1)]).is_err());
    }
}
