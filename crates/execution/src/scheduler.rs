//! Ready-queue scheduling over an execution plan.

use crate::dependency::ExecutionPlan;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::num::NonZeroUsize;

/// Hands out plan positions whose predecessors all have an outcome, lowest
/// position first, without exceeding the concurrency budget.
pub struct ResourceScheduler {
    max_concurrent: NonZeroUsize,
    unresolved: Vec<usize>,
    successors: Vec<Vec<usize>>,
    ready: BinaryHeap<Reverse<usize>>,
    active_tasks: usize,
}

impl ResourceScheduler {
    /// Create a scheduler for a plan.
    pub fn new(plan: &ExecutionPlan, max_concurrent: NonZeroUsize) -> Self {
        let unresolved: Vec<usize> = (0..plan.len()).map(|p| plan.predecessors(p).len()).collect();
        let ready = unresolved
            .iter()
            .enumerate()
            .filter(|(_, &n)| n == 0)
            .map(|(p, _)| Reverse(p))
            .collect();

        Self {
            max_concurrent,
            unresolved,
            successors: (0..plan.len()).map(|p| plan.successors(p).to_vec()).collect(),
            ready,
            active_tasks: 0,
        }
    }

    /// Check if we can start another action.
    pub fn can_start(&self) -> bool {
        self.active_tasks < self.max_concurrent.get()
    }

    /// Pop the lowest ready position.
    pub fn next_ready(&mut self) -> Option<usize> {
        self.ready.pop().map(|Reverse(p)| p)
    }

    /// Register an action start.
    pub fn task_started(&mut self) {
        self.active_tasks += 1;
    }

    /// Register the completion of a started action.
    pub fn task_completed(&mut self, position: usize) {
        self.active_tasks = self.active_tasks.saturating_sub(1);
        self.resolve(position);
    }

    /// Mark a position as having an outcome, releasing successors whose
    /// predecessors are now all resolved.
    pub fn resolve(&mut self, position: usize) {
        for &next in &self.successors[position] {
            self.unresolved[next] -= 1;
            if self.unresolved[next] == 0 {
                self.ready.push(Reverse(next));
            }
        }
    }

    /// Number of actions currently running.
    pub fn active(&self) -> usize {
        self.active_tasks
    }
}
