//! Task dependency graph and tick-order scheduling (§4.6).
//!
//! Tasks form a DAG; [`Scheduler::tick`] walks it in topological order via
//! Kahn's algorithm, recomputed lazily and cached until the next graph
//! mutation invalidates it. Adding an edge that would close a cycle is
//! rejected up front by a reachability check rather than discovered after
//! the fact, so the graph is never left in a state `tick` can get stuck on
//! — the same "reject, don't repair" posture the teacher crate's own
//! `scheduler/mod.rs` takes towards invalid system ordering.

use slab::Slab;
use smallvec::SmallVec;

use crate::error::SchedulerError;

/// Identifies one task node. Stable across `tick`, invalidated by
/// [`Scheduler::remove_task`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(usize);

struct TaskNode<F> {
    /// `None` for a pure synchronisation point — a node that exists only to
    /// order its successors after its predecessors, with no per-tick work
    /// of its own (§4.6: "nodes without thunks exist purely as
    /// synchronisation points", used by §4.7's passive systems).
    thunk: Option<F>,
    predecessors: SmallVec<[TaskId; 4]>,
    successors: SmallVec<[TaskId; 4]>,
}

/// Runs a set of callbacks in dependency order every [`Scheduler::tick`].
pub struct Scheduler<F> {
    tasks: Slab<TaskNode<F>>,
    order: Option<Vec<TaskId>>,
}

impl<F> Default for Scheduler<F> {
    fn default() -> Self {
        Scheduler {
            tasks: Slab::new(),
            order: None,
        }
    }
}

impl<F> Scheduler<F> {
    pub fn new() -> Self {
        Scheduler::default()
    }

    /// Registers a new task with no edges yet. Use
    /// [`Scheduler::add_dependency`] to order it relative to others.
    ///
    /// `thunk` is `None` for a synchronisation-only node (§4.6).
    pub fn create_task(&mut self, thunk: Option<F>) -> TaskId {
        let key = self.tasks.insert(TaskNode {
            thunk,
            predecessors: SmallVec::new(),
            successors: SmallVec::new(),
        });
        self.order = None;
        TaskId(key)
    }

    /// Whether `task` currently names a node in the graph.
    pub fn contains(&self, task: TaskId) -> bool {
        self.tasks.contains(task.0)
    }

    /// Declares that `task` must run after `predecessor`.
    ///
    /// Rejected with [`SchedulerError::WouldCycle`], leaving the graph
    /// unchanged, if `predecessor` is already reachable from `task` —
    /// i.e. the edge would close a cycle.
    pub fn add_dependency(&mut self, task: TaskId, predecessor: TaskId) -> Result<(), SchedulerError> {
        if !self.tasks.contains(task.0) || !self.tasks.contains(predecessor.0) {
            return Err(SchedulerError::UnknownPredecessor);
        }
        if task == predecessor || self.is_reachable(task, predecessor) {
            return Err(SchedulerError::WouldCycle);
        }

        self.tasks[task.0].predecessors.push(predecessor);
        self.tasks[predecessor.0].successors.push(task);
        self.order = None;
        Ok(())
    }

    /// Whether `target` is reachable from `from` by following successor
    /// edges — used to reject edges that would close a cycle before they
    /// are ever added.
    fn is_reachable(&self, from: TaskId, target: TaskId) -> bool {
        let mut stack = vec![from];
        let mut seen: SmallVec<[TaskId; 16]> = SmallVec::new();
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if seen.contains(&node) {
                continue;
            }
            seen.push(node);
            if let Some(task) = self.tasks.get(node.0) {
                stack.extend(task.successors.iter().copied());
            }
        }
        false
    }

    /// Removes `task`. Fails with [`SchedulerError::TaskDepended`] if any
    /// other task still lists it as a predecessor — callers must remove
    /// dependents first, working from the leaves inward.
    pub fn remove_task(&mut self, task: TaskId) -> Result<Option<F>, SchedulerError> {
        let node = self.tasks.get(task.0).ok_or(SchedulerError::UnknownPredecessor)?;
        if !node.successors.is_empty() {
            return Err(SchedulerError::TaskDepended);
        }
        Ok(self.detach(task))
    }

    /// Unlinks `task` from both its predecessors' and successors' edge
    /// lists and removes it, returning its thunk. Used both by
    /// [`Scheduler::remove_task`] (after the `TaskDepended` check) and by
    /// [`Scheduler::tick`] for a thunk that requested its own removal —
    /// the latter bypasses the successors check, since a node asking to be
    /// dropped at the end of the tick it just ran in is a different
    /// contract than a caller-initiated `remove_task`.
    fn detach(&mut self, task: TaskId) -> Option<F> {
        let Some(node) = self.tasks.try_remove(task.0) else {
            return None;
        };
        for predecessor in &node.predecessors {
            if let Some(pred_node) = self.tasks.get_mut(predecessor.0) {
                pred_node.successors.retain(|&id| id != task);
            }
        }
        for successor in &node.successors {
            if let Some(succ_node) = self.tasks.get_mut(successor.0) {
                succ_node.predecessors.retain(|&id| id != task);
            }
        }
        self.order = None;
        node.thunk
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// (Re)computes the topological order via Kahn's algorithm. Only
    /// needed internally after a graph mutation invalidates the cached
    /// order; exposed so callers can pre-warm it outside a hot loop.
    pub fn recompute_order(&mut self) {
        let mut in_degree: Vec<(usize, usize)> = self
            .tasks
            .iter()
            .map(|(key, node)| (key, node.predecessors.len()))
            .collect();
        let mut ready: Vec<usize> = in_degree
            .iter()
            .filter(|&&(_, degree)| degree == 0)
            .map(|&(key, _)| key)
            .collect();

        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(key) = ready.pop() {
            order.push(TaskId(key));
            for &successor in &self.tasks[key].successors {
                if let Some(entry) = in_degree.iter_mut().find(|(k, _)| *k == successor.0) {
                    entry.1 -= 1;
                    if entry.1 == 0 {
                        ready.push(successor.0);
                    }
                }
            }
        }

        debug_assert_eq!(
            order.len(),
            self.tasks.len(),
            "graph mutations are cycle-checked on insert; a partial topo sort means that invariant broke"
        );

        self.order = Some(order);
    }

    /// Runs `apply` against each task's thunk, in topological order. Nodes
    /// without a thunk are skipped entirely (pure synchronisation points).
    ///
    /// `apply` returns `true` to request the node's own removal at the end
    /// of this tick (§4.6: a thunk returning `true` is absent from the
    /// following tick). Removal is deferred until every task in this tick
    /// has run — the topological order is immutable for the duration of
    /// one `tick` (§5).
    pub fn tick(&mut self, mut apply: impl FnMut(TaskId, &mut F) -> bool) {
        if self.order.is_none() {
            self.recompute_order();
        }
        let order = self.order.clone().unwrap_or_default();
        let mut to_remove = SmallVec::<[TaskId; 4]>::new();
        for task_id in order {
            if let Some(node) = self.tasks.get_mut(task_id.0) {
                if let Some(thunk) = node.thunk.as_mut() {
                    if apply(task_id, thunk) {
                        to_remove.push(task_id);
                    }
                }
            }
        }
        for task_id in to_remove {
            self.detach(task_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_runs_in_dependency_order() {
        let mut scheduler: Scheduler<u32> = Scheduler::new();
        let a = scheduler.create_task(Some(1));
        let b = scheduler.create_task(Some(2));
        let c = scheduler.create_task(Some(3));
        scheduler.add_dependency(b, a).unwrap();
        scheduler.add_dependency(c, b).unwrap();

        let mut order = Vec::new();
        scheduler.tick(|id, _| {
            order.push(id);
            false
        });
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn add_dependency_rejects_cycle() {
        let mut scheduler: Scheduler<u32> = Scheduler::new();
        let a = scheduler.create_task(Some(1));
        let b = scheduler.create_task(Some(2));
        scheduler.add_dependency(b, a).unwrap();
        assert_eq!(scheduler.add_dependency(a, b), Err(SchedulerError::WouldCycle));
    }

    #[test]
    fn remove_task_rejects_while_depended_on() {
        let mut scheduler: Scheduler<u32> = Scheduler::new();
        let a = scheduler.create_task(Some(1));
        let b = scheduler.create_task(Some(2));
        scheduler.add_dependency(b, a).unwrap();
        assert_eq!(scheduler.remove_task(a), Err(SchedulerError::TaskDepended));
        scheduler.remove_task(b).unwrap();
        scheduler.remove_task(a).unwrap();
    }

    #[test]
    fn thunk_returning_true_self_removes_after_parents_run() {
        let mut scheduler: Scheduler<Box<dyn FnMut() -> bool>> = Scheduler::new();
        let a = scheduler.create_task(Some(Box::new(|| false)));
        let b = scheduler.create_task(Some(Box::new(|| false)));
        let c = scheduler.create_task(Some(Box::new(|| true)));
        scheduler.add_dependency(c, a).unwrap();
        scheduler.add_dependency(c, b).unwrap();

        let mut ran = Vec::new();
        scheduler.tick(|id, thunk| {
            ran.push(id);
            thunk()
        });
        assert_eq!(ran.last(), Some(&c), "c must run after both of its parents");
        assert_eq!(ran.len(), 3);
        assert_eq!(scheduler.len(), 2);

        let mut ran_again = Vec::new();
        scheduler.tick(|id, thunk| {
            ran_again.push(id);
            thunk()
        });
        assert_eq!(ran_again.len(), 2);
        assert!(!ran_again.contains(&c), "c self-removed and must be absent from the next tick");
    }

    #[test]
    fn synchronisation_node_without_thunk_is_skipped() {
        let mut scheduler: Scheduler<u32> = Scheduler::new();
        let parent = scheduler.create_task(None);
        let child = scheduler.create_task(Some(1));
        scheduler.add_dependency(child, parent).unwrap();

        let mut seen = Vec::new();
        scheduler.tick(|id, value| {
            seen.push((id, *value));
            false
        });
        assert_eq!(seen, vec![(child, 1)]);
    }
}
