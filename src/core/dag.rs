//! Subtask DAG (Directed Acyclic Graph) for dependency management.
//!
//! This module provides the SubtaskDag structure that represents subtask
//! dependencies as a directed acyclic graph. Topology is written once by
//! the decomposer (plus bounded hierarchical expansions); per-subtask state
//! lives behind individual locks so the scheduler and supervisor never
//! contend on a whole-graph lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::core::subtask::{Subtask, SubtaskId};
use crate::error::{Error, Result};

/// Type of dependency between subtasks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Plain ordering: the dependency must be accepted first.
    Ordering,
    /// The dependent consumes the accepted output of the dependency.
    DataFlow,
}

impl Default for DependencyKind {
    fn default() -> Self {
        Self::Ordering
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyKind::Ordering => write!(f, "ordering"),
            DependencyKind::DataFlow => write!(f, "data_flow"),
        }
    }
}

/// The subtask dependency graph.
///
/// SubtaskDag uses petgraph's DiGraph for topology. Node weights are
/// subtask ids; the mutable subtask records are held separately, each
/// behind its own `RwLock`, so state updates take per-subtask locks only.
pub struct SubtaskDag {
    /// The underlying directed graph (edges point dependency -> dependent).
    graph: DiGraph<SubtaskId, DependencyKind>,
    /// Index mapping from SubtaskId to NodeIndex for fast lookups.
    index: HashMap<SubtaskId, NodeIndex>,
    /// Per-subtask records, individually locked.
    records: HashMap<SubtaskId, Arc<RwLock<Subtask>>>,
}

impl SubtaskDag {
    /// Create a new empty SubtaskDag.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
            records: HashMap::new(),
        }
    }

    /// Add a subtask to the DAG.
    ///
    /// Returns the NodeIndex for the added subtask. If the subtask already
    /// exists (same id), returns the existing NodeIndex.
    pub fn add_subtask(&mut self, subtask: Subtask) -> NodeIndex {
        if let Some(&index) = self.index.get(&subtask.id) {
            return index;
        }

        let id = subtask.id;
        let index = self.graph.add_node(id);
        self.index.insert(id, index);
        self.records.insert(id, Arc::new(RwLock::new(subtask)));
        index
    }

    /// Add a dependency between two subtasks.
    ///
    /// The dependency indicates that `from` must be accepted before `to`
    /// can start. Validates that adding the edge won't create a cycle, and
    /// mirrors the edge into the dependent's `depends_on` set.
    ///
    /// # Errors
    /// Returns an error if either subtask is not in the DAG or the edge
    /// would create a cycle.
    pub fn add_dependency(
        &mut self,
        from: &SubtaskId,
        to: &SubtaskId,
        kind: DependencyKind,
    ) -> Result<()> {
        let from_index = *self
            .index
            .get(from)
            .ok_or_else(|| Error::Validation(format!("Subtask {} not found in DAG", from)))?;

        let to_index = *self
            .index
            .get(to)
            .ok_or_else(|| Error::Validation(format!("Subtask {} not found in DAG", to)))?;

        // Temporarily add the edge to check for cycles
        let edge = self.graph.add_edge(from_index, to_index, kind);

        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(Error::Validation(format!(
                "Adding dependency from {} to {} would create a cycle",
                from, to
            )));
        }

        if let Some(record) = self.records.get(to) {
            record.write().unwrap().depends_on.insert(*from);
        }

        Ok(())
    }

    /// Get the shared record for a subtask.
    pub fn record(&self, id: &SubtaskId) -> Option<Arc<RwLock<Subtask>>> {
        self.records.get(id).cloned()
    }

    /// Get a cloned snapshot of a subtask's current state.
    pub fn snapshot(&self, id: &SubtaskId) -> Option<Subtask> {
        self.records.get(id).map(|r| r.read().unwrap().clone())
    }

    /// Get cloned snapshots of all subtasks, in graph insertion order.
    pub fn snapshots(&self) -> Vec<Subtask> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx))
            .filter_map(|id| self.snapshot(id))
            .collect()
    }

    /// Get all subtask ids in graph insertion order.
    pub fn subtask_ids(&self) -> Vec<SubtaskId> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx).copied())
            .collect()
    }

    /// Check if the DAG contains a subtask.
    pub fn contains(&self, id: &SubtaskId) -> bool {
        self.index.contains_key(id)
    }

    /// Get the number of subtasks in the DAG.
    pub fn subtask_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependencies (edges) in the DAG.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if the DAG is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Get all subtasks the given subtask depends on (predecessors).
    pub fn dependencies_of(&self, id: &SubtaskId) -> Vec<SubtaskId> {
        if let Some(&index) = self.index.get(id) {
            self.graph
                .neighbors_directed(index, petgraph::Direction::Incoming)
                .filter_map(|n| self.graph.node_weight(n).copied())
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Get all subtasks that depend on the given subtask (successors).
    pub fn dependents_of(&self, id: &SubtaskId) -> Vec<SubtaskId> {
        if let Some(&index) = self.index.get(id) {
            self.graph
                .neighbors_directed(index, petgraph::Direction::Outgoing)
                .filter_map(|n| self.graph.node_weight(n).copied())
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Get every edge as (dependency, dependent, kind).
    ///
    /// Used for snapshot persistence so topology can be rebuilt.
    pub fn edges(&self) -> Vec<(SubtaskId, SubtaskId, DependencyKind)> {
        self.graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = self.graph.edge_endpoints(e)?;
                let kind = *self.graph.edge_weight(e)?;
                Some((
                    *self.graph.node_weight(a)?,
                    *self.graph.node_weight(b)?,
                    kind,
                ))
            })
            .collect()
    }

    // ========== Scheduling Operations ==========

    /// Get all subtasks ready to dispatch.
    ///
    /// A subtask is ready if it is still Pending and every dependency
    /// (incoming edge) is in the accepted set. Subtasks with no
    /// dependencies are ready immediately.
    pub fn ready_subtasks(&self, accepted: &HashSet<SubtaskId>) -> Vec<SubtaskId> {
        self.graph
            .node_indices()
            .filter_map(|index| {
                let id = self.graph.node_weight(index)?;

                let is_pending = self
                    .records
                    .get(id)
                    .map(|r| {
                        r.read().unwrap().status == crate::core::subtask::SubtaskStatus::Pending
                    })
                    .unwrap_or(false);
                if !is_pending {
                    return None;
                }

                let deps_satisfied = self
                    .graph
                    .neighbors_directed(index, petgraph::Direction::Incoming)
                    .all(|dep_index| {
                        self.graph
                            .node_weight(dep_index)
                            .map(|dep_id| accepted.contains(dep_id))
                            .unwrap_or(false)
                    });

                if deps_satisfied {
                    Some(*id)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Check if every subtask in the DAG has been accepted.
    pub fn all_accepted(&self, accepted: &HashSet<SubtaskId>) -> bool {
        self.index.keys().all(|id| accepted.contains(id))
    }

    /// Get the count of subtasks not yet accepted.
    pub fn pending_count(&self, accepted: &HashSet<SubtaskId>) -> usize {
        self.index.keys().filter(|id| !accepted.contains(id)).count()
    }

    /// Transitively mark every dependent of a failed subtask as Blocked.
    ///
    /// Dependents are never silently skipped: each one is visited, marked,
    /// and returned so callers can surface the blockage. Already-terminal
    /// dependents are left untouched.
    pub fn mark_blocked_from(&self, failed: &SubtaskId) -> Vec<SubtaskId> {
        let mut blocked = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = self.dependents_of(failed);

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(record) = self.records.get(&id) {
                let mut subtask = record.write().unwrap();
                if !subtask.is_terminal() {
                    subtask.block(&format!("dependency {} failed", failed.short()));
                    blocked.push(id);
                }
            }
            stack.extend(self.dependents_of(&id));
        }

        blocked
    }

    /// Get subtask ids in topological order (respecting dependencies).
    ///
    /// # Errors
    /// Returns an error if the graph contains a cycle (should never happen
    /// since add_dependency validates against cycles).
    pub fn topological_order(&self) -> Result<Vec<SubtaskId>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let id = self
                .graph
                .node_weight(cycle.node_id())
                .map(|id| id.short())
                .unwrap_or_else(|| "unknown".to_string());
            Error::Validation(format!("Cycle detected at subtask: {}", id))
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index).copied())
            .collect())
    }
}

impl Default for SubtaskDag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubtaskDag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubtaskDag")
            .field("subtasks", &self.subtask_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
