// src/graph/mod.rs

//! Dependency DAG over work item identities.
//!
//! Edge direction is dependency → dependent: an edge (A, B) means B cannot
//! start until A is terminal. The graph only stores structure; item states
//! live in the engine, which queries adjacency here when deciding readiness
//! and when cascading failures.

use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{Error, Result};
use crate::work::WorkId;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraphMap<WorkId, ()>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item with no edges yet.
    pub fn add_node(&mut self, id: WorkId) {
        self.graph.add_node(id);
    }

    /// Record that `dependent` must wait for `dependency`.
    ///
    /// Fails with [`Error::CycleDetected`] if the edge would close a cycle,
    /// leaving the graph untouched. A self-dependency is a cycle.
    pub fn add_edge(&mut self, dependent: WorkId, dependency: WorkId) -> Result<()> {
        if dependent == dependency
            || has_path_connecting(&self.graph, dependent, dependency, None)
        {
            return Err(Error::CycleDetected {
                dependent,
                dependency,
            });
        }
        self.graph.add_edge(dependency, dependent, ());
        Ok(())
    }

    /// Items this one is waiting on.
    pub fn dependencies_of(&self, id: WorkId) -> Vec<WorkId> {
        self.graph
            .neighbors_directed(id, petgraph::Direction::Incoming)
            .collect()
    }

    /// Items waiting on this one.
    pub fn dependents_of(&self, id: WorkId) -> Vec<WorkId> {
        self.graph
            .neighbors_directed(id, petgraph::Direction::Outgoing)
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
