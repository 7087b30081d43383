//! Step graph built on petgraph.
//!
//! Workflows are directed graphs where:
//! - Nodes are steps, keyed by `StepId`
//! - Edges come from each step's `next_steps`
//!
//! Only tree-shaped graphs are accepted: the first step is the entry, every
//! other step has exactly one predecessor, and every step is reachable from
//! the entry. Fan-out is allowed; fan-in (joins) is rejected because branches
//! never wait for each other.

use crate::error::ValidationError;
use crate::step::{StepId, WorkflowStep};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};

/// The validated shape of a workflow's steps.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    graph: DiGraph<StepId, ()>,
    /// Map from StepId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<StepId, NodeIndex>,
    /// Position of each step in the definition's step list.
    positions: HashMap<StepId, usize>,
    entry: NodeIndex,
}

impl WorkflowGraph {
    /// Builds and validates the graph for a list of steps.
    ///
    /// # Errors
    ///
    /// Returns the first rule the steps break, checked in this order:
    /// - the list is empty or a step id is blank or repeated
    /// - a successor is unknown, repeated, or the step itself
    /// - the entry step has a predecessor
    /// - a step has more than one predecessor
    /// - the graph has a cycle
    /// - a step is unreachable from the entry
    pub fn build(steps: &[WorkflowStep]) -> Result<Self, ValidationError> {
        if steps.is_empty() {
            return Err(ValidationError::NoSteps);
        }

        let mut graph = DiGraph::with_capacity(steps.len(), steps.len());
        let mut node_index_map = HashMap::with_capacity(steps.len());
        let mut positions = HashMap::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            if step.id.as_str().trim().is_empty() {
                return Err(ValidationError::EmptyStepId { index });
            }
            if node_index_map.contains_key(&step.id) {
                return Err(ValidationError::DuplicateStepId {
                    step_id: step.id.clone(),
                });
            }
            let node = graph.add_node(step.id.clone());
            node_index_map.insert(step.id.clone(), node);
            positions.insert(step.id.clone(), index);
        }

        for step in steps {
            let source = node_index_map[&step.id];
            let mut seen = HashSet::new();
            for successor in &step.next_steps {
                if *successor == step.id {
                    return Err(ValidationError::SelfLoop {
                        step_id: step.id.clone(),
                    });
                }
                if !seen.insert(successor) {
                    return Err(ValidationError::DuplicateSuccessor {
                        step_id: step.id.clone(),
                        successor: successor.clone(),
                    });
                }
                let target =
                    node_index_map
                        .get(successor)
                        .ok_or_else(|| ValidationError::UnknownSuccessor {
                            step_id: step.id.clone(),
                            successor: successor.clone(),
                        })?;
                graph.add_edge(source, *target, ());
            }
        }

        let entry = node_index_map[&steps[0].id];
        let built = Self {
            graph,
            node_index_map,
            positions,
            entry,
        };
        built.validate_shape(steps)?;
        Ok(built)
    }

    fn validate_shape(&self, steps: &[WorkflowStep]) -> Result<(), ValidationError> {
        if self.in_degree(self.entry) > 0 {
            return Err(ValidationError::EntryHasPredecessor {
                step_id: self.graph[self.entry].clone(),
            });
        }

        // Definition order keeps the reported step deterministic.
        for step in steps {
            let index = self.node_index_map[&step.id];
            if self.in_degree(index) > 1 {
                let mut predecessors = self.predecessors(&step.id);
                predecessors.sort_by_key(|id| self.positions.get(id).copied());
                return Err(ValidationError::JoinNotSupported {
                    step_id: step.id.clone(),
                    predecessors,
                });
            }
        }

        if petgraph::algo::is_cyclic_directed(&self.graph) {
            return Err(ValidationError::CycleDetected);
        }

        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, self.entry);
        while let Some(index) = dfs.next(&self.graph) {
            reached.insert(index);
        }
        if let Some(step) = steps
            .iter()
            .find(|step| !reached.contains(&self.node_index_map[&step.id]))
        {
            return Err(ValidationError::UnreachableStep {
                step_id: step.id.clone(),
            });
        }

        Ok(())
    }

    fn in_degree(&self, index: NodeIndex) -> usize {
        self.graph.neighbors_directed(index, Direction::Incoming).count()
    }

    /// Returns the entry step.
    #[must_use]
    pub fn entry(&self) -> &StepId {
        &self.graph[self.entry]
    }

    /// Returns the step's position in the definition's step list.
    #[must_use]
    pub fn position(&self, step_id: &StepId) -> Option<usize> {
        self.positions.get(step_id).copied()
    }

    /// Returns true if the graph has a step with this id.
    #[must_use]
    pub fn contains(&self, step_id: &StepId) -> bool {
        self.node_index_map.contains_key(step_id)
    }

    /// Returns the steps that list `step_id` as a successor.
    #[must_use]
    pub fn predecessors(&self, step_id: &StepId) -> Vec<StepId> {
        let Some(&index) = self.node_index_map.get(step_id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// Returns steps with no successors, in definition order.
    #[must_use]
    pub fn terminal_steps(&self) -> Vec<StepId> {
        let mut terminal: Vec<StepId> = self
            .graph
            .node_indices()
            .filter(|&idx| self.graph.neighbors_directed(idx, Direction::Outgoing).count() == 0)
            .map(|idx| self.graph[idx].clone())
            .collect();
        terminal.sort_by_key(|id| self.positions.get(id).copied());
        terminal
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.graph.node_count()
    }
}
