//! Stage dependency graph
//!
//! Models ordering constraints between build stages as a DAG. The graph is
//! constructed once from the enabled stages and validated up front: cycle
//! detection and unknown-stage references are structural errors reported
//! before any stage runs. If the configuration changes stage composition,
//! the graph is rebuilt, not mutated in place.

use super::stage::StageSpec;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Structural problems in the build description. All of these are fatal and
/// surface before any stage executes (collisions surface before any write).
#[derive(Debug, Error)]
pub enum StructuralError {
    #[error("Stage '{0}' is already registered")]
    DuplicateStage(String),

    #[error("Edge references unknown stage '{0}'")]
    UnknownStage(String),

    #[error("Dependency cycle involving stage '{0}'")]
    Cycle(String),

    #[error("Stage '{stage}': unresolvable placeholder '{{{placeholder}}}' in template '{template}'")]
    Template {
        stage: String,
        template: String,
        placeholder: String,
    },

    #[error("Output path collision: '{path}' produced by both '{first}' and '{second}'")]
    Collision {
        path: PathBuf,
        first: String,
        second: String,
    },

    #[error("Stage '{stage}': invalid input pattern '{pattern}': {message}")]
    Pattern {
        stage: String,
        pattern: String,
        message: String,
    },
}

/// DFS coloring for cycle detection
#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Directed acyclic graph of stages, edges pointing producer -> consumer.
#[derive(Default)]
pub struct DependencyGraph {
    stages: Vec<Arc<StageSpec>>,
    index: HashMap<String, usize>,
    /// consumer index -> producer indices
    producers: HashMap<usize, Vec<usize>>,
    /// producer index -> consumer indices
    consumers: HashMap<usize, Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stage. Names are unique per graph.
    pub fn add_stage(&mut self, spec: StageSpec) -> Result<(), StructuralError> {
        if self.index.contains_key(spec.name()) {
            return Err(StructuralError::DuplicateStage(spec.name().to_string()));
        }
        let idx = self.stages.len();
        self.index.insert(spec.name().to_string(), idx);
        self.stages.push(Arc::new(spec));
        Ok(())
    }

    /// Adds an ordering edge: `consumer` runs only after `producer`
    /// completed successfully.
    pub fn add_edge(&mut self, producer: &str, consumer: &str) -> Result<(), StructuralError> {
        let p = self.resolve(producer)?;
        let c = self.resolve(consumer)?;
        self.producers.entry(c).or_default().push(p);
        self.consumers.entry(p).or_default().push(c);
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<usize, StructuralError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| StructuralError::UnknownStage(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> impl Iterator<Item = &Arc<StageSpec>> {
        self.stages.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<StageSpec>> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Producer names of a stage, in registration order.
    pub fn producers_of(&self, name: &str) -> Vec<&str> {
        match self.index.get(name) {
            Some(idx) => self
                .producers
                .get(idx)
                .map(|ps| ps.iter().map(|&p| self.stages[p].name()).collect())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Stages in an order where every stage appears after all of its
    /// producers. Fails with `Cycle` if no such order exists, detected by a
    /// depth-first traversal: any back-edge into a currently-visiting node
    /// is a cycle.
    pub fn topological_order(&self) -> Result<Vec<Arc<StageSpec>>, StructuralError> {
        let mut marks = vec![Mark::Unvisited; self.stages.len()];
        let mut order = Vec::with_capacity(self.stages.len());

        for start in 0..self.stages.len() {
            self.visit(start, &mut marks, &mut order)?;
        }

        Ok(order.into_iter().map(|i| self.stages[i].clone()).collect())
    }

    fn visit(
        &self,
        node: usize,
        marks: &mut [Mark],
        order: &mut Vec<usize>,
    ) -> Result<(), StructuralError> {
        match marks[node] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                return Err(StructuralError::Cycle(self.stages[node].name().to_string()))
            }
            Mark::Unvisited => {}
        }

        marks[node] = Mark::Visiting;
        if let Some(producers) = self.producers.get(&node) {
            for &p in producers {
                self.visit(p, marks, order)?;
            }
        }
        marks[node] = Mark::Done;
        order.push(node);
        Ok(())
    }

    /// The given stages plus every stage transitively depending on any of
    /// them. Used by watch mode: a change to a producer's inputs must
    /// re-trigger its consumers as well.
    pub fn dependents_closure(&self, roots: &HashSet<String>) -> HashSet<String> {
        let mut result: HashSet<usize> = roots
            .iter()
            .filter_map(|name| self.index.get(name).copied())
            .collect();
        let mut frontier: Vec<usize> = result.iter().copied().collect();

        while let Some(node) = frontier.pop() {
            if let Some(consumers) = self.consumers.get(&node) {
                for &c in consumers {
                    if result.insert(c) {
                        frontier.push(c);
                    }
                }
            }
        }

        result
            .into_iter()
            .map(|i| self.stages[i].name().to_string())
            .collect()
    }
}
