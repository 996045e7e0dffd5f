//! Topological scheduler (Kahn's algorithm)
//!
//! Ready nodes are taken in declaration order, so the same manifest and
//! configuration always yield the same plan.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{Result, WeaveError};

use super::graph::{DependencyGraph, Node};

/// Ordered materialization plan over modules and barriers
#[derive(Debug, Clone)]
pub struct Plan {
    graph: DependencyGraph,
    steps: Vec<Arc<str>>,
    positions: FxHashMap<Arc<str>, usize>,
    /// Dependency depth per step (0 = no dependencies)
    waves: Vec<Vec<Arc<str>>>,
    excluded: Vec<Arc<str>>,
}

impl Plan {
    /// Order `graph` topologically, breaking ties by node order
    pub fn schedule(graph: DependencyGraph) -> Result<Self> {
        let n = graph.len();
        let mut in_degree: Vec<usize> = graph
            .nodes()
            .iter()
            .map(|node| graph.dependencies(&node.id).len())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut steps: Vec<Arc<str>> = Vec::with_capacity(n);
        let mut depth: Vec<usize> = vec![0; n];

        while let Some(Reverse(i)) = ready.pop() {
            let id = Arc::clone(&graph.nodes()[i].id);
            for consumer in graph.dependents(&id) {
                let Some(j) = graph.position(consumer) else {
                    return Err(WeaveError::invariant(format!(
                        "edge to unknown node '{consumer}'"
                    )));
                };
                depth[j] = depth[j].max(depth[i] + 1);
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
            steps.push(id);
        }

        if steps.len() < n {
            // frontier emptied early: name the cycle if DFS can find it
            graph.detect_cycles()?;
            let stuck: Vec<&str> = graph
                .nodes()
                .iter()
                .zip(&in_degree)
                .filter(|&(_, &d)| d > 0)
                .map(|(node, _)| node.id.as_ref())
                .collect();
            return Err(WeaveError::CyclicDependency {
                cycle: stuck.join(" → "),
            });
        }

        let positions: FxHashMap<Arc<str>, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, id)| (Arc::clone(id), i))
            .collect();

        let wave_count = depth.iter().max().map_or(0, |d| d + 1);
        let mut waves: Vec<Vec<Arc<str>>> = vec![Vec::new(); wave_count];
        for id in &steps {
            if let Some(i) = graph.position(id) {
                waves[depth[i]].push(Arc::clone(id));
            }
        }

        Ok(Self {
            graph,
            steps,
            positions,
            waves,
            excluded: Vec::new(),
        })
    }

    pub(crate) fn with_excluded(mut self, excluded: Vec<Arc<str>>) -> Self {
        self.excluded = excluded;
        self
    }

    /// Node ids in materialization order
    pub fn steps(&self) -> &[Arc<str>] {
        &self.steps
    }

    /// Index of a node in the plan
    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// True if `a` is planned before `b`
    pub fn is_before(&self, a: &str, b: &str) -> bool {
        match (self.position(a), self.position(b)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    /// Steps grouped by dependency depth; nodes within one wave are mutually unordered
    pub fn waves(&self) -> &[Vec<Arc<str>>] {
        &self.waves
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Steps as graph nodes
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.steps.iter().filter_map(|id| self.graph.node(id))
    }

    /// Modules left out by configuration
    pub fn excluded(&self) -> &[Arc<str>] {
        &self.excluded
    }

    /// Number of module steps (barriers not counted)
    pub fn module_count(&self) -> usize {
        self.nodes().filter(|n| !n.is_barrier()).count()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
