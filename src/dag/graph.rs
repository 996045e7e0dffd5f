//! DependencyGraph - module DAG with synthetic barrier nodes
//!
//! Performance notes:
//! - Arc<str> node ids shared with the plan, the registry and events
//! - FxHashMap for lookups (non-crypto hashing)
//! - SmallVec for dependency lists (most modules have 0-4)
//!
//! Edges point consumer → producer. Node order is declaration order, with each
//! barrier placed right after the last module it guards; the scheduler uses
//! that order to break ties.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::debug;

use crate::ast::{InputSource, ModuleSpec};
use crate::binding::OutputRef;
use crate::error::{Result, WeaveError};

use super::include::Inclusion;

/// Stack-allocated deps: most modules have 0-4 dependencies
pub type DepVec = SmallVec<[Arc<str>; 4]>;

/// Synthetic settle node
#[derive(Debug, Clone, PartialEq)]
pub struct Barrier {
    /// Modules whose outputs this barrier holds back
    pub members: Vec<Arc<str>>,
    /// Minimum time between the last member settling and the barrier settling
    pub settle: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Module(Arc<ModuleSpec>),
    Barrier(Barrier),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: Arc<str>,
    pub kind: NodeKind,
}

impl Node {
    pub fn module(&self) -> Option<&Arc<ModuleSpec>> {
        match &self.kind {
            NodeKind::Module(spec) => Some(spec),
            NodeKind::Barrier(_) => None,
        }
    }

    pub fn barrier(&self) -> Option<&Barrier> {
        match &self.kind {
            NodeKind::Barrier(barrier) => Some(barrier),
            NodeKind::Module(_) => None,
        }
    }

    pub fn is_barrier(&self) -> bool {
        matches!(self.kind, NodeKind::Barrier(_))
    }
}

/// Dependency graph over included modules (and barriers, once inserted)
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    /// node id -> position in `nodes`
    index: FxHashMap<Arc<str>, usize>,
    /// consumer -> producers it waits for
    dependencies: FxHashMap<Arc<str>, DepVec>,
    /// producer -> consumers waiting for it
    dependents: FxHashMap<Arc<str>, DepVec>,
    /// module -> barrier guarding its outputs
    barrier_of: FxHashMap<Arc<str>, Arc<str>>,
}

impl DependencyGraph {
    /// Build from bindings and ordering hints, then reject cycles
    pub fn build(inclusion: &Inclusion) -> Result<Self> {
        let capacity = inclusion.included().len();
        let mut graph = Self {
            nodes: Vec::with_capacity(capacity),
            index: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            dependencies: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            dependents: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            barrier_of: FxHashMap::default(),
        };

        for module in inclusion.included() {
            graph.push_node(Node {
                id: Arc::from(module.id.as_str()),
                kind: NodeKind::Module(Arc::clone(module)),
            });
        }

        for module in inclusion.included() {
            for decl in &module.inputs {
                if let InputSource::Output(binding) = &decl.source {
                    let r = OutputRef::parse_for(&module.id, &decl.alias, binding)?;
                    graph.add_edge(&module.id, &r.module)?;
                }
            }
            for hint in &module.after {
                // hints to excluded modules were dropped during inclusion
                if graph.contains(hint) {
                    graph.add_edge(&module.id, hint)?;
                }
            }
        }

        graph.detect_cycles()?;
        debug!(nodes = graph.len(), edges = graph.edge_count(), "dependency graph built");
        Ok(graph)
    }

    /// All nodes in tie-break order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Declaration position (tie-break key)
    #[inline]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    #[inline]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Producers a node waits for
    #[inline]
    pub fn dependencies(&self, id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.dependencies
            .get(id)
            .map_or(EMPTY, SmallVec::as_slice)
    }

    /// Consumers waiting for a node
    #[inline]
    pub fn dependents(&self, id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.dependents.get(id).map_or(EMPTY, SmallVec::as_slice)
    }

    /// Barrier guarding a module's outputs
    pub fn barrier_of(&self, module: &str) -> Option<&Arc<str>> {
        self.barrier_of.get(module)
    }

    pub fn barriers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_barrier())
    }

    /// Every edge as (consumer, producer), sorted
    pub fn edges(&self) -> Vec<(Arc<str>, Arc<str>)> {
        let mut edges: Vec<(Arc<str>, Arc<str>)> = self
            .dependencies
            .iter()
            .flat_map(|(consumer, producers)| {
                producers
                    .iter()
                    .map(move |p| (Arc::clone(consumer), Arc::clone(p)))
            })
            .collect();
        edges.sort();
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(SmallVec::len).sum()
    }

    /// Check if `from` depends on `to`, directly or transitively (BFS)
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }

        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut queue: VecDeque<&str> = VecDeque::new();

        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            for producer in self.dependencies(current) {
                if producer.as_ref() == to {
                    return true;
                }
                if visited.insert(producer.as_ref()) {
                    queue.push_back(producer.as_ref());
                }
            }
        }

        false
    }

    /// Detect cycles using DFS with three-color marking.
    ///
    /// - White: unvisited
    /// - Gray: on the current DFS stack
    /// - Black: fully processed
    ///
    /// Reaching a Gray node closes a cycle; the error names it as `a → b → a`.
    pub fn detect_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn dfs(
            node: &Arc<str>,
            dependencies: &FxHashMap<Arc<str>, DepVec>,
            colors: &mut FxHashMap<Arc<str>, Color>,
            stack: &mut Vec<Arc<str>>,
        ) -> std::result::Result<(), String> {
            colors.insert(Arc::clone(node), Color::Gray);
            stack.push(Arc::clone(node));

            if let Some(producers) = dependencies.get(node) {
                for producer in producers {
                    match colors.get(producer).copied().unwrap_or(Color::White) {
                        Color::Gray => {
                            let start = stack
                                .iter()
                                .position(|id| id == producer)
                                .unwrap_or(0);
                            let mut cycle: Vec<&str> =
                                stack[start..].iter().map(|id| &**id).collect();
                            cycle.push(&**producer);
                            return Err(cycle.join(" → "));
                        }
                        Color::White => dfs(producer, dependencies, colors, stack)?,
                        Color::Black => {}
                    }
                }
            }

            stack.pop();
            colors.insert(Arc::clone(node), Color::Black);
            Ok(())
        }

        let mut colors: FxHashMap<Arc<str>, Color> = self
            .nodes
            .iter()
            .map(|n| (Arc::clone(&n.id), Color::White))
            .collect();
        let mut stack: Vec<Arc<str>> = Vec::new();

        for node in &self.nodes {
            if colors.get(&node.id) == Some(&Color::White) {
                dfs(&node.id, &self.dependencies, &mut colors, &mut stack)
                    .map_err(|cycle| WeaveError::CyclicDependency { cycle })?;
            }
        }

        Ok(())
    }

    // ═══════════════════════════════════════════
    // MUTATION (barrier insertion only)
    // ═══════════════════════════════════════════

    fn push_node(&mut self, node: Node) {
        self.index.insert(Arc::clone(&node.id), self.nodes.len());
        self.dependencies.insert(Arc::clone(&node.id), DepVec::new());
        self.dependents.insert(Arc::clone(&node.id), DepVec::new());
        self.nodes.push(node);
    }

    /// Insert a node at `position`, shifting later nodes back
    pub(crate) fn insert_node(&mut self, position: usize, node: Node) {
        self.dependencies.insert(Arc::clone(&node.id), DepVec::new());
        self.dependents.insert(Arc::clone(&node.id), DepVec::new());
        self.nodes.insert(position.min(self.nodes.len()), node);
        self.reindex();
    }

    /// Move `id` so it sits right after `anchor`; no-op if it already comes later
    pub(crate) fn move_after(&mut self, id: &str, anchor: &str) -> Result<()> {
        let (Some(from), Some(anchor_at)) = (self.position(id), self.position(anchor)) else {
            return Err(WeaveError::invariant(format!(
                "cannot move '{id}' after '{anchor}': unknown node"
            )));
        };
        if from > anchor_at {
            return Ok(());
        }
        let node = self.nodes.remove(from);
        // anchor shifted left by one
        self.nodes.insert(anchor_at, node);
        self.reindex();
        Ok(())
    }

    fn reindex(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (Arc::clone(&n.id), i))
            .collect();
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        let i = *self.index.get(id)?;
        self.nodes.get_mut(i)
    }

    pub(crate) fn set_barrier(&mut self, module: &str, barrier: &str) -> Result<()> {
        let module = self.interned(module)?;
        let barrier = self.interned(barrier)?;
        self.barrier_of.insert(module, barrier);
        Ok(())
    }

    /// Add `consumer → producer`; returns false if the edge already existed
    pub(crate) fn add_edge(&mut self, consumer: &str, producer: &str) -> Result<bool> {
        let consumer = self.interned(consumer)?;
        let producer = self.interned(producer)?;

        let deps = self.dependencies.entry(Arc::clone(&consumer)).or_default();
        if deps.contains(&producer) {
            return Ok(false);
        }
        deps.push(Arc::clone(&producer));
        self.dependents.entry(producer).or_default().push(consumer);
        Ok(true)
    }

    pub(crate) fn remove_edge(&mut self, consumer: &str, producer: &str) {
        if let Some(deps) = self.dependencies.get_mut(consumer) {
            deps.retain(|p| p.as_ref() != producer);
        }
        if let Some(deps) = self.dependents.get_mut(producer) {
            deps.retain(|c| c.as_ref() != consumer);
        }
    }

    /// Shared Arc for a node id
    fn interned(&self, id: &str) -> Result<Arc<str>> {
        self.index
            .get_key_value(id)
            .map(|(key, _)| Arc::clone(key))
            .ok_or_else(|| WeaveError::invariant(format!("edge names unknown node '{id}'")))
    }
}

impl PartialEq for DependencyGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.edges() == other.edges()
    }
}
