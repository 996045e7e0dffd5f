//! Node lifecycle: pending → scheduled → materializing → settled | failed
//!
//! Settled and failed are terminal. Any other move is an orchestrator bug.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::error::{Result, WeaveError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Scheduled,
    Materializing,
    Settled,
    Failed,
}

impl NodeState {
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Pending, Scheduled)
                | (Scheduled, Materializing)
                | (Materializing, Settled)
                | (Materializing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Settled | NodeState::Failed)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Pending => "pending",
            NodeState::Scheduled => "scheduled",
            NodeState::Materializing => "materializing",
            NodeState::Settled => "settled",
            NodeState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// State of every node in one run
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    states: FxHashMap<Arc<str>, NodeState>,
}

impl Lifecycle {
    /// All nodes start pending
    pub fn new<'a>(nodes: impl IntoIterator<Item = &'a Arc<str>>) -> Self {
        Self {
            states: nodes
                .into_iter()
                .map(|id| (Arc::clone(id), NodeState::Pending))
                .collect(),
        }
    }

    pub fn state(&self, node: &str) -> Option<NodeState> {
        self.states.get(node).copied()
    }

    /// Move `node` to `next`, rejecting illegal transitions
    pub fn advance(&mut self, node: &str, next: NodeState) -> Result<()> {
        let state = self
            .states
            .get_mut(node)
            .ok_or_else(|| WeaveError::invariant(format!("unknown node '{node}'")))?;
        if !state.can_transition_to(next) {
            return Err(WeaveError::invariant(format!(
                "node '{node}' cannot go from {state} to {next}"
            )));
        }
        *state = next;
        Ok(())
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    pub fn all_settled(&self) -> bool {
        self.states.values().all(|s| *s == NodeState::Settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<Arc<str>> {
        names.iter().map(|n| Arc::from(*n)).collect()
    }

    #[test]
    fn happy_path() {
        let nodes = ids(&["vpc"]);
        let mut lifecycle = Lifecycle::new(&nodes);
        assert_eq!(lifecycle.state("vpc"), Some(NodeState::Pending));

        lifecycle.advance("vpc", NodeState::Scheduled).unwrap();
        lifecycle.advance("vpc", NodeState::Materializing).unwrap();
        lifecycle.advance("vpc", NodeState::Settled).unwrap();

        assert!(lifecycle.all_settled());
        assert!(NodeState::Settled.is_terminal());
    }

    #[test]
    fn settled_is_immutable() {
        let nodes = ids(&["vpc"]);
        let mut lifecycle = Lifecycle::new(&nodes);
        lifecycle.advance("vpc", NodeState::Scheduled).unwrap();
        lifecycle.advance("vpc", NodeState::Materializing).unwrap();
        lifecycle.advance("vpc", NodeState::Settled).unwrap();

        let err = lifecycle
            .advance("vpc", NodeState::Materializing)
            .unwrap_err();
        assert_eq!(err.code(), "SW-050");
        assert!(err.to_string().contains("settled to materializing"));
    }

    #[test]
    fn cannot_skip_scheduling() {
        let nodes = ids(&["vpc", "api"]);
        let mut lifecycle = Lifecycle::new(&nodes);
        assert!(lifecycle.advance("api", NodeState::Materializing).is_err());
        assert!(lifecycle.advance("ghost", NodeState::Scheduled).is_err());
        assert_eq!(lifecycle.count(NodeState::Pending), 2);
        assert!(!lifecycle.all_settled());
    }
}
