//! Event log for orchestration runs
//!
//! - Event: envelope with id + timestamp + kind
//! - EventKind: run-level and node-level variants
//! - EventLog: thread-safe, append-only log
//!
//! Event ids are assigned under the write lock, so id order is the order in
//! which the orchestrator observed things. Tests rely on that to check
//! happens-before between producers and consumers.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single event in the run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since the log was created (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

/// All event types (run level and node level)
///
/// Uses Arc<str> for node ids to share the graph's allocations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        run: String,
        node_count: usize,
        plan: Vec<Arc<str>>,
    },
    RunCompleted {
        settled: usize,
        total_duration_ms: u64,
    },
    RunFailed {
        error: String,
        failed_node: Option<Arc<str>>,
    },
    RunCancelled {
        settled: usize,
    },

    // ═══════════════════════════════════════════
    // NODE LEVEL
    // ═══════════════════════════════════════════
    NodeScheduled {
        node: Arc<str>,
        dependencies: Vec<Arc<str>>,
    },
    /// Module handed to the provisioner with its resolved inputs
    ModuleStarted {
        node: Arc<str>,
        inputs: Value,
    },
    ModuleSettled {
        node: Arc<str>,
        duration_ms: u64,
    },
    ModuleFailed {
        node: Arc<str>,
        error: String,
        duration_ms: u64,
    },
    BarrierWaiting {
        node: Arc<str>,
        remaining_ms: u64,
    },
    BarrierSettled {
        node: Arc<str>,
        waited_ms: u64,
    },
    /// Outputs of `node` became readable by consumers
    OutputsPublished {
        node: Arc<str>,
        outputs: Vec<String>,
    },
}

impl EventKind {
    /// Node id if the event is node-related
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::NodeScheduled { node, .. }
            | Self::ModuleStarted { node, .. }
            | Self::ModuleSettled { node, .. }
            | Self::ModuleFailed { node, .. }
            | Self::BarrierWaiting { node, .. }
            | Self::BarrierSettled { node, .. }
            | Self::OutputsPublished { node, .. } => Some(node),
            Self::RunStarted { .. }
            | Self::RunCompleted { .. }
            | Self::RunFailed { .. }
            | Self::RunCancelled { .. } => None,
        }
    }

    pub fn is_run_event(&self) -> bool {
        self.node().is_none()
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let mut events = self.events.write();
        let id = events.len() as u64;
        events.push(Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        });
        id
    }

    /// All events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Events for one node
    pub fn filter_node(&self, node: &str) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind.node() == Some(node))
            .cloned()
            .collect()
    }

    /// Run-level events only
    pub fn run_events(&self) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind.is_run_event())
            .cloned()
            .collect()
    }

    /// Id of the first event matching `pred`
    pub fn position<F>(&self, pred: F) -> Option<u64>
    where
        F: Fn(&EventKind) -> bool,
    {
        self.events
            .read()
            .iter()
            .find(|e| pred(&e.kind))
            .map(|e| e.id)
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}
