//! Event Module - run trace
//!
//! Append-only log of what the orchestrator did, in order:
//! - `log`: Event, EventKind, EventLog

mod log;

pub use log::{Event, EventKind, EventLog};
