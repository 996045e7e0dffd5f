//! Runtime Module - plan execution
//!
//! Contains the runtime execution components:
//! - `orchestrator`: plan walk with tokio concurrency and barriers
//! - `lifecycle`: per-node state machine
//! - `provisioner`: collaborator trait + factory
//! - `mock` / `command`: provisioner implementations
//!
//! This module represents the "how" - runtime execution.
//! For static structure, see the `ast` and `dag` modules.

mod command;
mod lifecycle;
mod mock;
mod orchestrator;
mod provisioner;

// Re-export public types
pub use command::{CommandProvisioner, COMMAND_TIMEOUT};
pub use lifecycle::{Lifecycle, NodeState};
pub use mock::{MockCall, MockProvisioner};
pub use orchestrator::Orchestrator;
pub use provisioner::{create_provisioner, MaterializeRequest, ProvisionError, Provisioner};
