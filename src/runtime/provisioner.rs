//! Provisioner abstraction - the collaborator that actually creates a module
//!
//! The orchestrator never talks to a cloud API itself. It resolves a module's
//! inputs, hands them to a `Provisioner` and stores whatever outputs come back.
//!
//! | Provisioner | Use Case |
//! |-------------|----------|
//! | `mock` | Tests and dry runs: deterministic ARN-like outputs |
//! | `command` | Runs the module's `command` through `sh -c` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::ast::ModuleSpec;
use crate::binding::ResolvedInputs;
use crate::config::Configuration;
use crate::error::{Result, WeaveError};
use crate::store::ModuleOutputs;

use super::command::CommandProvisioner;
use super::mock::MockProvisioner;

/// Everything a provisioner gets to see for one module
#[derive(Debug, Clone, Copy)]
pub struct MaterializeRequest<'a> {
    pub module: &'a ModuleSpec,
    pub inputs: &'a ResolvedInputs,
    pub config: &'a Configuration,
}

/// Why a provisioner could not materialize a module
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("{0}")]
    Rejected(String),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("command failed ({status}): {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("module declares no command")]
    NoCommand,

    #[error("invalid output document: {0}")]
    InvalidOutputs(String),

    #[error("provisioner panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Materializes one module from its resolved inputs
#[async_trait]
pub trait Provisioner: Send + Sync {
    fn name(&self) -> &str;

    async fn materialize(
        &self,
        request: MaterializeRequest<'_>,
    ) -> std::result::Result<ModuleOutputs, ProvisionError>;
}

/// Create a provisioner by name
pub fn create_provisioner(name: &str) -> Result<Arc<dyn Provisioner>> {
    match name.to_lowercase().as_str() {
        "mock" => Ok(Arc::new(MockProvisioner::new())),
        "command" => Ok(Arc::new(CommandProvisioner::new())),
        _ => Err(WeaveError::ConfigError {
            reason: format!("Unknown provisioner: '{name}'. Available: mock, command"),
        }),
    }
}
