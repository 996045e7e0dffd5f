//! Command provisioner - runs a module's `command` through `sh -c`
//!
//! Environment handed to the command:
//! - `STACKWEAVE_MODULE`, `STACKWEAVE_REGION`, `STACKWEAVE_PREFIX`
//! - `SW_INPUT_<ALIAS>` for every resolved input
//! - `SW_PARAM_<KEY>` for every static module parameter
//!
//! Stdout must be empty or a JSON object of outputs. Non-string values are
//! kept in their JSON text form.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::ast::env_name;
use crate::store::ModuleOutputs;

use super::provisioner::{MaterializeRequest, ProvisionError, Provisioner};

/// Default per-module timeout (stack creation is slow)
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(1800);

#[derive(Debug, Clone)]
pub struct CommandProvisioner {
    timeout: Duration,
}

impl CommandProvisioner {
    pub fn new() -> Self {
        Self {
            timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for CommandProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

/// `SW_INPUT_` + `llm-model.id` → `SW_INPUT_LLM_MODEL_ID`
fn env_key(prefix: &str, name: &str) -> String {
    format!("{prefix}{}", env_name(name))
}

/// Parse a command's stdout into module outputs
fn parse_outputs(stdout: &str) -> Result<ModuleOutputs, ProvisionError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(ModuleOutputs::new());
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| ProvisionError::InvalidOutputs(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(ProvisionError::InvalidOutputs(
            "expected a JSON object of outputs".to_string(),
        ));
    };

    Ok(map
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    fn name(&self) -> &str {
        "command"
    }

    async fn materialize(
        &self,
        request: MaterializeRequest<'_>,
    ) -> Result<ModuleOutputs, ProvisionError> {
        let module = request.module;
        let command = module.command.as_deref().ok_or(ProvisionError::NoCommand)?;

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .env("STACKWEAVE_MODULE", &module.id)
            .env("STACKWEAVE_REGION", request.config.region())
            .env("STACKWEAVE_PREFIX", request.config.prefix())
            .kill_on_drop(true);
        for (alias, value) in request.inputs.iter() {
            cmd.env(env_key("SW_INPUT_", alias), value);
        }
        for (key, value) in &module.params {
            cmd.env(env_key("SW_PARAM_", key), value);
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ProvisionError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(ProvisionError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_outputs(&String::from_utf8_lossy(&output.stdout))
    }
}
