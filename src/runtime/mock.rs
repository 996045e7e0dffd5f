//! Mock provisioner for tests and dry runs
//!
//! Produces deterministic ARN-like values for every declared output, without
//! touching any cloud API. Latency and failures can be injected per module.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::store::ModuleOutputs;

use super::provisioner::{MaterializeRequest, ProvisionError, Provisioner};

/// One recorded call
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub module: String,
    /// Resolved inputs in declaration order
    pub inputs: Vec<(String, String)>,
}

/// Mock provisioner with configurable latency, failures and outputs
#[derive(Debug, Default)]
pub struct MockProvisioner {
    default_latency: Duration,
    latency: FxHashMap<String, Duration>,
    failures: FxHashMap<String, String>,
    outputs: FxHashMap<String, ModuleOutputs>,
    /// Track all calls made (for assertions)
    calls: Mutex<Vec<MockCall>>,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latency applied to every module without its own
    pub fn with_default_latency(mut self, latency: Duration) -> Self {
        self.default_latency = latency;
        self
    }

    pub fn with_latency(mut self, module: impl Into<String>, latency: Duration) -> Self {
        self.latency.insert(module.into(), latency);
        self
    }

    /// Fail `module` with `reason` (after its latency)
    pub fn fail_on(mut self, module: impl Into<String>, reason: impl Into<String>) -> Self {
        self.failures.insert(module.into(), reason.into());
        self
    }

    /// Return exactly `outputs` for `module` instead of generated values
    pub fn with_outputs(mut self, module: impl Into<String>, outputs: ModuleOutputs) -> Self {
        self.outputs.insert(module.into(), outputs);
        self
    }

    /// All calls made so far, in start order
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Modules materialized so far, in start order
    pub fn called_modules(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.module.clone()).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Deterministic value for one output
    pub fn output_value(region: &str, prefix: &str, module: &str, output: &str) -> String {
        format!("arn:aws:mock:{region}:000000000000:{prefix}-{module}/{output}")
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    fn name(&self) -> &str {
        "mock"
    }

    async fn materialize(
        &self,
        request: MaterializeRequest<'_>,
    ) -> Result<ModuleOutputs, ProvisionError> {
        let module = &request.module.id;
        self.calls.lock().push(MockCall {
            module: module.clone(),
            inputs: request
                .inputs
                .iter()
                .map(|(a, v)| (a.to_string(), v.to_string()))
                .collect(),
        });

        let latency = self
            .latency
            .get(module)
            .copied()
            .unwrap_or(self.default_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(reason) = self.failures.get(module) {
            return Err(ProvisionError::Rejected(reason.clone()));
        }

        if let Some(outputs) = self.outputs.get(module) {
            return Ok(outputs.clone());
        }

        Ok(request
            .module
            .outputs
            .iter()
            .map(|output| {
                let value = Self::output_value(
                    request.config.region(),
                    request.config.prefix(),
                    module,
                    output,
                );
                (output.clone(), value)
            })
            .collect())
    }
}
