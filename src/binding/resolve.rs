//! Resolved inputs handed to a provisioner
//!
//! Values are resolved once, right before a module starts, from outputs that
//! are already visible in the registry.

use serde_json::{Map, Value};

use crate::ast::{InputSource, ModuleSpec};
use crate::config::Configuration;
use crate::error::WeaveError;
use crate::store::OutputRegistry;

use super::entry::OutputRef;

/// Alias → value, in the module's declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    values: Vec<(String, String)>,
}

impl ResolvedInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every declared input of `module`
    ///
    /// A missing output means the scheduler let the module start too early,
    /// which is an orchestrator bug rather than a user error.
    pub fn resolve(
        module: &ModuleSpec,
        registry: &OutputRegistry,
        config: &Configuration,
    ) -> Result<Self, WeaveError> {
        let mut resolved = Self::new();

        for decl in &module.inputs {
            let value = match &decl.source {
                InputSource::Output(binding) => {
                    let r = OutputRef::parse_for(&module.id, &decl.alias, binding)?;
                    registry.get(&r.module, &r.output).ok_or_else(|| {
                        WeaveError::invariant(format!(
                            "module '{}' started before '{}' was visible",
                            module.id, r
                        ))
                    })?
                }
                InputSource::Param { param, default } => config
                    .param(param)
                    .map(str::to_string)
                    .or_else(|| default.clone())
                    .ok_or_else(|| WeaveError::MissingParam {
                        module: module.id.clone(),
                        alias: decl.alias.clone(),
                        param: param.clone(),
                    })?,
            };
            resolved.set(&decl.alias, value);
        }

        Ok(resolved)
    }

    pub fn set(&mut self, alias: impl Into<String>, value: impl Into<String>) {
        let alias = alias.into();
        let value = value.into();
        match self.values.iter_mut().find(|(a, _)| *a == alias) {
            Some(slot) => slot.1 = value,
            None => self.values.push((alias, value)),
        }
    }

    pub fn get(&self, alias: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(a, v)| (a.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON object for the event log
    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .map(|(a, v)| (a.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }
}
