//! `producer.output` references

use std::fmt;

use crate::error::WeaveError;

/// Reference to one output of one module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputRef {
    pub module: String,
    pub output: String,
}

impl OutputRef {
    pub fn new(module: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            output: output.into(),
        }
    }

    /// Parse `producer.output`; both halves must be non-empty and the output
    /// name must not contain further dots.
    pub fn parse(binding: &str) -> Option<Self> {
        let (module, output) = binding.trim().split_once('.')?;
        if module.is_empty() || output.is_empty() || output.contains('.') {
            return None;
        }
        Some(Self::new(module, output))
    }

    /// Parse with the consuming module and alias attached to the error
    pub fn parse_for(consumer: &str, alias: &str, binding: &str) -> Result<Self, WeaveError> {
        Self::parse(binding).ok_or_else(|| WeaveError::InvalidBinding {
            module: consumer.to_string(),
            alias: alias.to_string(),
            binding: binding.to_string(),
        })
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.output)
    }
}
