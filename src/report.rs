//! Output summary - the named values printed after a deployment
//!
//! Each `outputs:` entry of the manifest points at one `module.output`. When
//! the producer was excluded (or never published) the entry's fallback is shown
//! instead, e.g. "No OpenSearch Endpoint Created".

use std::fmt;

use serde::Serialize;

use crate::ast::Manifest;
use crate::binding::OutputRef;
use crate::error::{Result, WeaveError};
use crate::store::OutputRegistry;

/// Where a summary value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Output,
    Fallback,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryLine {
    pub label: String,
    pub value: Option<String>,
    pub source: ValueSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutputSummary {
    pub lines: Vec<SummaryLine>,
}

impl OutputSummary {
    /// Check that every entry names a declared module and output
    pub fn check(manifest: &Manifest) -> Result<()> {
        for entry in &manifest.outputs {
            let r = OutputRef::parse_for("outputs", &entry.label, &entry.from)?;
            let declared = manifest
                .module(&r.module)
                .is_some_and(|m| m.declares_output(&r.output));
            if !declared {
                return Err(WeaveError::DanglingReference {
                    reference: format!("outputs.{} -> {}", entry.label, r.module),
                    reason: format!("'{r}' is not a declared module output"),
                });
            }
        }
        Ok(())
    }

    /// Resolve every entry against the published outputs
    pub fn collect(manifest: &Manifest, registry: &OutputRegistry) -> Result<Self> {
        Self::check(manifest)?;

        let lines = manifest
            .outputs
            .iter()
            .map(|entry| {
                let published = OutputRef::parse(&entry.from)
                    .and_then(|r| registry.get(&r.module, &r.output));
                let (value, source) = match (published, &entry.fallback) {
                    (Some(v), _) => (Some(v), ValueSource::Output),
                    (None, Some(fallback)) => (Some(fallback.clone()), ValueSource::Fallback),
                    (None, None) => (None, ValueSource::Missing),
                };
                SummaryLine {
                    label: entry.label.clone(),
                    value,
                    source,
                }
            })
            .collect();

        Ok(Self { lines })
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.lines
            .iter()
            .find(|l| l.label == label)
            .and_then(|l| l.value.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Display for OutputSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.lines.iter().map(|l| l.label.len()).max().unwrap_or(0);
        for line in &self.lines {
            writeln!(
                f,
                "{:width$}  {}",
                line.label,
                line.value.as_deref().unwrap_or("-"),
                width = width
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ModuleOutputs;

    const MANIFEST: &str = r#"
schema: stackweave/manifest@0.1
name: llm-bot
modules:
  - id: os-stack
    outputs: [domain_endpoint]
    include_if: { feature: opensearch }
  - id: api-stack
    outputs: [api_endpoint]
outputs:
  - label: OpenSearch Endpoint
    from: os-stack.domain_endpoint
    fallback: No OpenSearch Endpoint Created
  - label: API Endpoint
    from: api-stack.api_endpoint
"#;

    fn registry_with_api() -> OutputRegistry {
        let registry = OutputRegistry::new();
        let mut outputs = ModuleOutputs::new();
        outputs.insert("api_endpoint".into(), "https://api.example/prod".into());
        registry.record("api-stack", outputs).unwrap();
        registry.publish("api-stack").unwrap();
        registry
    }

    #[test]
    fn published_value_and_fallback() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let summary = OutputSummary::collect(&manifest, &registry_with_api()).unwrap();

        assert_eq!(summary.lines.len(), 2);
        assert_eq!(summary.lines[0].source, ValueSource::Fallback);
        assert_eq!(
            summary.get("OpenSearch Endpoint"),
            Some("No OpenSearch Endpoint Created")
        );
        assert_eq!(summary.lines[1].source, ValueSource::Output);
        assert_eq!(summary.get("API Endpoint"), Some("https://api.example/prod"));
    }

    #[test]
    fn missing_without_fallback() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let summary = OutputSummary::collect(&manifest, &OutputRegistry::new()).unwrap();
        assert_eq!(summary.lines[1].source, ValueSource::Missing);
        assert_eq!(summary.get("API Endpoint"), None);
        let rendered = summary.to_string();
        let line = rendered.lines().nth(1).unwrap();
        assert!(line.starts_with("API Endpoint "));
        assert!(line.ends_with("  -"));
    }

    #[test]
    fn undeclared_output_is_rejected() {
        let yaml = MANIFEST.replace("api-stack.api_endpoint", "api-stack.url");
        let manifest = Manifest::parse(&yaml).unwrap();
        let err = OutputSummary::check(&manifest).unwrap_err();
        assert_eq!(err.code(), "SW-021");
    }

    #[test]
    fn malformed_entry_is_rejected() {
        let yaml = MANIFEST.replace("api-stack.api_endpoint", "api-stack");
        let manifest = Manifest::parse(&yaml).unwrap();
        let err = OutputSummary::check(&manifest).unwrap_err();
        assert_eq!(err.code(), "SW-030");
    }
}
