//! Manifest parsing structures

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde::Deserialize;

use super::module::ModuleSpec;
use crate::error::{Result, WeaveError};

pub const SCHEMA_V01: &str = "stackweave/manifest@0.1";

/// Module ids: a letter, then letters, digits, '_' or '-'. No dots (they split bindings).
static MODULE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("valid regex"));

/// Manifest parsed from YAML (raw)
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestRaw {
    schema: String,
    #[serde(default = "default_name")]
    name: String,
    modules: Vec<ModuleSpec>,
    #[serde(default)]
    outputs: Vec<ReportEntry>,
}

fn default_name() -> String {
    "stack".to_string()
}

/// Deployment manifest with Arc-wrapped modules for cheap sharing across tasks
#[derive(Debug, Clone)]
pub struct Manifest {
    pub schema: String,
    pub name: String,
    /// Modules in declaration order
    pub modules: Vec<Arc<ModuleSpec>>,
    /// Named values printed after a deployment
    pub outputs: Vec<ReportEntry>,
}

/// One line of the output summary
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReportEntry {
    pub label: String,
    /// `module.output`
    pub from: String,
    /// Printed when the producer was excluded or produced nothing
    #[serde(default)]
    pub fallback: Option<String>,
}

impl Manifest {
    /// Parse and structurally validate a YAML manifest
    pub fn parse(yaml: &str) -> Result<Self> {
        let raw: ManifestRaw = serde_yaml::from_str(yaml).map_err(|e| WeaveError::ParseError {
            details: e.to_string(),
        })?;

        if raw.schema != SCHEMA_V01 {
            return Err(WeaveError::InvalidSchema {
                expected: SCHEMA_V01.to_string(),
                actual: raw.schema,
            });
        }

        let mut manifest = Self::from_modules(raw.name, raw.modules)?;
        manifest.schema = raw.schema;
        manifest.outputs = raw.outputs;
        Ok(manifest)
    }

    /// Read and parse a manifest file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => WeaveError::ManifestNotFound {
                path: path.display().to_string(),
            },
            _ => WeaveError::Io(e),
        })?;
        Self::parse(&yaml)
    }

    /// Build a manifest from modules declared in code
    pub fn from_modules(name: impl Into<String>, modules: Vec<ModuleSpec>) -> Result<Self> {
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for module in &modules {
            if !MODULE_ID.is_match(&module.id) {
                return Err(WeaveError::InvalidModuleId {
                    id: module.id.clone(),
                });
            }
            if !seen.insert(module.id.as_str()) {
                return Err(WeaveError::DuplicateModule {
                    module: module.id.clone(),
                });
            }
            if let Some((first, second)) = module.env_name_clash() {
                return Err(WeaveError::EnvNameClash {
                    module: module.id.clone(),
                    first: first.to_string(),
                    second: second.to_string(),
                });
            }
        }

        Ok(Self {
            schema: SCHEMA_V01.to_string(),
            name: name.into(),
            modules: modules.into_iter().map(Arc::new).collect(),
            outputs: Vec::new(),
        })
    }

    pub fn module(&self, id: &str) -> Option<&Arc<ModuleSpec>> {
        self.modules.iter().find(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LLM_BOT: &str = r#"
schema: stackweave/manifest@0.1
name: llm-bot
modules:
  - id: vpc
    outputs: [vpc_id, security_group]
  - id: os-stack
    inputs:
      vpc: vpc.vpc_id
    outputs: [domain_endpoint]
    async_propagation: true
  - id: api-stack
    inputs:
      domain: os-stack.domain_endpoint
    outputs: [api_endpoint]
    after: [vpc]
    include_if: { feature: chat }
outputs:
  - label: API Endpoint Address
    from: api-stack.api_endpoint
    fallback: No API Created
"#;

    #[test]
    fn parse_manifest() {
        let manifest = Manifest::parse(LLM_BOT).unwrap();
        assert_eq!(manifest.name, "llm-bot");
        assert_eq!(manifest.modules.len(), 3);
        assert_eq!(manifest.outputs.len(), 1);
        assert!(manifest.module("os-stack").unwrap().async_propagation);
        assert!(manifest.module("missing").is_none());
    }

    #[test]
    fn wrong_schema_rejected() {
        let yaml = LLM_BOT.replace("stackweave/manifest@0.1", "stackweave/manifest@9");
        let err = Manifest::parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("SW-002"));
    }

    #[test]
    fn duplicate_module_rejected() {
        let err = Manifest::from_modules(
            "dup",
            vec![ModuleSpec::new("vpc"), ModuleSpec::new("vpc")],
        )
        .unwrap_err();
        assert!(matches!(err, WeaveError::DuplicateModule { module } if module == "vpc"));
    }

    #[test]
    fn inputs_sharing_an_env_name_rejected() {
        let yaml = r#"
schema: stackweave/manifest@0.1
modules:
  - id: kb
    outputs: [id, arn]
  - id: api
    inputs:
      kb-id: kb.id
      kb_id: kb.arn
"#;
        let err = Manifest::parse(yaml).unwrap_err();
        assert_eq!(err.code(), "SW-006");
        assert!(err.to_string().contains("'kb-id' and 'kb_id'"));
        assert!(err.is_build_time());
    }

    #[test]
    fn dotted_module_id_rejected() {
        let err = Manifest::from_modules("bad", vec![ModuleSpec::new("os.stack")]).unwrap_err();
        assert_eq!(err.code(), "SW-005");
    }

    #[test]
    fn invalid_yaml_is_parse_error() {
        let err = Manifest::parse("schema: [unclosed").unwrap_err();
        assert_eq!(err.code(), "SW-001");
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = Manifest::from_file("/definitely/not/here.yaml").unwrap_err();
        assert_eq!(err.code(), "SW-003");
    }
}
