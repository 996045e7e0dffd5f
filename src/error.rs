//! Error types with error codes and fix suggestions
//!
//! Error code ranges:
//! - SW-000-009: Manifest errors
//! - SW-010-019: Configuration errors
//! - SW-020-029: Graph errors
//! - SW-030-039: Binding errors
//! - SW-040-049: Provisioning errors
//! - SW-050-059: Runtime errors

use std::sync::Arc;

use thiserror::Error;

use crate::store::OutputRegistry;

pub type Result<T> = std::result::Result<T, WeaveError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum WeaveError {
    // ═══════════════════════════════════════════
    // MANIFEST ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[SW-001] Failed to parse manifest: {details}")]
    ParseError { details: String },

    #[error("[SW-002] Invalid schema version: expected '{expected}', got '{actual}'")]
    InvalidSchema { expected: String, actual: String },

    #[error("[SW-003] Manifest file not found: {path}")]
    ManifestNotFound { path: String },

    #[error("[SW-004] Module '{module}' is declared more than once")]
    DuplicateModule { module: String },

    #[error("[SW-005] Invalid module id '{id}' (expected letters, digits, '_' or '-', starting with a letter)")]
    InvalidModuleId { id: String },

    #[error("[SW-006] Module '{module}': '{first}' and '{second}' map to the same environment variable")]
    EnvNameClash {
        module: String,
        first: String,
        second: String,
    },

    // ═══════════════════════════════════════════
    // CONFIGURATION ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[SW-010] Configuration error: {reason}")]
    ConfigError { reason: String },

    #[error("[SW-011] Invalid override '{value}' (expected key=value)")]
    InvalidOverride { value: String },

    // ═══════════════════════════════════════════
    // GRAPH ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[SW-020] Cyclic dependency: {cycle}")]
    CyclicDependency { cycle: String },

    #[error("[SW-021] Dangling reference {reference}: {reason}")]
    DanglingReference { reference: String, reason: String },

    // ═══════════════════════════════════════════
    // BINDING ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[SW-030] Input '{alias}' of module '{module}' has invalid binding '{binding}' (expected module.output)")]
    InvalidBinding {
        module: String,
        alias: String,
        binding: String,
    },

    #[error("[SW-031] Input '{alias}' of module '{module}' needs parameter '{param}', which is not configured")]
    MissingParam {
        module: String,
        alias: String,
        param: String,
    },

    // ═══════════════════════════════════════════
    // PROVISIONING ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[SW-040] Module '{module}' failed to materialize: {reason}")]
    Provisioning { module: String, reason: String },

    // ═══════════════════════════════════════════
    // RUNTIME ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[SW-050] Internal invariant violated: {detail}")]
    InternalInvariantViolation { detail: String },

    #[error("[SW-051] Run cancelled before all modules settled")]
    Cancelled,

    #[error("[SW-052] IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WeaveError {
    /// Short error code, e.g. `SW-020`
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "SW-001",
            Self::InvalidSchema { .. } => "SW-002",
            Self::ManifestNotFound { .. } => "SW-003",
            Self::DuplicateModule { .. } => "SW-004",
            Self::InvalidModuleId { .. } => "SW-005",
            Self::EnvNameClash { .. } => "SW-006",
            Self::ConfigError { .. } => "SW-010",
            Self::InvalidOverride { .. } => "SW-011",
            Self::CyclicDependency { .. } => "SW-020",
            Self::DanglingReference { .. } => "SW-021",
            Self::InvalidBinding { .. } => "SW-030",
            Self::MissingParam { .. } => "SW-031",
            Self::Provisioning { .. } => "SW-040",
            Self::InternalInvariantViolation { .. } => "SW-050",
            Self::Cancelled => "SW-051",
            Self::Io(_) => "SW-052",
        }
    }

    /// Errors raised while planning, before any module was touched
    pub fn is_build_time(&self) -> bool {
        matches!(
            self,
            Self::ParseError { .. }
                | Self::InvalidSchema { .. }
                | Self::DuplicateModule { .. }
                | Self::InvalidModuleId { .. }
                | Self::EnvNameClash { .. }
                | Self::CyclicDependency { .. }
                | Self::DanglingReference { .. }
                | Self::InvalidBinding { .. }
                | Self::MissingParam { .. }
        )
    }

    pub(crate) fn invariant(detail: impl Into<String>) -> Self {
        Self::InternalInvariantViolation {
            detail: detail.into(),
        }
    }
}

impl FixSuggestion for WeaveError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            Self::ParseError { .. } => Some("Check YAML syntax: indentation and quoting"),
            Self::InvalidSchema { .. } => {
                Some("Use 'stackweave/manifest@0.1' as the schema version")
            }
            Self::ManifestNotFound { .. } => Some("Check the manifest path exists"),
            Self::DuplicateModule { .. } => Some("Give every module a unique id"),
            Self::InvalidModuleId { .. } => {
                Some("Use ids like 'vpc' or 'etl-stack' (no dots or spaces)")
            }
            Self::EnvNameClash { .. } => {
                Some("Rename one of them: '-', '.' and '_' all become '_' in the environment")
            }
            Self::ConfigError { .. } => Some("Check the TOML config file"),
            Self::InvalidOverride { .. } => Some("Write overrides as --set key=value"),
            Self::CyclicDependency { .. } => {
                Some("Remove one of the inputs or 'after' hints that close the cycle")
            }
            Self::DanglingReference { .. } => Some(
                "Enable the producer module, or gate the consumer behind the same feature",
            ),
            Self::InvalidBinding { .. } => Some("Bind inputs as producer_module.output_name"),
            Self::MissingParam { .. } => {
                Some("Set the parameter with --set or in [params], or give the input a default")
            }
            Self::Provisioning { .. } => {
                Some("Inspect the provisioner output; settled modules were left in place")
            }
            Self::InternalInvariantViolation { .. } => {
                Some("This is a bug in the orchestrator; please report it with the trace")
            }
            Self::Cancelled => Some("Re-run to continue; settled modules were left in place"),
            Self::Io(_) => Some("Check file path and permissions"),
        }
    }
}

/// Failure of a whole run, with what had settled before it
#[derive(Debug)]
pub struct RunFailure {
    /// First error encountered
    pub error: WeaveError,
    /// Node responsible for the failure, if any
    pub failed_node: Option<Arc<str>>,
    /// Modules that settled before the run stopped, in settle order
    pub settled: Vec<Arc<str>>,
    /// Outputs visible at the time of failure
    pub registry: OutputRegistry,
}

impl RunFailure {
    /// Failure raised before the walk started (nothing settled)
    pub fn before_start(error: WeaveError) -> Self {
        Self {
            error,
            failed_node: None,
            settled: Vec::new(),
            registry: OutputRegistry::new(),
        }
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
