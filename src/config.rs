//! Run configuration
//!
//! Loaded once before planning and never mutated afterwards.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. CLI overrides (`--enable`, `--disable`, `--set key=value`)
//! 2. Environment variables (`STACKWEAVE_REGION`, `STACKWEAVE_PREFIX`, `STACKWEAVE_MAX_PARALLELISM`)
//! 3. Config file (TOML)
//! 4. Defaults
//!
//! ```toml
//! region = "us-east-1"
//! prefix = "llm-bot"
//! max_parallelism = 4
//! default_settle_ms = 20000
//! barrier_granularity = "per_module"   # or "grouped"
//!
//! [features]
//! chat = true
//!
//! [params]
//! llm_model_id = "internlm2-chat-7b"
//!
//! [settle_ms]
//! api-stack = 30000
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeaveError};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_PREFIX: &str = "stackweave";
pub const DEFAULT_MAX_PARALLELISM: usize = 4;
pub const DEFAULT_SETTLE_MS: u64 = 20_000;

/// How delay barriers are laid out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierGranularity {
    /// One barrier per asynchronously propagating module
    #[default]
    PerModule,
    /// Modules sharing a `settle_group` share one barrier
    Grouped,
}

impl std::str::FromStr for BarrierGranularity {
    type Err = WeaveError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "per_module" => Ok(Self::PerModule),
            "grouped" => Ok(Self::Grouped),
            other => Err(WeaveError::ConfigError {
                reason: format!("unknown barrier_granularity '{other}' (per_module, grouped)"),
            }),
        }
    }
}

/// On-disk shape of the config file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    region: Option<String>,
    prefix: Option<String>,
    max_parallelism: Option<usize>,
    default_settle_ms: Option<u64>,
    barrier_granularity: Option<BarrierGranularity>,
    #[serde(default)]
    features: BTreeMap<String, bool>,
    #[serde(default)]
    params: BTreeMap<String, String>,
    #[serde(default)]
    settle_ms: BTreeMap<String, u64>,
}

/// Immutable configuration snapshot for one run
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    region: String,
    prefix: String,
    max_parallelism: usize,
    default_settle: Duration,
    barrier_granularity: BarrierGranularity,
    features: BTreeMap<String, bool>,
    params: BTreeMap<String, String>,
    settle_overrides: BTreeMap<String, Duration>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            default_settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            barrier_granularity: BarrierGranularity::default(),
            features: BTreeMap::new(),
            params: BTreeMap::new(),
            settle_overrides: BTreeMap::new(),
        }
    }
}

impl Configuration {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    pub fn barrier_granularity(&self) -> BarrierGranularity {
        self.barrier_granularity
    }

    pub fn default_settle(&self) -> Duration {
        self.default_settle
    }

    /// Unknown features are disabled
    pub fn feature_enabled(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn features(&self) -> &BTreeMap<String, bool> {
        &self.features
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Settle duration for a module: config override, then the module's own value, then the default
    pub fn settle_for(&self, module_id: &str, declared_ms: Option<u64>) -> Duration {
        self.settle_overrides
            .get(module_id)
            .copied()
            .or_else(|| declared_ms.map(Duration::from_millis))
            .unwrap_or(self.default_settle)
    }
}

/// Consuming builder; the only way to change a configuration before it is frozen
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Configuration,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a TOML config file on top of the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| WeaveError::ConfigError {
            reason: format!("Failed to read config file {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| WeaveError::ConfigError {
            reason: format!("Failed to parse config file: {}", e),
        })?;

        let mut config = Configuration::default();
        if let Some(region) = file.region {
            config.region = region;
        }
        if let Some(prefix) = file.prefix {
            config.prefix = prefix;
        }
        if let Some(n) = file.max_parallelism {
            config.max_parallelism = n;
        }
        if let Some(ms) = file.default_settle_ms {
            config.default_settle = Duration::from_millis(ms);
        }
        if let Some(granularity) = file.barrier_granularity {
            config.barrier_granularity = granularity;
        }
        config.features = file.features;
        config.params = file.params;
        config.settle_overrides = file
            .settle_ms
            .into_iter()
            .map(|(module, ms)| (module, Duration::from_millis(ms)))
            .collect();

        Ok(Self { config })
    }

    /// Merge process environment variables
    pub fn with_env(self) -> Result<Self> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Merge environment variables from an arbitrary lookup (tests inject a map)
    pub fn with_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(region) = lookup("STACKWEAVE_REGION").filter(|v| !v.is_empty()) {
            self.config.region = region;
        }
        if let Some(prefix) = lookup("STACKWEAVE_PREFIX").filter(|v| !v.is_empty()) {
            self.config.prefix = prefix;
        }
        if let Some(raw) = lookup("STACKWEAVE_MAX_PARALLELISM").filter(|v| !v.is_empty()) {
            self.config.max_parallelism = parse_number("STACKWEAVE_MAX_PARALLELISM", &raw)?;
        }
        Ok(self)
    }

    pub fn enable(mut self, feature: impl Into<String>) -> Self {
        self.config.features.insert(feature.into(), true);
        self
    }

    pub fn disable(mut self, feature: impl Into<String>) -> Self {
        self.config.features.insert(feature.into(), false);
        self
    }

    /// Apply a `key=value` override
    ///
    /// Known top-level keys (`region`, `prefix`, `max_parallelism`, `default_settle_ms`,
    /// `barrier_granularity`) and `settle_ms.<module>` are recognised; everything else
    /// becomes a parameter.
    pub fn set(mut self, assignment: &str) -> Result<Self> {
        let (key, value) = assignment
            .split_once('=')
            .map(|(k, v)| (k.trim(), v.trim()))
            .filter(|(k, _)| !k.is_empty())
            .ok_or_else(|| WeaveError::InvalidOverride {
                value: assignment.to_string(),
            })?;

        match key {
            "region" => self.config.region = value.to_string(),
            "prefix" => self.config.prefix = value.to_string(),
            "max_parallelism" => self.config.max_parallelism = parse_number(key, value)?,
            "default_settle_ms" => {
                self.config.default_settle = Duration::from_millis(parse_number(key, value)?)
            }
            "barrier_granularity" => self.config.barrier_granularity = value.parse()?,
            _ => match key.strip_prefix("settle_ms.") {
                Some(module) => {
                    let ms: u64 = parse_number(key, value)?;
                    self.config
                        .settle_overrides
                        .insert(module.to_string(), Duration::from_millis(ms));
                }
                None => {
                    self.config.params.insert(key.to_string(), value.to_string());
                }
            },
        }
        Ok(self)
    }

    pub fn build(self) -> Result<Configuration> {
        if self.config.max_parallelism == 0 {
            return Err(WeaveError::ConfigError {
                reason: "max_parallelism must be at least 1".to_string(),
            });
        }
        Ok(self.config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| WeaveError::ConfigError {
        reason: format!("{key} expects a non-negative integer, got '{raw}'"),
    })
}
