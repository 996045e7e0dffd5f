//! Module declarations
//!
//! A module is one independently provisionable stack. Its inputs keep
//! declaration order, which is also the order they are resolved in.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashMap;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use super::predicate::Predicate;

/// One declared module
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModuleSpec {
    pub id: String,

    /// Input alias → source, in declaration order
    #[serde(default, deserialize_with = "ordered_inputs")]
    pub inputs: Vec<InputDecl>,

    /// Output names this module produces
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Ordering hints: modules that must settle first without feeding an input
    #[serde(default)]
    pub after: Vec<String>,

    /// Outputs become usable only some time after the provider reports success
    #[serde(default)]
    pub async_propagation: bool,

    /// Minimum settle duration for this module's barrier
    #[serde(default)]
    pub settle_ms: Option<u64>,

    /// Shared barrier group (only honoured with grouped barrier granularity)
    #[serde(default)]
    pub settle_group: Option<String>,

    #[serde(default)]
    pub include_if: Option<Predicate>,

    /// Static parameters handed to the provisioner
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Shell command used by the command provisioner
    #[serde(default)]
    pub command: Option<String>,
}

/// A named input and where its value comes from
#[derive(Debug, Clone, PartialEq)]
pub struct InputDecl {
    pub alias: String,
    pub source: InputSource,
}

/// Two forms (serde auto-detects via untagged):
/// - `alias: producer.output` binds another module's output
/// - `alias: { param: key, default: value }` reads a configuration parameter
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InputSource {
    Output(String),
    Param {
        param: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl ModuleSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            after: Vec::new(),
            async_propagation: false,
            settle_ms: None,
            settle_group: None,
            include_if: None,
            params: BTreeMap::new(),
            command: None,
        }
    }

    /// Bind `alias` to `producer.output`
    pub fn input(mut self, alias: impl Into<String>, binding: impl Into<String>) -> Self {
        self.inputs.push(InputDecl {
            alias: alias.into(),
            source: InputSource::Output(binding.into()),
        });
        self
    }

    /// Bind `alias` to a configuration parameter
    pub fn param_input(
        mut self,
        alias: impl Into<String>,
        param: impl Into<String>,
        default: Option<&str>,
    ) -> Self {
        self.inputs.push(InputDecl {
            alias: alias.into(),
            source: InputSource::Param {
                param: param.into(),
                default: default.map(str::to_string),
            },
        });
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn after(mut self, module: impl Into<String>) -> Self {
        self.after.push(module.into());
        self
    }

    /// Mark as asynchronously propagating, optionally with its own settle duration
    pub fn async_propagation(mut self, settle_ms: Option<u64>) -> Self {
        self.async_propagation = true;
        self.settle_ms = settle_ms;
        self
    }

    pub fn settle_group(mut self, group: impl Into<String>) -> Self {
        self.settle_group = Some(group.into());
        self
    }

    pub fn include_if(mut self, predicate: Predicate) -> Self {
        self.include_if = Some(predicate);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn declares_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }

    /// First two input aliases, or param keys, that share an env name
    pub fn env_name_clash(&self) -> Option<(&str, &str)> {
        first_clash(self.inputs.iter().map(|i| i.alias.as_str()))
            .or_else(|| first_clash(self.params.keys().map(String::as_str)))
    }
}

/// `llm-model.id` → `LLM_MODEL_ID`
pub fn env_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn first_clash<'a>(names: impl Iterator<Item = &'a str>) -> Option<(&'a str, &'a str)> {
    let mut seen: FxHashMap<String, &str> = FxHashMap::default();
    for name in names {
        if let Some(first) = seen.insert(env_name(name), name) {
            return Some((first, name));
        }
    }
    None
}

fn ordered_inputs<'de, D>(deserializer: D) -> Result<Vec<InputDecl>, D::Error>
where
    D: Deserializer<'de>,
{
    struct InputsVisitor;

    impl<'de> Visitor<'de> for InputsVisitor {
        type Value = Vec<InputDecl>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of input alias to binding")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut inputs: Vec<InputDecl> = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((alias, source)) = map.next_entry::<String, InputSource>()? {
                if inputs.iter().any(|i| i.alias == alias) {
                    return Err(de::Error::custom(format!(
                        "duplicate input alias '{alias}'"
                    )));
                }
                inputs.push(InputDecl { alias, source });
            }
            Ok(inputs)
        }
    }

    deserializer.deserialize_map(InputsVisitor)
}
