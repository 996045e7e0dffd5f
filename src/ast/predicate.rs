//! `include_if` predicates
//!
//! Pure functions of the configuration: same configuration, same answer.

use serde::Deserialize;

use crate::config::Configuration;

/// Inclusion condition (serde auto-detects the form)
///
/// ```yaml
/// include_if: { feature: chat }
/// include_if: { param: deployment_mode, equals: ALL }
/// include_if: { not: { feature: legacy_ui } }
/// include_if: { all: [ { feature: knowledge_base }, { feature: intelli_agent_kb } ] }
/// include_if: { any: [ ... ] }
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Predicate {
    Feature { feature: String },
    ParamEquals { param: String, equals: String },
    Not { not: Box<Predicate> },
    All { all: Vec<Predicate> },
    Any { any: Vec<Predicate> },
}

impl Predicate {
    pub fn feature(name: impl Into<String>) -> Self {
        Self::Feature {
            feature: name.into(),
        }
    }

    pub fn param_equals(param: impl Into<String>, value: impl Into<String>) -> Self {
        Self::ParamEquals {
            param: param.into(),
            equals: value.into(),
        }
    }

    pub fn negate(inner: Predicate) -> Self {
        Self::Not {
            not: Box::new(inner),
        }
    }

    pub fn evaluate(&self, config: &Configuration) -> bool {
        match self {
            Self::Feature { feature } => config.feature_enabled(feature),
            Self::ParamEquals { param, equals } => config.param(param) == Some(equals.as_str()),
            Self::Not { not } => !not.evaluate(config),
            Self::All { all } => all.iter().all(|p| p.evaluate(config)),
            Self::Any { any } => any.iter().any(|p| p.evaluate(config)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    fn config() -> Configuration {
        ConfigBuilder::new()
            .enable("chat")
            .disable("knowledge_base")
            .set("deployment_mode=ALL")
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn parse_all_forms() {
        let yaml = r#"
all:
  - feature: chat
  - not: { feature: knowledge_base }
  - any:
      - param: deployment_mode
        equals: ALL
      - feature: never
"#;
        let predicate: Predicate = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(predicate, Predicate::All { ref all } if all.len() == 3));
        assert!(predicate.evaluate(&config()));
    }

    #[test]
    fn feature_missing_is_false() {
        assert!(!Predicate::feature("unknown").evaluate(&config()));
    }

    #[test]
    fn param_equals_compares_exactly() {
        let cfg = config();
        assert!(Predicate::param_equals("deployment_mode", "ALL").evaluate(&cfg));
        assert!(!Predicate::param_equals("deployment_mode", "all").evaluate(&cfg));
        assert!(!Predicate::param_equals("missing", "ALL").evaluate(&cfg));
    }

    #[test]
    fn negate_flips() {
        let cfg = config();
        assert!(Predicate::negate(Predicate::feature("knowledge_base")).evaluate(&cfg));
        assert!(!Predicate::negate(Predicate::feature("chat")).evaluate(&cfg));
    }

    #[test]
    fn empty_all_and_any() {
        let cfg = config();
        assert!(Predicate::All { all: vec![] }.evaluate(&cfg));
        assert!(!Predicate::Any { any: vec![] }.evaluate(&cfg));
    }
}
