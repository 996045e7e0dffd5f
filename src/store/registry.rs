//! OutputRegistry - module output storage with DashMap
//!
//! Two-step write: `record` stages a module's outputs (write-once), `publish`
//! makes them readable once the module (and its barrier, if any) has settled.
//! Lookups never see staged values.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::WeaveError;

/// Output name → value (ARNs, endpoints, table names)
pub type ModuleOutputs = BTreeMap<String, String>;

#[derive(Debug, Clone)]
struct Slot {
    outputs: Arc<ModuleOutputs>,
    visible: bool,
}

/// Thread-safe, write-once storage for module outputs
///
/// Uses Arc<str> keys so the same Arc is shared with graph nodes and events.
#[derive(Debug, Clone, Default)]
pub struct OutputRegistry {
    slots: Arc<DashMap<Arc<str>, Slot>>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a module's outputs; a second record for the same module is rejected
    pub fn record(
        &self,
        module: impl Into<Arc<str>>,
        outputs: ModuleOutputs,
    ) -> Result<(), WeaveError> {
        match self.slots.entry(module.into()) {
            MapEntry::Occupied(occupied) => Err(WeaveError::invariant(format!(
                "outputs of '{}' recorded twice",
                occupied.key()
            ))),
            MapEntry::Vacant(vacant) => {
                vacant.insert(Slot {
                    outputs: Arc::new(outputs),
                    visible: false,
                });
                Ok(())
            }
        }
    }

    /// Make a recorded module's outputs readable. Publishing again is a no-op.
    pub fn publish(&self, module: &str) -> Result<(), WeaveError> {
        let mut slot = self.slots.get_mut(module).ok_or_else(|| {
            WeaveError::invariant(format!("publish of '{module}' before its outputs were recorded"))
        })?;
        slot.visible = true;
        Ok(())
    }

    /// Look up one published output
    pub fn get(&self, module: &str, output: &str) -> Option<String> {
        let slot = self.slots.get(module)?;
        if !slot.visible {
            return None;
        }
        slot.outputs.get(output).cloned()
    }

    /// All published outputs of a module (Arc for O(1) cloning)
    pub fn outputs(&self, module: &str) -> Option<Arc<ModuleOutputs>> {
        self.slots
            .get(module)
            .filter(|slot| slot.visible)
            .map(|slot| Arc::clone(&slot.outputs))
    }

    pub fn is_published(&self, module: &str) -> bool {
        self.slots.get(module).is_some_and(|slot| slot.visible)
    }

    /// Recorded, published or not
    pub fn is_recorded(&self, module: &str) -> bool {
        self.slots.contains_key(module)
    }

    /// Published modules, sorted by name
    pub fn modules(&self) -> Vec<Arc<str>> {
        let mut modules: Vec<Arc<str>> = self
            .slots
            .iter()
            .filter(|slot| slot.visible)
            .map(|slot| Arc::clone(slot.key()))
            .collect();
        modules.sort();
        modules
    }

    /// Copy of every published output, sorted
    pub fn snapshot(&self) -> BTreeMap<String, ModuleOutputs> {
        self.slots
            .iter()
            .filter(|slot| slot.visible)
            .map(|slot| (slot.key().to_string(), (*slot.outputs).clone()))
            .collect()
    }

    /// Published outputs as JSON (`{module: {output: value}}`)
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.snapshot()).unwrap_or(Value::Null)
    }

    /// Number of published modules
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.visible).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs(pairs: &[(&str, &str)]) -> ModuleOutputs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn record_then_publish() {
        let registry = OutputRegistry::new();
        registry
            .record("ddb", outputs(&[("sessions_table", "llm-bot-sessions")]))
            .unwrap();

        assert!(registry.is_recorded("ddb"));
        assert!(!registry.is_published("ddb"));
        assert_eq!(registry.get("ddb", "sessions_table"), None);
        assert!(registry.outputs("ddb").is_none());
        assert!(registry.is_empty());

        registry.publish("ddb").unwrap();
        assert_eq!(
            registry.get("ddb", "sessions_table").as_deref(),
            Some("llm-bot-sessions")
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn record_is_write_once() {
        let registry = OutputRegistry::new();
        registry.record("vpc", outputs(&[("vpc_id", "vpc-1")])).unwrap();
        registry.publish("vpc").unwrap();

        let err = registry
            .record("vpc", outputs(&[("vpc_id", "vpc-2")]))
            .unwrap_err();
        assert_eq!(err.code(), "SW-050");
        assert_eq!(registry.get("vpc", "vpc_id").as_deref(), Some("vpc-1"));
    }

    #[test]
    fn publish_unknown_module_fails() {
        let registry = OutputRegistry::new();
        assert!(registry.publish("ghost").is_err());
    }

    #[test]
    fn publish_twice_is_noop() {
        let registry = OutputRegistry::new();
        registry.record("vpc", ModuleOutputs::new()).unwrap();
        registry.publish("vpc").unwrap();
        registry.publish("vpc").unwrap();
        assert_eq!(registry.modules(), vec![Arc::<str>::from("vpc")]);
    }

    #[test]
    fn unknown_output_is_none() {
        let registry = OutputRegistry::new();
        registry.record("vpc", outputs(&[("vpc_id", "vpc-1")])).unwrap();
        registry.publish("vpc").unwrap();
        assert_eq!(registry.get("vpc", "subnets"), None);
        assert_eq!(registry.get("other", "vpc_id"), None);
    }

    #[test]
    fn snapshot_and_json_hide_staged() {
        let registry = OutputRegistry::new();
        registry.record("vpc", outputs(&[("vpc_id", "vpc-1")])).unwrap();
        registry.record("os", outputs(&[("endpoint", "es")])).unwrap();
        registry.publish("vpc").unwrap();

        assert_eq!(registry.snapshot().len(), 1);
        assert_eq!(registry.to_json(), json!({"vpc": {"vpc_id": "vpc-1"}}));
    }

    #[test]
    fn clones_share_state() {
        let registry = OutputRegistry::new();
        let clone = registry.clone();
        clone.record("vpc", ModuleOutputs::new()).unwrap();
        clone.publish("vpc").unwrap();
        assert!(registry.is_published("vpc"));
    }
}
