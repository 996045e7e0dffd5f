//! Conditional inclusion - which modules take part in a run
//!
//! Validates:
//! - `include_if` predicates against the configuration
//! - output bindings point at declared, included modules and declared outputs
//! - ordering hints point at declared modules (hints to excluded modules are dropped)
//! - parameter inputs have a value or a default
//!
//! Error codes:
//! - SW-020: module binds or orders after itself
//! - SW-021: binding or hint points at something that will not exist
//! - SW-030: malformed `module.output` binding
//! - SW-031: parameter input with no value and no default

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::ast::{InputSource, Manifest, ModuleSpec};
use crate::binding::OutputRef;
use crate::config::Configuration;
use crate::error::{Result, WeaveError};

/// Modules that survived predicate evaluation, in declaration order
#[derive(Debug, Clone)]
pub struct Inclusion {
    included: Vec<Arc<ModuleSpec>>,
    excluded: Vec<Arc<str>>,
    /// (consumer, producer) hints dropped because the producer is excluded
    dropped_hints: Vec<(Arc<str>, Arc<str>)>,
}

impl Inclusion {
    /// Evaluate predicates, then check every reference of every included module
    pub fn resolve(manifest: &Manifest, config: &Configuration) -> Result<Self> {
        let mut included = Vec::with_capacity(manifest.modules.len());
        let mut excluded = Vec::new();

        for module in &manifest.modules {
            let keep = module
                .include_if
                .as_ref()
                .is_none_or(|predicate| predicate.evaluate(config));
            if keep {
                included.push(Arc::clone(module));
            } else {
                debug!(module = %module.id, "excluded by configuration");
                excluded.push(Arc::from(module.id.as_str()));
            }
        }

        let declared: FxHashSet<&str> = manifest.modules.iter().map(|m| m.id.as_str()).collect();
        let active: FxHashSet<&str> = included.iter().map(|m| m.id.as_str()).collect();
        let mut dropped_hints = Vec::new();

        for module in &included {
            check_inputs(module, manifest, &declared, &active, config)?;

            for hint in &module.after {
                if hint == &module.id {
                    return Err(WeaveError::CyclicDependency {
                        cycle: format!("{0} → {0}", module.id),
                    });
                }
                if !declared.contains(hint.as_str()) {
                    return Err(WeaveError::DanglingReference {
                        reference: format!("{} -> {}", module.id, hint),
                        reason: format!("ordering hint names undeclared module '{hint}'"),
                    });
                }
                if !active.contains(hint.as_str()) {
                    warn!(
                        module = %module.id,
                        after = %hint,
                        "dropping ordering hint to excluded module"
                    );
                    dropped_hints.push((Arc::from(module.id.as_str()), Arc::from(hint.as_str())));
                }
            }
        }

        Ok(Self {
            included,
            excluded,
            dropped_hints,
        })
    }

    pub fn included(&self) -> &[Arc<ModuleSpec>] {
        &self.included
    }

    pub fn excluded(&self) -> &[Arc<str>] {
        &self.excluded
    }

    pub fn is_included(&self, module: &str) -> bool {
        self.included.iter().any(|m| m.id == module)
    }

    pub fn dropped_hints(&self) -> &[(Arc<str>, Arc<str>)] {
        &self.dropped_hints
    }
}

fn check_inputs(
    module: &ModuleSpec,
    manifest: &Manifest,
    declared: &FxHashSet<&str>,
    active: &FxHashSet<&str>,
    config: &Configuration,
) -> Result<()> {
    for decl in &module.inputs {
        match &decl.source {
            InputSource::Output(binding) => {
                let r = OutputRef::parse_for(&module.id, &decl.alias, binding)?;
                let reference = format!("{}.{} -> {}", module.id, decl.alias, r.module);

                if r.module == module.id {
                    return Err(WeaveError::CyclicDependency {
                        cycle: format!("{0} → {0}", module.id),
                    });
                }
                if !declared.contains(r.module.as_str()) {
                    return Err(WeaveError::DanglingReference {
                        reference,
                        reason: format!("module '{}' is not declared", r.module),
                    });
                }
                if !active.contains(r.module.as_str()) {
                    return Err(WeaveError::DanglingReference {
                        reference,
                        reason: format!("module '{}' is excluded by configuration", r.module),
                    });
                }
                let producer_declares = manifest
                    .module(&r.module)
                    .is_some_and(|producer| producer.declares_output(&r.output));
                if !producer_declares {
                    return Err(WeaveError::DanglingReference {
                        reference,
                        reason: format!(
                            "module '{}' does not declare output '{}'",
                            r.module, r.output
                        ),
                    });
                }
            }
            InputSource::Param { param, default } => {
                if config.param(param).is_none() && default.is_none() {
                    return Err(WeaveError::MissingParam {
                        module: module.id.clone(),
                        alias: decl.alias.clone(),
                        param: param.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}
