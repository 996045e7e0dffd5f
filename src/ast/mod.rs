//! AST Module - parsed stack manifests
//!
//! Contains Rust types parsed from YAML manifests:
//! - `manifest`: Manifest, ReportEntry
//! - `module`: ModuleSpec, InputDecl, InputSource
//! - `predicate`: Predicate (include_if conditions)
//!
//! These types are the "what": static structure known at plan time.
//! Ordering and execution live in `dag` and `runtime`.

mod manifest;
mod module;
mod predicate;

pub use manifest::{Manifest, ReportEntry, SCHEMA_V01};
pub use module::{env_name, InputDecl, InputSource, ModuleSpec};
pub use predicate::Predicate;
