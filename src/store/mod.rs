//! Store Module - output state for one run
//!
//! Thread-safe storage for module outputs.
//! Uses DashMap for lock-free concurrent access.
//!
//! Key types:
//! - `OutputRegistry`: write-once store of produced values
//! - `ModuleOutputs`: output name → value for one module

mod registry;

pub use registry::{ModuleOutputs, OutputRegistry};
