//! Binding Module - data wiring between modules
//!
//! Handles the `inputs:` block of a module:
//! - `entry`: `producer.output` references (OutputRef)
//! - `resolve`: runtime resolution against the output registry (ResolvedInputs)
//!
//! ```yaml
//! inputs:
//!   domain: os-stack.domain_endpoint                           # output of another module
//!   model_id: { param: llm_model_id, default: internlm2-chat-7b } # configuration parameter
//! ```
//!
//! Data flow:
//! ```text
//! YAML `inputs:` → InputDecl (ast)
//!                      ↓
//!          OutputRef::parse (plan time: edges + dangling checks)
//!                      ↓
//!    ResolvedInputs::resolve (run time: registry lookups)
//!                      ↓
//!              Provisioner request
//! ```

mod entry;
mod resolve;

pub use entry::OutputRef;
pub use resolve::ResolvedInputs;
