//! stackweave - dependency-ordered orchestration of multi-stack deployments
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  ast/       YAML → Rust types (Manifest, ModuleSpec)         │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  dag/       inclusion, graph, barriers, scheduler (Plan)     │
//! │  runtime/   Orchestrator, lifecycle, provisioners            │
//! │  binding/   output references, ResolvedInputs                │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  store/     OutputRegistry (write-once, publish on settle)   │
//! │  event/     EventLog run trace                               │
//! │  report     output summary with fallbacks                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Data flows one way: configuration → inclusion → graph → barriers →
//! plan → materialization → registry → later materializations.
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`ast`] | YAML parsing → `Manifest`, `ModuleSpec`, `Predicate` |
//! | [`dag`] | Conditional inclusion, dependency graph, delay barriers, Kahn scheduling |
//! | [`runtime`] | Plan walk with bounded concurrency and cancellation |
//! | [`binding`] | `module.output` references and input resolution |
//! | [`store`] | Thread-safe module output storage (DashMap) |
//! | [`event`] | Event log for the run trace |
//! | [`report`] | Named deployment outputs |
//! | [`config`] | Configuration from TOML, environment and CLI overrides |
//! | [`error`] | Error types with fix suggestions |

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL - YAML → Rust types
// ═══════════════════════════════════════════════════════════════
pub mod ast;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER - Planning and execution
// ═══════════════════════════════════════════════════════════════
pub mod binding;
pub mod dag;
pub mod runtime;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER - Storage, events, reporting
// ═══════════════════════════════════════════════════════════════
pub mod event;
pub mod report;
pub mod store;

// ═══════════════════════════════════════════════════════════════
// CROSS-CUTTING - Error handling, configuration
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════

// Error types
pub use error::{FixSuggestion, RunFailure, WeaveError};

// Config types
pub use config::{BarrierGranularity, ConfigBuilder, Configuration};

// AST types (Domain Model)
pub use ast::{InputSource, Manifest, ModuleSpec, Predicate, ReportEntry};

// DAG types
pub use dag::{plan, DependencyGraph, Inclusion, Plan};

// Runtime types (Application Layer)
pub use runtime::{
    create_provisioner, CommandProvisioner, MaterializeRequest, MockProvisioner, Orchestrator,
    ProvisionError, Provisioner,
};

// Binding types
pub use binding::{OutputRef, ResolvedInputs};

// Event types
pub use event::{Event, EventKind, EventLog};

// Store types
pub use store::{ModuleOutputs, OutputRegistry};

// Report types
pub use report::OutputSummary;
