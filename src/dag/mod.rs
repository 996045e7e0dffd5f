//! DAG Module - from manifest to materialization plan
//!
//! - `include`: conditional inclusion and reference checks
//! - `graph`: DependencyGraph (modules + barriers, cycle detection)
//! - `barrier`: delay barrier insertion
//! - `schedule`: Kahn scheduler producing a `Plan`
//!
//! The graph is fully known once planned; nothing is added during a run.

mod barrier;
mod graph;
mod include;
mod schedule;

use tracing::{debug, instrument};

use crate::ast::Manifest;
use crate::config::Configuration;
use crate::error::Result;

pub use barrier::{barrier_id, group_barrier_id, insert_barriers};
pub use graph::{Barrier, DepVec, DependencyGraph, Node, NodeKind};
pub use include::Inclusion;
pub use schedule::Plan;

/// Resolve inclusion, build the graph, insert barriers and schedule
#[instrument(skip_all, fields(manifest = %manifest.name))]
pub fn plan(manifest: &Manifest, config: &Configuration) -> Result<Plan> {
    let inclusion = Inclusion::resolve(manifest, config)?;
    let mut graph = DependencyGraph::build(&inclusion)?;
    let barriers = insert_barriers(&mut graph, config)?;
    let plan = Plan::schedule(graph)?.with_excluded(inclusion.excluded().to_vec());

    debug!(
        steps = plan.len(),
        barriers,
        excluded = plan.excluded().len(),
        "plan ready"
    );
    Ok(plan)
}
