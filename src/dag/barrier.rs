//! Delay barriers - settle nodes after asynchronously propagating modules
//!
//! Each async module gets one barrier that becomes the only thing its
//! consumers wait on. A barrier settles no sooner than its settle duration
//! after its (last) member settled; until then the members' outputs stay
//! hidden in the registry.
//!
//! Barrier ids:
//! - `<module>*` for a per-module barrier
//! - `settle:<group>` for a grouped barrier

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::{BarrierGranularity, Configuration};
use crate::error::{Result, WeaveError};

use super::graph::{Barrier, DependencyGraph, Node, NodeKind};

/// Barrier id for a single module
pub fn barrier_id(module: &str) -> String {
    format!("{module}*")
}

/// Barrier id for a settle group
pub fn group_barrier_id(group: &str) -> String {
    format!("settle:{group}")
}

/// Insert barriers for every async module not yet guarded by one.
///
/// Modules are guarded one at a time in node order, so each grouping
/// decision sees the graph as rewritten by the previous ones.
///
/// Returns the number of barrier nodes created; a second call on the same
/// graph creates none and leaves the graph unchanged.
pub fn insert_barriers(graph: &mut DependencyGraph, config: &Configuration) -> Result<usize> {
    let grouped = config.barrier_granularity() == BarrierGranularity::Grouped;

    let unguarded: Vec<(Arc<str>, Option<String>, Duration)> = graph
        .nodes()
        .iter()
        .filter_map(|node| {
            let module = node.module()?;
            if !module.async_propagation || graph.barrier_of(&node.id).is_some() {
                return None;
            }
            let group = module.settle_group.clone().filter(|_| grouped);
            let settle = config.settle_for(&module.id, module.settle_ms);
            Some((Arc::clone(&node.id), group, settle))
        })
        .collect();

    let mut created = 0;
    for (module, group, settle) in unguarded {
        let id = match group.map(|g| group_barrier_id(&g)) {
            Some(id) if can_join(graph, &id, &module) => id,
            Some(id) => {
                debug!(
                    module = %module,
                    group = %id,
                    "joining the group barrier would close a cycle, using own barrier"
                );
                barrier_id(&module)
            }
            None => barrier_id(&module),
        };
        if guard(graph, &id, &module, settle)? {
            created += 1;
        }
    }

    Ok(created)
}

/// Whether `member` can join the existing barrier `barrier` without a cycle.
///
/// Joining adds `barrier → member` and turns every `consumer → member` into
/// `consumer → barrier`. That closes a cycle exactly when the member already
/// reaches the barrier, or the barrier already reaches one of the consumers.
fn can_join(graph: &DependencyGraph, barrier: &str, member: &str) -> bool {
    if !graph.contains(barrier) {
        return true;
    }
    !graph.has_path(member, barrier)
        && !graph
            .dependents(member)
            .iter()
            .any(|consumer| graph.has_path(barrier, consumer))
}

/// Put `member` behind barrier `id`, creating the barrier if needed, and
/// redirect the member's consumers to it. Returns true if a node was created.
fn guard(graph: &mut DependencyGraph, id: &str, member: &Arc<str>, settle: Duration) -> Result<bool> {
    let created = match graph.node_mut(id) {
        Some(Node {
            kind: NodeKind::Barrier(existing),
            ..
        }) => {
            if !existing.members.contains(member) {
                existing.members.push(Arc::clone(member));
            }
            existing.settle = existing.settle.max(settle);
            graph.move_after(id, member)?;
            false
        }
        Some(_) => {
            return Err(WeaveError::invariant(format!(
                "barrier id '{id}' collides with a module"
            )))
        }
        None => {
            let position = graph.position(member).map_or(graph.len(), |p| p + 1);
            graph.insert_node(
                position,
                Node {
                    id: Arc::from(id),
                    kind: NodeKind::Barrier(Barrier {
                        members: vec![Arc::clone(member)],
                        settle,
                    }),
                },
            );
            true
        }
    };

    let consumers: Vec<Arc<str>> = graph
        .dependents(member)
        .iter()
        .filter(|c| c.as_ref() != id)
        .cloned()
        .collect();
    for consumer in consumers {
        graph.remove_edge(&consumer, member);
        graph.add_edge(&consumer, id)?;
    }
    graph.add_edge(id, member)?;
    graph.set_barrier(member, id)?;

    debug!(
        barrier = %id,
        module = %member,
        settle_ms = settle.as_millis() as u64,
        "module guarded by barrier"
    );
    Ok(created)
}
