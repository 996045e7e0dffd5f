//! Orchestrator - walks a plan with tokio concurrency
//!
//! Performance notes:
//! - Arc for zero-cost module/config sharing across tasks
//! - JoinSet for collecting module and barrier tasks
//!
//! One logical loop owns all run state (lifecycle, registry, ready queue).
//! Spawned tasks only call the provisioner or sleep; their results come back
//! through the JoinSet and are applied by the loop, so every state change and
//! every event happens in one place, in order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use rustc_hash::FxHashMap;
use tokio::task::{AbortHandle, Id, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::ast::{Manifest, ModuleSpec};
use crate::binding::ResolvedInputs;
use crate::config::Configuration;
use crate::dag::{self, Barrier, NodeKind, Plan};
use crate::error::{Result, RunFailure, WeaveError};
use crate::event::{EventKind, EventLog};
use crate::store::{ModuleOutputs, OutputRegistry};

use super::lifecycle::{Lifecycle, NodeState};
use super::provisioner::{MaterializeRequest, ProvisionError, Provisioner};

/// Result of one spawned node task
enum Outcome {
    Module {
        result: std::result::Result<ModuleOutputs, ProvisionError>,
        elapsed: Duration,
    },
    Barrier {
        waited: Duration,
    },
}

/// Dependency-ordered materializer with event sourcing
pub struct Orchestrator {
    provisioner: Arc<dyn Provisioner>,
    event_log: EventLog,
    cancel: CancellationToken,
    progress: bool,
}

impl Orchestrator {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            provisioner,
            event_log: EventLog::new(),
            cancel: CancellationToken::new(),
            progress: false,
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Print one colored line per node to stdout
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Get the event log for inspection/export
    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    /// Token that stops new nodes from starting when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn provisioner(&self) -> &dyn Provisioner {
        self.provisioner.as_ref()
    }

    /// Resolve, build, insert barriers and schedule without materializing
    pub fn plan(&self, manifest: &Manifest, config: &Configuration) -> Result<Plan> {
        dag::plan(manifest, config)
    }

    /// Plan and materialize every included module
    ///
    /// Build-time errors are returned before anything starts. On a
    /// materialization failure no further node starts; in-flight modules are
    /// drained and the failure carries whatever had been published.
    #[instrument(skip_all, fields(manifest = %manifest.name))]
    pub async fn materialize(
        &self,
        manifest: &Manifest,
        config: &Configuration,
    ) -> std::result::Result<OutputRegistry, RunFailure> {
        let plan = match self.plan(manifest, config) {
            Ok(plan) => plan,
            Err(e) => {
                self.event_log.emit(EventKind::RunFailed {
                    error: e.to_string(),
                    failed_node: None,
                });
                error!(error = %e, "planning failed");
                return Err(RunFailure::before_start(e));
            }
        };
        self.run(&manifest.name, &plan, config).await
    }

    /// Materialize an already computed plan
    #[instrument(skip_all, fields(run = %name, steps = plan.len()))]
    pub async fn run(
        &self,
        name: &str,
        plan: &Plan,
        config: &Configuration,
    ) -> std::result::Result<OutputRegistry, RunFailure> {
        let run_start = Instant::now();
        let config = Arc::new(config.clone());
        let max_parallelism = config.max_parallelism();
        info!(steps = plan.len(), max_parallelism, "starting run");

        self.event_log.emit(EventKind::RunStarted {
            run: name.to_string(),
            node_count: plan.len(),
            plan: plan.steps().to_vec(),
        });

        let mut walk = Walk::new(plan, self.event_log.clone(), self.progress);
        walk.schedule_roots();

        let mut tasks: JoinSet<(Arc<str>, Outcome)> = JoinSet::new();
        let mut barrier_tasks: Vec<AbortHandle> = Vec::new();
        // task id → node, so a panicked task can still be attributed
        let mut task_nodes: FxHashMap<Id, (Arc<str>, Instant)> = FxHashMap::default();
        let mut modules_in_flight = 0usize;

        loop {
            if !walk.halted && self.cancel.is_cancelled() {
                walk.cancel();
            }

            // ═══════════════════════════════════════════
            // LAUNCH ready nodes (declaration order)
            // ═══════════════════════════════════════════
            if !walk.halted {
                let mut deferred = Vec::new();
                while let Some(Reverse(position)) = walk.ready.pop() {
                    let id = Arc::clone(&plan.steps()[position]);
                    let Some(node) = plan.graph().node(&id) else {
                        walk.fail(
                            WeaveError::invariant(format!("planned node '{id}' not in graph")),
                            Some(id),
                        );
                        break;
                    };

                    match &node.kind {
                        NodeKind::Module(spec) => {
                            if modules_in_flight >= max_parallelism {
                                deferred.push(Reverse(position));
                                continue;
                            }
                            match walk.start_module(&id, spec, &config) {
                                Ok(inputs) => {
                                    modules_in_flight += 1;
                                    let provisioner = Arc::clone(&self.provisioner);
                                    let spec = Arc::clone(spec);
                                    let config = Arc::clone(&config);
                                    let node = Arc::clone(&id);
                                    let handle = tasks.spawn(async move {
                                        let started = Instant::now();
                                        let request = MaterializeRequest {
                                            module: &spec,
                                            inputs: &inputs,
                                            config: &config,
                                        };
                                        let result = provisioner.materialize(request).await;
                                        let elapsed = started.elapsed();
                                        (id, Outcome::Module { result, elapsed })
                                    });
                                    task_nodes.insert(handle.id(), (node, Instant::now()));
                                }
                                Err(e) => {
                                    walk.fail(e, Some(id));
                                    break;
                                }
                            }
                        }
                        NodeKind::Barrier(barrier) => match walk.start_barrier(&id, barrier) {
                            Ok(deadline) => {
                                let waited = deadline.saturating_duration_since(Instant::now());
                                let node = Arc::clone(&id);
                                let handle = tasks.spawn(async move {
                                    tokio::time::sleep_until(deadline).await;
                                    (id, Outcome::Barrier { waited })
                                });
                                task_nodes.insert(handle.id(), (node, Instant::now()));
                                barrier_tasks.push(handle);
                            }
                            Err(e) => {
                                walk.fail(e, Some(id));
                                break;
                            }
                        },
                    }
                }
                walk.ready.extend(deferred);
            }

            if walk.halted {
                // barrier waits are pure sleeps: nothing to drain
                for handle in barrier_tasks.drain(..) {
                    handle.abort();
                }
            }

            if tasks.is_empty() {
                break;
            }

            // ═══════════════════════════════════════════
            // COLLECT one finished node
            // ═══════════════════════════════════════════
            let joined = tokio::select! {
                biased;
                () = self.cancel.cancelled(), if !walk.halted => {
                    info!("cancellation requested, draining in-flight modules");
                    walk.cancel();
                    continue;
                }
                joined = tasks.join_next_with_id() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok((task, (id, Outcome::Module { result, elapsed }))) => {
                    task_nodes.remove(&task);
                    modules_in_flight = modules_in_flight.saturating_sub(1);
                    if let Err(e) = walk.finish_module(&id, result, elapsed) {
                        walk.fail(e, Some(id));
                    }
                }
                Ok((task, (id, Outcome::Barrier { waited }))) => {
                    task_nodes.remove(&task);
                    if let Err(e) = walk.finish_barrier(&id, waited) {
                        walk.fail(e, Some(id));
                    }
                }
                Err(e) => {
                    let node = task_nodes.remove(&e.id());
                    if e.is_cancelled() {
                        continue;
                    }
                    let Some((id, started)) = node else {
                        walk.fail(
                            WeaveError::invariant(format!("untracked node task panicked: {e}")),
                            None,
                        );
                        continue;
                    };
                    let is_module = plan.graph().node(&id).is_some_and(|n| n.module().is_some());
                    if !is_module {
                        walk.fail(
                            WeaveError::invariant(format!("barrier task panicked: {e}")),
                            Some(id),
                        );
                        continue;
                    }
                    modules_in_flight = modules_in_flight.saturating_sub(1);
                    let result = Err(ProvisionError::Panicked(panic_message(e)));
                    if let Err(e) = walk.finish_module(&id, result, started.elapsed()) {
                        walk.fail(e, Some(id));
                    }
                }
            }
        }

        let total_duration_ms = run_start.elapsed().as_millis() as u64;
        walk.into_result(total_duration_ms)
    }
}

/// Best-effort text of a task panic payload
fn panic_message(error: tokio::task::JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
        Err(error) => error.to_string(),
    }
}

/// Mutable state of one run, owned by the orchestrator loop
struct Walk<'a> {
    plan: &'a Plan,
    event_log: EventLog,
    progress: bool,
    registry: OutputRegistry,
    lifecycle: Lifecycle,
    /// node -> unsettled dependencies
    waiting_on: FxHashMap<Arc<str>, usize>,
    /// plan positions of scheduled nodes not yet started
    ready: BinaryHeap<Reverse<usize>>,
    settled_at: FxHashMap<Arc<str>, Instant>,
    /// modules in settle order
    settled_modules: Vec<Arc<str>>,
    failure: Option<(WeaveError, Option<Arc<str>>)>,
    cancelled: bool,
    /// no new nodes may start
    halted: bool,
}

impl<'a> Walk<'a> {
    fn new(plan: &'a Plan, event_log: EventLog, progress: bool) -> Self {
        let graph = plan.graph();
        let waiting_on = plan
            .steps()
            .iter()
            .map(|id| (Arc::clone(id), graph.dependencies(id).len()))
            .collect();

        Self {
            plan,
            event_log,
            progress,
            registry: OutputRegistry::new(),
            lifecycle: Lifecycle::new(plan.steps()),
            waiting_on,
            ready: BinaryHeap::new(),
            settled_at: FxHashMap::default(),
            settled_modules: Vec::new(),
            failure: None,
            cancelled: false,
            halted: false,
        }
    }

    fn schedule_roots(&mut self) {
        let roots: Vec<Arc<str>> = self
            .plan
            .steps()
            .iter()
            .filter(|id| self.waiting_on.get(*id) == Some(&0))
            .cloned()
            .collect();
        for id in roots {
            if let Err(e) = self.schedule(&id) {
                self.fail(e, Some(id));
                return;
            }
        }
    }

    fn schedule(&mut self, id: &Arc<str>) -> Result<()> {
        self.lifecycle.advance(id, NodeState::Scheduled)?;
        let position = self
            .plan
            .position(id)
            .ok_or_else(|| WeaveError::invariant(format!("node '{id}' missing from plan")))?;
        self.ready.push(Reverse(position));

        self.event_log.emit(EventKind::NodeScheduled {
            node: Arc::clone(id),
            dependencies: self.plan.graph().dependencies(id).to_vec(),
        });
        Ok(())
    }

    /// Release consumers of a node that just settled
    fn release(&mut self, id: &str) -> Result<()> {
        let plan = self.plan;
        let graph = plan.graph();
        for consumer in graph.dependents(id) {
            let remaining = self.waiting_on.get_mut(consumer).ok_or_else(|| {
                WeaveError::invariant(format!("consumer '{consumer}' missing from plan"))
            })?;
            *remaining = remaining.checked_sub(1).ok_or_else(|| {
                WeaveError::invariant(format!("'{consumer}' released more often than it has dependencies"))
            })?;
            if *remaining == 0 {
                self.schedule(consumer)?;
            }
        }
        Ok(())
    }

    /// Resolve inputs and mark materializing; the caller spawns the provisioner call
    fn start_module(
        &mut self,
        id: &Arc<str>,
        spec: &ModuleSpec,
        config: &Configuration,
    ) -> Result<ResolvedInputs> {
        self.lifecycle.advance(id, NodeState::Materializing)?;
        let inputs = ResolvedInputs::resolve(spec, &self.registry, config)?;

        self.event_log.emit(EventKind::ModuleStarted {
            node: Arc::clone(id),
            inputs: inputs.to_value(),
        });
        debug!(module = %id, inputs = inputs.len(), "materializing");
        if self.progress {
            println!("  {} {} {}", "[⟳]".yellow(), id, "materializing...".dimmed());
        }
        Ok(inputs)
    }

    /// Mark a barrier materializing and compute when it may settle
    fn start_barrier(&mut self, id: &Arc<str>, barrier: &Barrier) -> Result<Instant> {
        self.lifecycle.advance(id, NodeState::Materializing)?;

        let mut last_settled: Option<Instant> = None;
        for member in &barrier.members {
            let at = self.settled_at.get(member).copied().ok_or_else(|| {
                WeaveError::invariant(format!(
                    "barrier '{id}' started before member '{member}' settled"
                ))
            })?;
            last_settled = Some(last_settled.map_or(at, |l| l.max(at)));
        }
        let deadline = last_settled.unwrap_or_else(Instant::now) + barrier.settle;
        let remaining = deadline.saturating_duration_since(Instant::now());

        self.event_log.emit(EventKind::BarrierWaiting {
            node: Arc::clone(id),
            remaining_ms: remaining.as_millis() as u64,
        });
        debug!(barrier = %id, remaining_ms = remaining.as_millis() as u64, "waiting to settle");
        if self.progress {
            println!(
                "  {} {} {}",
                "[…]".cyan(),
                id,
                format!("settling {:.1}s", remaining.as_secs_f32()).dimmed()
            );
        }
        Ok(deadline)
    }

    fn finish_module(
        &mut self,
        id: &Arc<str>,
        result: std::result::Result<ModuleOutputs, ProvisionError>,
        elapsed: Duration,
    ) -> Result<()> {
        let duration_ms = elapsed.as_millis() as u64;
        let plan = self.plan;
        let spec = plan
            .graph()
            .node(id)
            .and_then(|n| n.module())
            .ok_or_else(|| WeaveError::invariant(format!("'{id}' is not a module")))?;

        let outputs = result.map_err(|e| e.to_string()).and_then(|outputs| {
            match spec.outputs.iter().find(|o| !outputs.contains_key(*o)) {
                Some(missing) => Err(format!(
                    "provisioner did not produce declared output '{missing}'"
                )),
                None => Ok(outputs),
            }
        });

        let outputs = match outputs {
            Ok(outputs) => outputs,
            Err(reason) => {
                self.lifecycle.advance(id, NodeState::Failed)?;
                self.event_log.emit(EventKind::ModuleFailed {
                    node: Arc::clone(id),
                    error: reason.clone(),
                    duration_ms,
                });
                error!(module = %id, %reason, "materialization failed");
                if self.progress {
                    println!("  {} {} {}", "[✗]".red(), id, reason.red());
                }
                self.fail(
                    WeaveError::Provisioning {
                        module: id.to_string(),
                        reason,
                    },
                    Some(Arc::clone(id)),
                );
                return Ok(());
            }
        };

        for extra in outputs.keys().filter(|k| !spec.declares_output(k)) {
            warn!(module = %id, output = %extra, "provisioner returned undeclared output");
        }

        self.registry.record(Arc::clone(id), outputs)?;
        self.lifecycle.advance(id, NodeState::Settled)?;
        self.settled_at.insert(Arc::clone(id), Instant::now());
        self.settled_modules.push(Arc::clone(id));
        self.event_log.emit(EventKind::ModuleSettled {
            node: Arc::clone(id),
            duration_ms,
        });
        info!(module = %id, duration_ms, "module settled");
        if self.progress {
            println!(
                "  {} {} {}",
                "[✓]".green(),
                id,
                format!("({:.1}s)", elapsed.as_secs_f32()).dimmed()
            );
        }

        // outputs behind a barrier stay hidden until it settles
        if plan.graph().barrier_of(id).is_none() {
            self.publish(id)?;
        }

        if !self.halted {
            self.release(id)?;
        }
        Ok(())
    }

    fn finish_barrier(&mut self, id: &Arc<str>, waited: Duration) -> Result<()> {
        let plan = self.plan;
        let barrier = plan
            .graph()
            .node(id)
            .and_then(|n| n.barrier())
            .ok_or_else(|| WeaveError::invariant(format!("'{id}' is not a barrier")))?;

        self.lifecycle.advance(id, NodeState::Settled)?;
        self.settled_at.insert(Arc::clone(id), Instant::now());
        self.event_log.emit(EventKind::BarrierSettled {
            node: Arc::clone(id),
            waited_ms: waited.as_millis() as u64,
        });
        info!(barrier = %id, waited_ms = waited.as_millis() as u64, "barrier settled");

        for member in &barrier.members {
            self.publish(member)?;
        }

        if !self.halted {
            self.release(id)?;
        }
        Ok(())
    }

    fn publish(&mut self, module: &Arc<str>) -> Result<()> {
        self.registry.publish(module)?;
        let outputs = self
            .registry
            .outputs(module)
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        self.event_log.emit(EventKind::OutputsPublished {
            node: Arc::clone(module),
            outputs,
        });
        Ok(())
    }

    /// Record the first failure and stop launching
    fn fail(&mut self, error: WeaveError, node: Option<Arc<str>>) {
        self.halted = true;
        match &self.failure {
            None => self.failure = Some((error, node)),
            Some(_) => warn!(error = %error, "additional failure while draining"),
        }
    }

    fn cancel(&mut self) {
        self.halted = true;
        self.cancelled = true;
    }

    fn into_result(self, total_duration_ms: u64) -> std::result::Result<OutputRegistry, RunFailure> {
        if let Some((error, failed_node)) = self.failure {
            self.event_log.emit(EventKind::RunFailed {
                error: error.to_string(),
                failed_node: failed_node.clone(),
            });
            error!(error = %error, "run failed");
            return Err(RunFailure {
                error,
                failed_node,
                settled: self.settled_modules,
                registry: self.registry,
            });
        }

        if self.cancelled {
            self.event_log.emit(EventKind::RunCancelled {
                settled: self.settled_modules.len(),
            });
            warn!(settled = self.settled_modules.len(), "run cancelled");
            return Err(RunFailure {
                error: WeaveError::Cancelled,
                failed_node: None,
                settled: self.settled_modules,
                registry: self.registry,
            });
        }

        if !self.lifecycle.all_settled() {
            let error = WeaveError::invariant(format!(
                "run ended with {} of {} nodes settled",
                self.lifecycle.count(NodeState::Settled),
                self.plan.len()
            ));
            self.event_log.emit(EventKind::RunFailed {
                error: error.to_string(),
                failed_node: None,
            });
            return Err(RunFailure {
                error,
                failed_node: None,
                settled: self.settled_modules,
                registry: self.registry,
            });
        }

        self.event_log.emit(EventKind::RunCompleted {
            settled: self.settled_modules.len(),
            total_duration_ms,
        });
        info!(
            modules = self.settled_modules.len(),
            total_duration_ms, "run completed"
        );
        Ok(self.registry)
    }
}
