//! Orchestrator integration tests
//!
//! Every test runs on a paused tokio clock: barrier waits and mock latencies
//! advance virtual time, so settle durations of tens of seconds cost nothing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stackweave::{
    ConfigBuilder, Configuration, EventKind, EventLog, MaterializeRequest, Manifest,
    MockProvisioner, ModuleOutputs, ModuleSpec, Orchestrator, OutputSummary, Predicate,
    ProvisionError, Provisioner,
};
use tokio::time::Instant;

// ═══════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════

fn config(overrides: &[&str]) -> Configuration {
    overrides
        .iter()
        .fold(ConfigBuilder::new(), |b, o| b.set(o).unwrap())
        .build()
        .unwrap()
}

fn mock() -> Arc<MockProvisioner> {
    Arc::new(MockProvisioner::new().with_default_latency(Duration::from_secs(1)))
}

fn started(log: &EventLog, module: &str) -> u64 {
    log.position(|k| matches!(k, EventKind::ModuleStarted { node, .. } if &**node == module))
        .unwrap_or_else(|| panic!("{module} never started"))
}

fn settled(log: &EventLog, module: &str) -> u64 {
    log.position(|k| matches!(k, EventKind::ModuleSettled { node, .. } if &**node == module))
        .unwrap_or_else(|| panic!("{module} never settled"))
}

fn published(log: &EventLog, module: &str) -> u64 {
    log.position(|k| matches!(k, EventKind::OutputsPublished { node, .. } if &**node == module))
        .unwrap_or_else(|| panic!("{module} never published"))
}

fn barrier_settled(log: &EventLog, barrier: &str) -> u64 {
    log.position(|k| matches!(k, EventKind::BarrierSettled { node, .. } if &**node == barrier))
        .unwrap_or_else(|| panic!("{barrier} never settled"))
}

/// A propagates asynchronously; B and C read its outputs
fn abc() -> Manifest {
    Manifest::from_modules(
        "abc",
        vec![
            ModuleSpec::new("A")
                .output("x")
                .output("y")
                .async_propagation(None),
            ModuleSpec::new("B").input("x", "A.x").output("b"),
            ModuleSpec::new("C").input("y", "A.y").output("c"),
        ],
    )
    .unwrap()
}

// ═══════════════════════════════════════════════════════════════
// BARRIERS
// ═══════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn consumers_wait_for_barrier_to_settle() {
    let provisioner = mock();
    let orchestrator = Orchestrator::new(provisioner.clone());
    let begin = Instant::now();

    let registry = orchestrator
        .materialize(&abc(), &config(&["default_settle_ms=20000"]))
        .await
        .unwrap();

    // A (1s) + settle (20s) + B and C in parallel (1s)
    assert!(begin.elapsed() >= Duration::from_secs(22));
    assert!(begin.elapsed() < Duration::from_secs(23));

    let log = orchestrator.event_log();
    let barrier = barrier_settled(log, "A*");
    assert!(settled(log, "A") < barrier);
    assert!(barrier < started(log, "B"));
    assert!(barrier < started(log, "C"));

    let waited = log.events().into_iter().find_map(|e| match e.kind {
        EventKind::BarrierSettled { waited_ms, .. } => Some(waited_ms),
        _ => None,
    });
    assert_eq!(waited, Some(20_000));

    assert_eq!(provisioner.called_modules(), ["A", "B", "C"]);
    assert_eq!(registry.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn outputs_hidden_until_barrier_settles() {
    let provisioner = mock();
    let orchestrator = Orchestrator::new(provisioner.clone());

    orchestrator
        .materialize(&abc(), &config(&["default_settle_ms=5000"]))
        .await
        .unwrap();

    let log = orchestrator.event_log();
    assert!(settled(log, "A") < barrier_settled(log, "A*"));
    assert!(barrier_settled(log, "A*") < published(log, "A"));
    assert!(published(log, "A") < started(log, "B"));

    let calls = provisioner.calls();
    let b = calls.iter().find(|c| c.module == "B").unwrap();
    assert_eq!(
        b.inputs,
        [(
            "x".to_string(),
            MockProvisioner::output_value("us-east-1", "stackweave", "A", "x")
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn barrier_does_not_block_unrelated_modules() {
    let manifest = Manifest::from_modules(
        "side",
        vec![
            ModuleSpec::new("A").output("x").async_propagation(Some(30_000)),
            ModuleSpec::new("B").input("x", "A.x"),
            ModuleSpec::new("X").output("y"),
            ModuleSpec::new("Y").input("y", "X.y"),
        ],
    )
    .unwrap();
    let orchestrator = Orchestrator::new(mock());

    orchestrator
        .materialize(&manifest, &Configuration::default())
        .await
        .unwrap();

    let log = orchestrator.event_log();
    assert!(settled(log, "Y") < barrier_settled(log, "A*"));
    assert!(barrier_settled(log, "A*") < started(log, "B"));
}

#[tokio::test(start_paused = true)]
async fn grouped_barrier_waits_for_longest_settle() {
    let manifest = Manifest::from_modules(
        "grouped",
        vec![
            ModuleSpec::new("kb")
                .output("fn_arn")
                .async_propagation(Some(10_000))
                .settle_group("api"),
            ModuleSpec::new("chat")
                .output("endpoint")
                .async_propagation(Some(30_000))
                .settle_group("api"),
            ModuleSpec::new("ui")
                .input("kb", "kb.fn_arn")
                .input("api", "chat.endpoint"),
        ],
    )
    .unwrap();
    let config = config(&["barrier_granularity=grouped"]);
    let orchestrator = Orchestrator::new(mock());

    let plan = orchestrator.plan(&manifest, &config).unwrap();
    let steps: Vec<&str> = plan.steps().iter().map(|s| &**s).collect();
    assert_eq!(steps, ["kb", "chat", "settle:api", "ui"]);

    let begin = Instant::now();
    orchestrator.run("grouped", &plan, &config).await.unwrap();

    // kb and chat in parallel (1s), longest settle (30s), ui (1s)
    assert!(begin.elapsed() >= Duration::from_secs(32));
    assert!(begin.elapsed() < Duration::from_secs(33));

    let log = orchestrator.event_log();
    let barrier = barrier_settled(log, "settle:api");
    assert!(barrier < published(log, "kb"));
    assert!(barrier < published(log, "chat"));
    assert!(barrier < started(log, "ui"));
}

// ═══════════════════════════════════════════════════════════════
// BUILD-TIME ERRORS
// ═══════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn excluded_producer_fails_before_any_provisioning() {
    let manifest = Manifest::from_modules(
        "dangling",
        vec![
            ModuleSpec::new("A").output("x"),
            ModuleSpec::new("D")
                .output("endpoint")
                .include_if(Predicate::feature("search")),
            ModuleSpec::new("E").input("endpoint", "D.endpoint"),
        ],
    )
    .unwrap();
    let provisioner = mock();
    let orchestrator = Orchestrator::new(provisioner.clone());

    let failure = orchestrator
        .materialize(&manifest, &Configuration::default())
        .await
        .unwrap_err();

    assert_eq!(failure.error.code(), "SW-021");
    assert!(failure.error.to_string().contains("E.endpoint -> D"));
    assert!(failure.settled.is_empty());
    assert!(failure.registry.is_empty());
    assert!(provisioner.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cycle_fails_before_any_provisioning() {
    let manifest = Manifest::from_modules(
        "cycle",
        vec![
            ModuleSpec::new("a").input("y", "b.y").output("x"),
            ModuleSpec::new("b").input("x", "a.x").output("y"),
        ],
    )
    .unwrap();
    let provisioner = mock();
    let orchestrator = Orchestrator::new(provisioner.clone());

    let failure = orchestrator
        .materialize(&manifest, &Configuration::default())
        .await
        .unwrap_err();

    assert_eq!(failure.error.code(), "SW-020");
    assert!(provisioner.calls().is_empty());
    assert!(orchestrator
        .event_log()
        .position(|k| matches!(k, EventKind::RunFailed { .. }))
        .is_some());
}

// ═══════════════════════════════════════════════════════════════
// FAILURE, CANCELLATION, PARALLELISM
// ═══════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn failure_stops_new_launches() {
    let modules = ["A", "B", "C", "D", "E", "F", "G", "H"]
        .into_iter()
        .map(|id| ModuleSpec::new(id).output("arn"))
        .collect();
    let manifest = Manifest::from_modules("serial", modules).unwrap();
    let provisioner =
        Arc::new(MockProvisioner::new().fail_on("F", "stack F rolled back: quota exceeded"));
    let orchestrator = Orchestrator::new(provisioner.clone());

    let failure = orchestrator
        .materialize(&manifest, &config(&["max_parallelism=1"]))
        .await
        .unwrap_err();

    assert_eq!(failure.error.code(), "SW-040");
    assert!(failure.error.to_string().contains("quota exceeded"));
    assert_eq!(failure.failed_node.as_deref(), Some("F"));

    let settled: Vec<&str> = failure.settled.iter().map(|s| &**s).collect();
    assert_eq!(settled, ["A", "B", "C", "D", "E"]);
    for module in ["A", "B", "C", "D", "E"] {
        assert!(failure.registry.is_published(module));
    }
    assert!(!failure.registry.is_recorded("F"));
    assert_eq!(provisioner.called_modules(), ["A", "B", "C", "D", "E", "F"]);
}

#[tokio::test(start_paused = true)]
async fn in_flight_modules_drain_after_failure() {
    let manifest = Manifest::from_modules(
        "drain",
        vec![
            ModuleSpec::new("slow").output("x"),
            ModuleSpec::new("bad").output("y"),
            ModuleSpec::new("next").input("x", "slow.x"),
        ],
    )
    .unwrap();
    let provisioner = Arc::new(
        MockProvisioner::new()
            .with_latency("slow", Duration::from_secs(10))
            .with_latency("bad", Duration::from_secs(1))
            .fail_on("bad", "denied"),
    );
    let orchestrator = Orchestrator::new(provisioner.clone());

    let failure = orchestrator
        .materialize(&manifest, &Configuration::default())
        .await
        .unwrap_err();

    assert_eq!(failure.failed_node.as_deref(), Some("bad"));
    assert_eq!(failure.settled.len(), 1);
    assert!(failure.registry.is_published("slow"));
    assert_eq!(provisioner.called_modules(), ["slow", "bad"]);
}

/// Panics while materializing one module, delegates the rest to the mock
struct PanickingProvisioner {
    module: &'static str,
    inner: MockProvisioner,
}

#[async_trait]
impl Provisioner for PanickingProvisioner {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn materialize(
        &self,
        request: MaterializeRequest<'_>,
    ) -> Result<ModuleOutputs, ProvisionError> {
        if request.module.id == self.module {
            panic!("SDK client crashed on {}", self.module);
        }
        self.inner.materialize(request).await
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_provisioner_fails_its_module() {
    let modules = ["A", "boom", "C", "D"]
        .into_iter()
        .map(|id| ModuleSpec::new(id).output("arn"))
        .collect();
    let manifest = Manifest::from_modules("panic", modules).unwrap();
    let orchestrator = Orchestrator::new(Arc::new(PanickingProvisioner {
        module: "boom",
        inner: MockProvisioner::new().with_default_latency(Duration::from_secs(1)),
    }));

    let failure = orchestrator
        .materialize(&manifest, &config(&["max_parallelism=1"]))
        .await
        .unwrap_err();

    assert_eq!(failure.error.code(), "SW-040");
    assert!(failure.error.to_string().contains("SDK client crashed on boom"));
    assert_eq!(failure.failed_node.as_deref(), Some("boom"));
    let settled: Vec<&str> = failure.settled.iter().map(|s| &**s).collect();
    assert_eq!(settled, ["A"]);

    let log = orchestrator.event_log();
    assert!(log
        .position(|k| matches!(k, EventKind::ModuleFailed { node, .. } if &**node == "boom"))
        .is_some());
    assert!(log
        .position(|k| matches!(
            k,
            EventKind::RunFailed { failed_node: Some(node), .. } if &**node == "boom"
        ))
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn missing_declared_output_fails_module() {
    let manifest = Manifest::from_modules(
        "partial",
        vec![ModuleSpec::new("A").output("x").output("y")],
    )
    .unwrap();
    let outputs = [("x".to_string(), "only-x".to_string())].into_iter().collect();
    let orchestrator = Orchestrator::new(Arc::new(MockProvisioner::new().with_outputs("A", outputs)));

    let failure = orchestrator
        .materialize(&manifest, &Configuration::default())
        .await
        .unwrap_err();

    assert_eq!(failure.error.code(), "SW-040");
    assert!(failure.error.to_string().contains("'y'"));
}

#[tokio::test(start_paused = true)]
async fn cancellation_drains_and_reports() {
    let manifest = Manifest::from_modules(
        "cancel",
        vec![
            ModuleSpec::new("A").output("x"),
            ModuleSpec::new("B").input("x", "A.x"),
        ],
    )
    .unwrap();
    let provisioner = Arc::new(MockProvisioner::new().with_latency("A", Duration::from_secs(10)));
    let orchestrator = Orchestrator::new(provisioner.clone());

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();
    });

    let failure = orchestrator
        .materialize(&manifest, &Configuration::default())
        .await
        .unwrap_err();

    assert_eq!(failure.error.code(), "SW-051");
    let settled: Vec<&str> = failure.settled.iter().map(|s| &**s).collect();
    assert_eq!(settled, ["A"]);
    assert!(failure.registry.is_published("A"));
    assert_eq!(provisioner.called_modules(), ["A"]);
    assert!(orchestrator
        .event_log()
        .position(|k| matches!(k, EventKind::RunCancelled { settled: 1 }))
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn parallelism_is_bounded() {
    let modules = (0..6).map(|i| ModuleSpec::new(format!("m{i}"))).collect();
    let manifest = Manifest::from_modules("wide", modules).unwrap();
    let orchestrator = Orchestrator::new(mock());
    let begin = Instant::now();

    orchestrator
        .materialize(&manifest, &config(&["max_parallelism=2"]))
        .await
        .unwrap();

    // six 1s modules, two at a time
    assert!(begin.elapsed() >= Duration::from_secs(3));
    assert!(begin.elapsed() < Duration::from_secs(4));
}

// ═══════════════════════════════════════════════════════════════
// FULL MANIFEST
// ═══════════════════════════════════════════════════════════════

fn llm_bot() -> Manifest {
    Manifest::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/stacks/llm-bot.yaml")).unwrap()
}

fn llm_bot_config() -> ConfigBuilder {
    ConfigBuilder::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/stacks/llm-bot.toml")).unwrap()
}

#[tokio::test(start_paused = true)]
async fn llm_bot_producers_happen_before_consumers() {
    let manifest = llm_bot();
    let config = llm_bot_config().build().unwrap();
    let orchestrator = Orchestrator::new(mock());

    let registry = orchestrator.materialize(&manifest, &config).await.unwrap();
    assert_eq!(registry.len(), manifest.modules.len());

    let log = orchestrator.event_log();
    for module in &manifest.modules {
        for input in &module.inputs {
            if let stackweave::InputSource::Output(binding) = &input.source {
                let producer = binding.split('.').next().unwrap();
                assert!(
                    published(log, producer) < started(log, &module.id),
                    "{producer} must publish before {} starts",
                    module.id
                );
            }
        }
        for hint in &module.after {
            assert!(settled(log, hint) < started(log, &module.id));
        }
    }

    let summary = OutputSummary::collect(&manifest, &registry).unwrap();
    assert!(summary.lines.iter().all(|l| l.value.is_some()));
}

#[tokio::test(start_paused = true)]
async fn llm_bot_minimal_deployment_uses_fallbacks() {
    let manifest = llm_bot();
    let config = llm_bot_config()
        .disable("opensearch")
        .disable("knowledge_base")
        .set("deployment_mode=NONE")
        .unwrap()
        .build()
        .unwrap();
    let provisioner = mock();
    let orchestrator = Orchestrator::new(provisioner.clone());

    let registry = orchestrator.materialize(&manifest, &config).await.unwrap();

    assert_eq!(provisioner.called_modules(), ["vpc", "assets", "auth"]);
    let summary = OutputSummary::collect(&manifest, &registry).unwrap();
    assert_eq!(
        summary.get("OpenSearch Endpoint"),
        Some("No OpenSearch Endpoint Created")
    );
    assert_eq!(summary.get("Website"), Some("No Website Created"));
    assert!(summary.get("VPC").is_some_and(|v| v.contains("vpc/vpc_id")));
}
