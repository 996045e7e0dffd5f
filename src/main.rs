//! stackweave CLI - plan and deploy multi-stack manifests

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use stackweave::config::{ConfigBuilder, Configuration};
use stackweave::dag::{self, Plan};
use stackweave::error::{FixSuggestion, RunFailure, WeaveError};
use stackweave::report::{OutputSummary, ValueSource};
use stackweave::runtime::{create_provisioner, Orchestrator};
use stackweave::Manifest;

/// Config file picked up from the working directory when `--config` is absent
const DEFAULT_CONFIG_FILE: &str = "stackweave.toml";

#[derive(Parser)]
#[command(name = "stackweave")]
#[command(about = "stackweave - dependency-ordered multi-stack deployments")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a manifest: schema, references, cycles
    Validate {
        /// Path to the manifest YAML
        file: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Print the materialization plan without deploying
    Plan {
        /// Path to the manifest YAML
        file: PathBuf,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Materialize every included module in dependency order
    Deploy {
        /// Path to the manifest YAML
        file: PathBuf,

        /// Provisioner (mock, command)
        #[arg(short, long, default_value = "mock")]
        provisioner: String,

        /// Write the run trace (JSON events) to this file
        #[arg(long)]
        trace: Option<PathBuf>,

        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Args)]
struct ConfigArgs {
    /// TOML config file (defaults to ./stackweave.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable a feature flag
    #[arg(long, value_name = "FEATURE")]
    enable: Vec<String>,

    /// Disable a feature flag
    #[arg(long, value_name = "FEATURE")]
    disable: Vec<String>,

    /// Override a setting or parameter (key=value)
    #[arg(long, value_name = "KEY=VALUE")]
    set: Vec<String>,
}

impl ConfigArgs {
    /// File, then environment, then command line
    fn load(&self) -> Result<Configuration, WeaveError> {
        let mut builder = match &self.config {
            Some(path) => ConfigBuilder::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                ConfigBuilder::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => ConfigBuilder::new(),
        };
        builder = builder.with_env()?;
        for feature in &self.enable {
            builder = builder.enable(feature);
        }
        for feature in &self.disable {
            builder = builder.disable(feature);
        }
        for assignment in &self.set {
            builder = builder.set(assignment)?;
        }
        builder.build()
    }
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Initialize tracing (stderr, so plan/deploy output stays clean)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { file, config } => validate_manifest(&file, &config),
        Commands::Plan { file, json, config } => plan_manifest(&file, json, &config),
        Commands::Deploy {
            file,
            provisioner,
            trace,
            config,
        } => deploy_manifest(&file, &provisioner, trace.as_deref(), &config).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        let weave = e
            .downcast_ref::<WeaveError>()
            .or_else(|| e.downcast_ref::<RunFailure>().map(|f| &f.error));
        if let Some(suggestion) = weave.and_then(|w| w.fix_suggestion()) {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

/// Parse, configure and plan; shared by every command
fn load(file: &Path, args: &ConfigArgs) -> anyhow::Result<(Manifest, Configuration, Plan)> {
    let manifest = Manifest::from_file(file)?;
    OutputSummary::check(&manifest)?;
    let config = args.load()?;
    let plan = dag::plan(&manifest, &config)?;
    Ok((manifest, config, plan))
}

fn validate_manifest(file: &Path, args: &ConfigArgs) -> anyhow::Result<()> {
    let (manifest, _, plan) = load(file, args)?;

    println!(
        "{} Manifest '{}' is valid",
        "✓".green(),
        file.display()
    );
    println!("  Name: {}", manifest.name);
    println!("  Modules: {}", manifest.modules.len());
    println!("  Included: {}", plan.module_count());
    println!("  Barriers: {}", plan.graph().barriers().count());
    println!("  Outputs: {}", manifest.outputs.len());
    Ok(())
}

fn plan_manifest(file: &Path, json: bool, args: &ConfigArgs) -> anyhow::Result<()> {
    let (manifest, config, plan) = load(file, args)?;

    if json {
        let value = serde_json::json!({
            "name": manifest.name,
            "steps": plan.steps(),
            "waves": plan.waves(),
            "excluded": plan.excluded(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!(
        "{} Plan for '{}' ({} steps, max parallelism {})\n",
        "→".cyan(),
        manifest.name.cyan().bold(),
        plan.len(),
        config.max_parallelism()
    );

    let graph = plan.graph();
    for (i, node) in plan.nodes().enumerate() {
        let deps: Vec<&str> = graph
            .dependencies(&node.id)
            .iter()
            .map(|d| d.as_ref())
            .collect();
        let after = if deps.is_empty() {
            String::new()
        } else {
            format!("after {}", deps.join(", "))
        };

        match node.barrier() {
            Some(barrier) => println!(
                "  {:>3}. {} {} {}",
                i + 1,
                node.id.cyan(),
                format!("settle {:.1}s", barrier.settle.as_secs_f32()).dimmed(),
                after.dimmed()
            ),
            None => println!("  {:>3}. {} {}", i + 1, node.id.as_ref(), after.dimmed()),
        }
    }

    println!("\n{}", "Waves:".cyan().bold());
    for (i, wave) in plan.waves().iter().enumerate() {
        let ids: Vec<&str> = wave.iter().map(|id| id.as_ref()).collect();
        println!("  {:>3}: {}", i + 1, ids.join(", "));
    }

    if !plan.excluded().is_empty() {
        let ids: Vec<&str> = plan.excluded().iter().map(|id| id.as_ref()).collect();
        println!("\n{} {}", "Excluded:".yellow(), ids.join(", "));
    }
    Ok(())
}

async fn deploy_manifest(
    file: &Path,
    provisioner: &str,
    trace: Option<&Path>,
    args: &ConfigArgs,
) -> anyhow::Result<()> {
    let (manifest, config, plan) = load(file, args)?;
    let provisioner = create_provisioner(provisioner)?;

    println!(
        "{} Deploying '{}' with {} provisioner | region: {} | {} modules\n",
        "→".cyan(),
        manifest.name.cyan().bold(),
        provisioner.name().cyan(),
        config.region().cyan(),
        plan.module_count()
    );

    let orchestrator = Orchestrator::new(provisioner).with_progress(true);

    // Ctrl-C stops new modules from starting; in-flight ones finish
    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let result = orchestrator.run(&manifest.name, &plan, &config).await;

    if let Some(path) = trace {
        let json = serde_json::to_string_pretty(&orchestrator.event_log().to_json())?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write trace to {}", path.display()))?;
        println!("\n{} Trace written to {}", "→".cyan(), path.display());
    }

    let registry = match result {
        Ok(registry) => registry,
        Err(failure) => {
            println!();
            if let Some(node) = &failure.failed_node {
                println!("{} {}", "Failed at:".red().bold(), node);
            }
            let settled: Vec<&str> = failure.settled.iter().map(|id| id.as_ref()).collect();
            println!("{} {}", "Settled before failure:".yellow(), settled.join(", "));
            return Err(failure.into());
        }
    };

    println!("\n{} Deployed {} modules", "✓".green(), registry.len());

    let summary = OutputSummary::collect(&manifest, &registry)?;
    if !summary.is_empty() {
        println!("\n{}", "Outputs:".cyan().bold());
        let width = summary.lines.iter().map(|l| l.label.len()).max().unwrap_or(0);
        for line in &summary.lines {
            let value = line.value.as_deref().unwrap_or("-");
            let value = match line.source {
                ValueSource::Output => value.normal(),
                ValueSource::Fallback | ValueSource::Missing => value.dimmed(),
            };
            println!("  {:width$}  {}", line.label, value, width = width);
        }
    }
    Ok(())
}
