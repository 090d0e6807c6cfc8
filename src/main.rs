use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agentsim_core::EngineConfig;
use agentsim_engine::{ReplayHost, ReplayOutcome};
use agentsim_workflow::{validate, WorkflowDag, WorkflowDescription};

#[derive(Parser)]
#[command(name = "agentsim", version, about = "Agentic workflow execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "agentsim.toml", global = true)]
    config: PathBuf,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "agentsim=info,warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate workflow description files
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Replay the configured sessions and print per-session reports
    Run {
        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration
    Config,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "agentsim", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate { files } => Ok(validate_files(&files)),
        Commands::Config => {
            let config = EngineConfig::load(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { json } => {
            let outcome = run(&cli.config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn validate_files(files: &[PathBuf]) -> ExitCode {
    let mut failed = false;
    for path in files {
        match load_workflow(path) {
            Ok(dag) => print_summary(path, &dag),
            Err(e) => {
                error!(path = %path.display(), "{:#}", e);
                println!("{}: error: {:#}", path.display(), e);
                failed = true;
            }
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn load_workflow(path: &Path) -> anyhow::Result<WorkflowDag> {
    let desc = WorkflowDescription::from_file(path)?;
    let dag = validate(&desc).with_context(|| format!("invalid workflow '{}'", desc.name))?;
    Ok(dag)
}

fn print_summary(path: &Path, dag: &WorkflowDag) {
    println!(
        "{}: workflow '{}' ok ({} steps, root '{}')",
        path.display(),
        dag.name(),
        dag.len(),
        dag.root().id
    );
    if let Some(lp) = dag.loop_def() {
        println!(
            "  loop: {} -> {}, max {} iterations",
            lp.entry, lp.exit, lp.max_iterations
        );
    }
    for (parent, child) in dag.back_edges() {
        println!("  re-entry edge {} -> {} handled by the loop", parent, child);
    }
}

fn run(config_path: &Path) -> anyhow::Result<ReplayOutcome> {
    let config = EngineConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let paths = config.workflow_paths(config_path);
    if paths.is_empty() {
        anyhow::bail!("no workflows configured in {}", config_path.display());
    }

    let mut host = ReplayHost::from_config(&config);
    for path in &paths {
        let dag = load_workflow(path).with_context(|| format!("loading {}", path.display()))?;
        info!(workflow = %dag.name(), steps = dag.len(), "Workflow loaded");
        host.add_sessions(Arc::new(dag));
    }
    Ok(host.run()?)
}

fn print_outcome(outcome: &ReplayOutcome) {
    println!(
        "{:<24} {:<10} {:>8} {:>8} {:>6} {:>6} {:>10}",
        "SESSION", "STATUS", "LATENCY", "CRIT", "STEPS", "LOOPS", "TOOL WAIT"
    );
    for r in &outcome.sessions {
        let latency = r
            .end_to_end_latency
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<10} {:>8} {:>8} {:>6} {:>6} {:>10}",
            r.session_id,
            format!("{:?}", r.status).to_lowercase(),
            latency,
            r.critical_path_latency,
            r.steps_executed,
            r.loop_iterations,
            r.tool_wait
        );
    }

    let h = &outcome.horizon;
    println!();
    println!(
        "horizon {}: {} completed, {} abandoned, {} items lost",
        h.horizon,
        h.completed_sessions,
        h.abandoned.len(),
        h.lost_items
    );
    println!(
        "work items: {} emitted, {} completed, {} outstanding",
        h.stats.emitted, h.stats.completed, h.stats.outstanding
    );
}
