//! fsmstress - concurrent state-machine stress runner
//!
//! ## Commands
//!
//! - `list`: Show the built-in workloads
//! - `show`: Print a workload's states and transition probabilities
//! - `run`: Execute one or more workloads against a fresh in-memory store

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fsmstress_cli::{registry, DocumentStore};
use fsmstress_core::{
    Config, ExecutionResult, RunOptions, Runner, TransitionTable, WorkloadManifest,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "fsmstress")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Concurrent probabilistic state-machine stress runner", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List built-in workloads
    List,

    /// Show the state graph of a workload
    Show {
        /// Workload name
        workload: String,

        /// TOML manifest layered over the workload
        #[arg(short, long)]
        manifest: Option<PathBuf>,
    },

    /// Run workloads, one after another
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Workload names, run in the order given
    #[arg(required = true)]
    workloads: Vec<String>,

    /// TOML run options file (flags below take precedence)
    #[arg(short, long)]
    options: Option<PathBuf>,

    /// TOML manifest layered over every workload
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// RNG seed; replaying a failure needs the seed it printed
    #[arg(long, env = "FSMSTRESS_SEED")]
    seed: Option<u64>,

    /// Override the number of agents
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Override the per-agent iteration budget
    #[arg(short, long)]
    iterations: Option<u64>,

    /// Stop remaining agents once one fails
    #[arg(long)]
    stop_on_first_failure: bool,

    /// Record each agent's visited states in the report
    #[arg(long)]
    trace: bool,

    /// Write the full execution results as JSON
    #[arg(short, long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fsmstress_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::List => cmd_list(),
        Commands::Show { workload, manifest } => cmd_show(&workload, manifest.as_deref()),
        Commands::Run(args) => cmd_run(args).await,
    }
}

fn load_workload(name: &str, manifest: Option<&Path>) -> Result<Config<DocumentStore>> {
    let registry = registry()?;
    let config = registry
        .config(name)
        .with_context(|| format!("Failed to load workload {name}"))?;
    match manifest {
        Some(path) => {
            let manifest = WorkloadManifest::load(path)
                .with_context(|| format!("Failed to read manifest {}", path.display()))?;
            Ok(manifest.layer_onto(&config)?)
        }
        None => Ok(config),
    }
}

fn cmd_list() -> Result<()> {
    let registry = registry()?;
    println!("Workloads:");
    for workload in registry.iter() {
        println!("  {:<24} {}", workload.name(), workload.description());
    }
    Ok(())
}

fn cmd_show(name: &str, manifest: Option<&Path>) -> Result<()> {
    let config = load_workload(name, manifest)?;
    let table = TransitionTable::build(&config);

    println!("Workload: {}", config.name());
    println!("Agents: {}", config.concurrency());
    println!("Iterations: {}", config.iterations());
    println!("Start state: {}", config.start_state());
    println!("Graph digest: {}", table.digest());
    println!();

    for state in config.state_names() {
        if table.is_terminal(state) {
            println!("  {state} (terminal)");
            continue;
        }
        println!("  {state}");
        for (next, p) in table.probabilities(state) {
            println!("    -> {next:<16} {p:.3}");
        }
    }
    Ok(())
}

fn run_options(args: &RunArgs) -> Result<RunOptions> {
    let mut options = match &args.options {
        Some(path) => RunOptions::load(path)
            .with_context(|| format!("Failed to read run options {}", path.display()))?,
        None => RunOptions::default(),
    };
    if args.seed.is_some() {
        options.seed = args.seed;
    }
    if args.concurrency.is_some() {
        options.concurrency = args.concurrency;
    }
    if args.iterations.is_some() {
        options.iterations = args.iterations;
    }
    options.stop_on_first_failure |= args.stop_on_first_failure;
    options.trace_states |= args.trace;
    Ok(options)
}

fn print_result(result: &ExecutionResult) {
    let status = if result.is_success() { "✓ PASSED" } else { "✗ FAILED" };
    println!("Workload: {}", result.workload);
    println!("Run ID: {}", result.run_id);
    println!("Seed: {}", result.seed);
    println!("Status: {status}");
    println!("Duration: {}ms", result.duration_ms);
    println!(
        "Agents: {} passed, {} failed, {} stopped (of {})",
        result.passed_count(),
        result.failed_count(),
        result.stopped_count(),
        result.concurrency
    );
    if let Some(failure) = result.failure() {
        println!();
        println!("{failure}");
    }
    println!();
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let options = run_options(&args)?;
    let configs = args
        .workloads
        .iter()
        .map(|name| load_workload(name, args.manifest.as_deref()))
        .collect::<Result<Vec<_>>>()?;

    let runner = Runner::new(options)?;
    let store = Arc::new(DocumentStore::new());
    info!(workloads = configs.len(), "Starting stress run");

    let results = runner
        .execute_serially(&configs, Arc::clone(&store))
        .await
        .context("Invalid workload configuration")?;

    for result in &results {
        print_result(result);
    }

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&results)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    println!(
        "Summary: {}/{} workloads passed ({} store operations)",
        results.len() - failed,
        results.len(),
        store.operations()
    );
    if failed == 0 {
        Ok(())
    } else {
        anyhow::bail!("{failed} workload(s) failed")
    }
}
