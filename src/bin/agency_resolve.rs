//! agency-resolve command-line driver.
//!
//! Runs one batch: reads the three source tables (or a previously published
//! table), extends the match ledger, merges confirmed matches and publishes
//! the deduplicated table, the ledger and an audit document.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use agency_resolve::config::PipelineConfig;
use agency_resolve::pipeline::{Pipeline, PipelineInputs, PipelineOutputs, SourceInputs};

#[derive(Parser)]
#[command(name = "agency-resolve", version, about = "Resolve and merge NYC agency records")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline end to end.
    Run(RunArgs),
    /// Print the effective configuration as TOML.
    Config {
        /// Configuration file to load instead of the defaults.
        #[arg(long, env = "AGENCY_RESOLVE_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Configuration file (TOML).
    #[arg(long, env = "AGENCY_RESOLVE_CONFIG")]
    config: Option<PathBuf>,

    /// Primary agency export table.
    #[arg(long, requires_all = ["ops", "hoo"], conflicts_with = "dataset")]
    primary: Option<PathBuf>,

    /// Operations roster table.
    #[arg(long)]
    ops: Option<PathBuf>,

    /// Government roster table.
    #[arg(long)]
    hoo: Option<PathBuf>,

    /// Previously published table, read instead of the source tables.
    #[arg(long, required_unless_present = "primary")]
    dataset: Option<PathBuf>,

    /// Match ledger; created when missing.
    #[arg(long)]
    ledger: PathBuf,

    /// Manual overrides table.
    #[arg(long)]
    overrides: Option<PathBuf>,

    /// Output directory.
    #[arg(long, default_value = "out")]
    out_dir: PathBuf,

    /// Override the number of scoring workers.
    #[arg(long)]
    workers: Option<usize>,

    /// Only extend the ledger; do not merge.
    #[arg(long)]
    skip_merge: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig, agency_resolve::ConfigError> {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => Ok(PipelineConfig::default()),
    }
}

fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(workers) = args.workers {
        config.matcher.workers = workers;
    }

    let sources = match (args.primary, args.ops, args.hoo, args.dataset) {
        (_, _, _, Some(dataset)) => SourceInputs::Dataset(dataset),
        (Some(primary), Some(ops), Some(hoo), None) => SourceInputs::Tables { primary, ops, hoo },
        _ => return Err("either --dataset or all of --primary, --ops and --hoo are required".into()),
    };
    let inputs = PipelineInputs {
        sources,
        ledger: args.ledger,
        overrides: args.overrides,
    };
    let outputs = PipelineOutputs {
        dataset: args.out_dir.join("agencies_deduplicated.csv"),
        ledger: args.out_dir.join("match_ledger.csv"),
        audit: args.out_dir.join("audit.json"),
    };

    let summary = Pipeline::new(config)?.skip_merge(args.skip_merge).run(&inputs, &outputs)?;
    println!(
        "run {}: {} records, {} merges{}",
        summary.run_id,
        summary.records,
        summary.merged,
        if summary.changed { "" } else { " (no changes)" }
    );
    for path in &summary.published {
        println!("  wrote {}", path.display());
    }
    Ok(())
}

fn print_config(path: Option<&PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    config.validate()?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => run(args),
        Command::Config { config } => print_config(config.as_ref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "run failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
