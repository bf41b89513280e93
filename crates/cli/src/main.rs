//! disttest CLI - Main Entry Point

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use disttest_cli::commands::{config, prepare, probe, run, serve};
use disttest_cli::output::{self, print_error};
use disttest_harness::HarnessConfig;

/// disttest - drive a packaged server distribution through its test lifecycle
#[derive(Parser)]
#[command(name = "disttest")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "DISTTEST_CONFIG", default_value = "disttest.toml", global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand the distribution archive
    Prepare(prepare::PrepareArgs),

    /// Run the launcher until it exits by itself
    Run(run::RunArgs),

    /// Start the server, wait until it is ready and keep it up until Ctrl+C
    Serve(serve::ServeArgs),

    /// Poll a readiness endpoint
    Probe(probe::ProbeArgs),

    /// Inspect or initialize the configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let config = HarnessConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let result = match cli.command {
        Commands::Prepare(args) => prepare::execute(args, config, cli.format).await.map(|_| 0),
        Commands::Run(args) => run::execute(args, config, cli.format).await,
        Commands::Serve(args) => serve::execute(args, config, cli.format).await,
        Commands::Probe(args) => probe::execute(args, config, cli.format).await,
        Commands::Config(cmd) => config::execute(cmd, &config, &cli.config, cli.format).map(|_| 0),
    };

    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}
