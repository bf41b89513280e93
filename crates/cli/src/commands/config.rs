//! Configuration commands

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use disttest_harness::HarnessConfig;

use crate::output::{print_success, OutputFormat};

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write the default configuration to the config path
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

pub fn execute(cmd: ConfigCommands, config: &HarnessConfig, path: &Path, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
                _ => print!("{}", config.to_toml()?),
            }
            Ok(())
        }
        ConfigCommands::Init { force } => init(path, force),
    }
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists, pass --force to overwrite it", path.display());
    }
    HarnessConfig::default()
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    print_success(&format!("Wrote default configuration to {}", path.display()));
    Ok(())
}
