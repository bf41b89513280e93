//! Expand the distribution without launching it

use anyhow::{Context, Result};
use clap::Args;
use disttest_harness::{HarnessConfig, Supervisor};
use serde::Serialize;

use super::DistArgs;
use crate::output::{print_item, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct PrepareArgs {
    #[command(flatten)]
    pub dist: DistArgs,
}

#[derive(Debug, Serialize)]
pub struct PrepareReport {
    pub install_path: String,
    pub launcher: String,
    pub recreated: bool,
}

impl TableDisplay for PrepareReport {
    fn headers() -> Vec<&'static str> {
        vec!["Installation", "Launcher", "Recreated"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.install_path.clone(),
            self.launcher.clone(),
            self.recreated.to_string(),
        ]
    }
}

pub async fn execute(args: PrepareArgs, mut config: HarnessConfig, format: OutputFormat) -> Result<()> {
    args.dist.apply(&mut config);
    let recreated = config.recreate;

    let mut supervisor = Supervisor::new(config);
    let install = supervisor
        .prepare()
        .await
        .context("Failed to prepare distribution")?;

    let report = PrepareReport {
        install_path: install.display().to_string(),
        launcher: install
            .join("bin")
            .join(&supervisor.config().launcher)
            .display()
            .to_string(),
        recreated,
    };
    print_item(&report, format);

    Ok(())
}
