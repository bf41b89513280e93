//! Run the server to completion under the automatic stop policy

use anyhow::{Context, Result};
use clap::Args;
use disttest_harness::{HarnessConfig, StopPolicy, Supervisor};
use tracing::info;

use super::{print_captured, LaunchOptions, RunReport};
use crate::output::{print_item, OutputFormat};

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub launch: LaunchOptions,
}

/// Returns the server's exit code
pub async fn execute(args: RunArgs, mut config: HarnessConfig, format: OutputFormat) -> Result<i32> {
    args.launch.apply(&mut config);
    config.policy = StopPolicy::Automatic;

    let mut supervisor = Supervisor::new(config);
    info!("Running launcher to completion");
    supervisor
        .start(args.launch.args.clone())
        .await
        .context("Server run failed")?;

    if args.launch.show_output {
        print_captured(&supervisor);
    }
    print_item(&RunReport::from_supervisor(&supervisor, &args.launch.args), format);

    Ok(supervisor.exit_code().unwrap_or(-1))
}
