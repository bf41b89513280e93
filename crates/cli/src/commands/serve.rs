//! Start the server under the manual stop policy and keep it up until
//! interrupted

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use disttest_harness::{HarnessConfig, StopPolicy, Supervisor};
use tracing::warn;

use super::{print_captured, LaunchOptions, RunReport};
use crate::output::{print_error, print_info, print_item, print_success, OutputFormat};

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub launch: LaunchOptions,

    /// How often to check that the server is still alive, in milliseconds
    #[arg(long, default_value = "1000")]
    pub watch_interval_ms: u64,
}

pub async fn execute(args: ServeArgs, mut config: HarnessConfig, format: OutputFormat) -> Result<i32> {
    args.launch.apply(&mut config);
    config.policy = StopPolicy::Manual;

    let mut supervisor = Supervisor::new(config);
    supervisor
        .start(args.launch.args.clone())
        .await
        .context("Server did not become ready")?;

    print_success(&format!("Server ready at {}", supervisor.readiness_url().bold()));
    if let Some(pid) = supervisor.pid() {
        print_info(&format!("PID {}. Press Ctrl+C to stop.", pid));
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut watch = tokio::time::interval(Duration::from_millis(args.watch_interval_ms.max(1)));

    let exited_early = loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl+C")?;
                break false;
            }
            _ = watch.tick() => {
                if !supervisor.is_running() {
                    break true;
                }
            }
        }
    };

    if exited_early {
        print_error("Server exited on its own");
    }

    if let Err(e) = supervisor.stop_if_running().await {
        warn!("Stopping the server failed: {}", e);
        print_error(&e.to_string());
    }

    if args.launch.show_output {
        print_captured(&supervisor);
    }
    print_item(&RunReport::from_supervisor(&supervisor, &args.launch.args), format);

    Ok(if exited_early { supervisor.exit_code().unwrap_or(1) } else { 0 })
}
