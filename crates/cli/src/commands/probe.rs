//! Poll a readiness endpoint without launching anything

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use disttest_harness::probe::readiness_url;
use disttest_harness::{HarnessConfig, ProbeOutcome, ReadinessProbe};
use serde::Serialize;

use crate::output::{print_item, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Full URL to poll; built from the readiness settings when omitted
    #[arg(long)]
    pub url: Option<String>,

    /// HTTP port of the server
    #[arg(long, default_value = "8080")]
    pub port: u16,

    /// Context path of the server
    #[arg(long, default_value = "/")]
    pub relative_path: String,

    /// Delay between attempts, in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Give up after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub url: String,
    pub ready: bool,
    pub attempts: usize,
    pub elapsed_ms: u128,
}

impl ProbeReport {
    fn new(url: String, outcome: ProbeOutcome) -> Self {
        let elapsed = match outcome {
            ProbeOutcome::Ready { elapsed, .. } | ProbeOutcome::TimedOut { elapsed, .. } => elapsed,
        };
        Self {
            url,
            ready: outcome.is_ready(),
            attempts: outcome.attempts(),
            elapsed_ms: elapsed.as_millis(),
        }
    }
}

impl TableDisplay for ProbeReport {
    fn headers() -> Vec<&'static str> {
        vec!["URL", "Ready", "Attempts", "Elapsed (ms)"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.url.clone(),
            if self.ready { "yes".to_string() } else { "no".to_string() },
            self.attempts.to_string(),
            self.elapsed_ms.to_string(),
        ]
    }
}

/// Returns 0 once ready, 1 on timeout
pub async fn execute(args: ProbeArgs, config: HarnessConfig, format: OutputFormat) -> Result<i32> {
    let mut policy = config.readiness.retry_policy();
    if let Some(ms) = args.interval_ms {
        policy.interval = Duration::from_millis(ms);
    }
    if let Some(ms) = args.timeout_ms {
        policy.deadline = Duration::from_millis(ms);
    }

    let url = args
        .url
        .unwrap_or_else(|| readiness_url(&config.readiness, args.port, &args.relative_path));

    let probe = ReadinessProbe::new(policy)?;
    let outcome = probe.wait_for_ready(&url).await;

    let report = ProbeReport::new(url, outcome);
    print_item(&report, format);

    Ok(if report.ready { 0 } else { 1 })
}
