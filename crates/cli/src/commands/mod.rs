//! CLI Commands

pub mod config;
pub mod prepare;
pub mod probe;
pub mod run;
pub mod serve;

use std::path::PathBuf;

use clap::Args;
use disttest_harness::{HarnessConfig, Supervisor};
use serde::Serialize;

use crate::output::{print_lines, TableDisplay};

/// Overrides for where the distribution comes from and where it goes
#[derive(Args, Debug, Clone, Default)]
pub struct DistArgs {
    /// Distribution archive (.zip, .tar.gz, .tgz or .tar)
    #[arg(long)]
    pub artifact: Option<PathBuf>,

    /// Directory the distribution is expanded into
    #[arg(long)]
    pub dist_root: Option<PathBuf>,

    /// Remove an existing installation and expand the archive again
    #[arg(long)]
    pub recreate: bool,
}

impl DistArgs {
    pub fn apply(&self, config: &mut HarnessConfig) {
        if let Some(artifact) = &self.artifact {
            config.artifact = Some(artifact.clone());
        }
        if let Some(root) = &self.dist_root {
            config.dist_root = root.clone();
        }
        if self.recreate {
            config.recreate = true;
        }
    }
}

/// Options shared by the commands that launch the server
#[derive(Args, Debug, Clone, Default)]
pub struct LaunchOptions {
    #[command(flatten)]
    pub dist: DistArgs,

    /// Pass --debug to the launcher
    #[arg(long)]
    pub debug: bool,

    /// Print the captured server output after the server stopped
    #[arg(long)]
    pub show_output: bool,

    /// Do not echo server output to the log while it runs
    #[arg(long)]
    pub quiet: bool,

    /// Arguments passed to the launcher, e.g. `start-dev --http-port=8180`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl LaunchOptions {
    pub fn apply(&self, config: &mut HarnessConfig) {
        self.dist.apply(config);
        if self.debug {
            config.debug = true;
        }
        if self.quiet {
            config.echo_output = false;
        }
    }
}

/// What a finished server run left behind
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub arguments: Vec<String>,
    pub exit_code: Option<i32>,
    pub stdout_lines: usize,
    pub stderr_lines: usize,
}

impl RunReport {
    pub fn from_supervisor(supervisor: &Supervisor, arguments: &[String]) -> Self {
        Self {
            arguments: arguments.to_vec(),
            exit_code: supervisor.exit_code(),
            stdout_lines: supervisor.stdout_lines().len(),
            stderr_lines: supervisor.stderr_lines().len(),
        }
    }
}

impl TableDisplay for RunReport {
    fn headers() -> Vec<&'static str> {
        vec!["Arguments", "Exit Code", "Stdout Lines", "Stderr Lines"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.arguments.join(" "),
            self.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
            self.stdout_lines.to_string(),
            self.stderr_lines.to_string(),
        ]
    }
}

fn print_captured(supervisor: &Supervisor) {
    print_lines("stdout", supervisor.stdout_lines());
    print_lines("stderr", supervisor.stderr_lines());
}
