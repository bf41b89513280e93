//! Launcher command line construction

use crate::config::{HarnessConfig, StopPolicy};
use crate::error::{HarnessError, HarnessResult};

pub const HTTP_PORT_PREFIX: &str = "--http-port=";
pub const HTTP_RELATIVE_PATH_PREFIX: &str = "--http-relative-path=";
pub const DEBUG_FLAG: &str = "--debug";

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_RELATIVE_PATH: &str = "/";

/// The argument vector handed to the launcher, plus the values the harness
/// derives from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchArgs {
    launcher: String,
    args: Vec<String>,
    relative_path: String,
    http_port: u16,
}

impl LaunchArgs {
    /// Build the launcher invocation for the caller-supplied `arguments`.
    ///
    /// Injected flags come first (`--debug`, then the launch mode property
    /// when the policy asks for one); caller arguments follow verbatim.
    pub fn build(config: &HarnessConfig, arguments: &[String]) -> HarnessResult<Self> {
        Self::with_policy(
            &config.launcher,
            &config.launch_mode_property,
            config.debug,
            config.policy,
            arguments,
        )
    }

    pub fn with_policy(
        launcher: &str,
        launch_mode_property: &str,
        debug: bool,
        policy: StopPolicy,
        arguments: &[String],
    ) -> HarnessResult<Self> {
        let mut args = Vec::with_capacity(arguments.len() + 2);

        if debug {
            args.push(DEBUG_FLAG.to_string());
        }

        if let Some(mode) = policy.launch_mode() {
            args.push(format!("-D{}={}", launch_mode_property, mode));
        }

        args.extend(arguments.iter().cloned());

        Ok(Self {
            launcher: launcher.to_string(),
            args,
            relative_path: relative_path(arguments),
            http_port: http_port(arguments)?,
        })
    }

    /// Launcher script name, relative to `<install>/bin`
    pub fn launcher(&self) -> &str {
        &self.launcher
    }

    /// Arguments following the launcher
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Full argv as it would be typed in `<install>/bin`
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(format!("./{}", self.launcher))
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn command_line(&self) -> String {
        self.argv().join(" ")
    }
}

fn find_value<'a>(arguments: &'a [String], prefix: &str) -> Option<&'a str> {
    arguments.iter().find_map(|arg| arg.strip_prefix(prefix))
}

/// Value of the first `--http-relative-path=`, or `/`
pub fn relative_path(arguments: &[String]) -> String {
    find_value(arguments, HTTP_RELATIVE_PATH_PREFIX)
        .unwrap_or(DEFAULT_RELATIVE_PATH)
        .to_string()
}

/// Value of the first `--http-port=`, or 8080
pub fn http_port(arguments: &[String]) -> HarnessResult<u16> {
    match find_value(arguments, HTTP_PORT_PREFIX) {
        Some(value) => value.parse().map_err(|e| HarnessError::InvalidArgument {
            arg: format!("{}{}", HTTP_PORT_PREFIX, value),
            reason: format!("not a valid port: {}", e),
        }),
        None => Ok(DEFAULT_HTTP_PORT),
    }
}
