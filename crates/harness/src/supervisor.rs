//! Server lifecycle supervision
//!
//! A [`Supervisor`] owns exactly one server process at a time. `start`
//! prepares the installation, launches the server and, depending on the
//! [`StopPolicy`], either runs it to completion or returns once it is ready.
//! `stop_if_running` terminates it gracefully, then forcibly.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::args::{LaunchArgs, DEFAULT_HTTP_PORT, DEFAULT_RELATIVE_PATH};
use crate::config::{HarnessConfig, StopPolicy};
use crate::dist::{ArtifactResolver, Distribution};
use crate::drain::{drain, CapturedOutput, DrainTask};
use crate::error::{HarnessError, HarnessResult};
use crate::probe::{readiness_url, ProbeOutcome, ReadinessProbe};

/// Where the supervised server is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Launching,
    Running,
    Stopping,
    Stopped,
    Failed,
}

pub struct Supervisor {
    config: HarnessConfig,
    distribution: Distribution,
    install_path: Option<PathBuf>,
    child: Option<Child>,
    drain: Option<DrainTask>,
    exit_signal: Option<watch::Sender<bool>>,
    output: CapturedOutput,
    exit_code: Option<i32>,
    relative_path: String,
    http_port: u16,
    state: LifecycleState,
}

impl Supervisor {
    /// Create a supervisor resolving the artifact from `config`
    pub fn new(config: HarnessConfig) -> Self {
        let resolver = config.resolver();
        Self::with_resolver(config, resolver)
    }

    pub fn with_resolver(config: HarnessConfig, resolver: Arc<dyn ArtifactResolver>) -> Self {
        let distribution = Distribution::from_config(&config, resolver);
        Self {
            config,
            distribution,
            install_path: None,
            child: None,
            drain: None,
            exit_signal: None,
            output: CapturedOutput::default(),
            exit_code: None,
            relative_path: DEFAULT_RELATIVE_PATH.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            state: LifecycleState::Idle,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Turning recreation on discards the cached installation, so the next
    /// `prepare` expands the archive again.
    pub fn set_recreate(&mut self, recreate: bool) {
        self.config.recreate = recreate;
        if recreate {
            self.install_path = None;
        }
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.config.debug = debug;
    }

    pub fn set_policy(&mut self, policy: StopPolicy) {
        self.config.policy = policy;
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Lines the server wrote to stdout during the last run.
    ///
    /// Under the manual policy these are available once the server has been
    /// stopped.
    pub fn stdout_lines(&self) -> &[String] {
        &self.output.stdout
    }

    pub fn stderr_lines(&self) -> &[String] {
        &self.output.stderr
    }

    pub fn output(&self) -> &CapturedOutput {
        &self.output
    }

    /// Exit code of the last run, `None` while it has not exited.
    ///
    /// On Unix a server killed by a signal reports `128 + signal`.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn readiness_url(&self) -> String {
        readiness_url(&self.config.readiness, self.http_port, &self.relative_path)
    }

    pub fn install_path(&self) -> Option<&Path> {
        self.install_path.as_deref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Expand the distribution if this supervisor has not done so yet
    pub async fn prepare(&mut self) -> HarnessResult<PathBuf> {
        if let Some(path) = &self.install_path {
            return Ok(path.clone());
        }

        let distribution = self.distribution.clone();
        let recreate = self.config.recreate;
        let path = tokio::task::spawn_blocking(move || distribution.prepare(recreate))
            .await
            .map_err(|e| HarnessError::Preparation(format!("preparation task failed: {}", e)))??;

        self.install_path = Some(path.clone());
        Ok(path)
    }

    /// Whether the server process is alive. Records its exit code if it has
    /// exited on its own.
    pub fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.record_exit(status);
                false
            }
            Err(e) => {
                warn!("Cannot query server process: {}", e);
                false
            }
        }
    }

    /// Launch the server with `arguments`.
    ///
    /// Automatic policy: returns after the server exited on its own; it is
    /// always stopped by the time this returns. Manual policy: returns once
    /// the readiness endpoint answers; stopping is up to the caller.
    ///
    /// On failure the server is torn down before the error is returned.
    pub async fn start<I, S>(&mut self, arguments: I) -> HarnessResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let arguments: Vec<String> = arguments.into_iter().map(Into::into).collect();
        let policy = self.config.policy;

        if policy.is_manual() && self.is_running() {
            return Err(HarnessError::AlreadyRunning);
        }

        self.reset().await?;

        let result = self.launch_and_observe(&arguments, policy).await;

        if result.is_err() || policy.tears_down_after_start() {
            let teardown = self.stop_if_running().await;
            match result {
                Err(e) => {
                    if let Err(teardown_err) = teardown {
                        warn!("Teardown after failed start also failed: {}", teardown_err);
                    }
                    self.state = LifecycleState::Failed;
                    return Err(e);
                }
                Ok(()) => teardown?,
            }
        }

        Ok(())
    }

    async fn launch_and_observe(&mut self, arguments: &[String], policy: StopPolicy) -> HarnessResult<()> {
        self.state = LifecycleState::Launching;

        let install = self.prepare().await?;
        let launch = LaunchArgs::build(&self.config, arguments)?;
        self.relative_path = launch.relative_path().to_string();
        self.http_port = launch.http_port();

        let (stdout, stderr) = self.spawn(&install, &launch).await?;
        self.state = LifecycleState::Running;

        match policy {
            StopPolicy::Automatic => self.run_to_completion(stdout, stderr).await,
            StopPolicy::Manual => {
                let (exit_signal, exited) = watch::channel(false);
                self.exit_signal = Some(exit_signal);
                self.drain = Some(DrainTask::spawn(stdout, stderr, self.config.echo_output, exited));
                self.await_readiness().await
            }
        }
    }

    async fn spawn(&mut self, install: &Path, launch: &LaunchArgs) -> HarnessResult<(ChildStdout, ChildStderr)> {
        let data_dir = install.join("data");
        if data_dir.exists() {
            debug!("Removing persisted state at {}", data_dir.display());
            tokio::fs::remove_dir_all(&data_dir).await?;
        }

        let bin_dir = install.join("bin");
        let program = bin_dir.join(launch.launcher());

        info!("Starting server: {}", launch.command_line());

        let mut child = Command::new(&program)
            .args(launch.args())
            .current_dir(&bin_dir)
            .envs(&self.config.bootstrap_env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::Start { program, source })?;

        debug!("Server started with PID {:?}", child.id());

        let pipes = take_pipes(&mut child);
        self.child = Some(child);
        pipes
    }

    /// Read the server's output on this task until it exits by itself
    async fn run_to_completion(&mut self, stdout: ChildStdout, stderr: ChildStderr) -> HarnessResult<()> {
        let echo = self.config.echo_output;
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };

        let (exit_signal, exited) = watch::channel(false);
        let wait = async move {
            let status = child.wait().await;
            let _ = exit_signal.send(true);
            status
        };
        let (outcome, status) = tokio::join!(drain(stdout, stderr, echo, exited), wait);

        self.output.extend(outcome.output);
        let status = status?;
        self.record_exit(status);
        info!("Server exited with code {}", exit_code(status));
        outcome.result
    }

    async fn await_readiness(&mut self) -> HarnessResult<()> {
        let url = self.readiness_url();
        let probe = ReadinessProbe::new(self.config.readiness.retry_policy())?;

        match probe.wait_for_ready(&url).await {
            ProbeOutcome::Ready { .. } => Ok(()),
            ProbeOutcome::TimedOut { attempts, .. } => Err(HarnessError::ReadinessTimeout {
                url,
                timeout_ms: self.config.readiness.timeout_ms,
                attempts,
            }),
        }
    }

    /// Stop the server if it is alive, then collect its output.
    ///
    /// Sends a graceful termination request and waits up to the stop
    /// timeout; a server still alive after that is killed and `Stop` is
    /// returned. Does nothing when no server is running.
    pub async fn stop_if_running(&mut self) -> HarnessResult<()> {
        let stop_result = if self.is_running() {
            self.state = LifecycleState::Stopping;
            self.terminate().await
        } else {
            Ok(())
        };

        let drain_result = self.shutdown_drain().await;

        if matches!(self.state, LifecycleState::Running | LifecycleState::Stopping) {
            self.state = LifecycleState::Stopped;
        }

        match (stop_result, drain_result) {
            (Err(stop_err), Err(drain_err)) => {
                warn!("Output reader also failed during stop: {}", drain_err);
                Err(stop_err)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn terminate(&mut self) -> HarnessResult<()> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        let grace = self.config.timeouts.stop();
        let pid = child.id().unwrap_or_default();

        info!("Stopping server (pid: {})", pid);
        let outcome = stop_child(child, grace, request_termination).await?;
        self.record_exit(outcome.status());
        debug!("Server exited with code {}", exit_code(outcome.status()));

        match outcome {
            StopOutcome::TimedOut(_) => Err(HarnessError::Stop {
                pid,
                timeout_ms: self.config.timeouts.stop_ms,
            }),
            StopOutcome::Graceful(_) | StopOutcome::Forced(_) => Ok(()),
        }
    }

    /// Keep the exit code and release the output reader
    fn record_exit(&mut self, status: ExitStatus) {
        self.exit_code = Some(exit_code(status));
        if let Some(signal) = &self.exit_signal {
            let _ = signal.send(true);
        }
    }

    /// Join the background reader, if any, and keep what it captured
    async fn shutdown_drain(&mut self) -> HarnessResult<()> {
        let Some(task) = self.drain.take() else {
            return Ok(());
        };
        let outcome = task.join(self.config.timeouts.drain_join()).await;
        self.output.extend(outcome.output);
        outcome.result
    }

    /// Forget the previous run. Any leftover process is stopped first.
    async fn reset(&mut self) -> HarnessResult<()> {
        self.stop_if_running().await?;
        self.output.clear();
        self.exit_code = None;
        self.child = None;
        self.exit_signal = None;
        Ok(())
    }
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopOutcome {
    /// Exited within the grace period
    Graceful(ExitStatus),
    /// The termination request failed and the process was killed
    Forced(ExitStatus),
    /// Outlived the grace period and was killed
    TimedOut(ExitStatus),
}

impl StopOutcome {
    fn status(self) -> ExitStatus {
        match self {
            StopOutcome::Graceful(s) | StopOutcome::Forced(s) | StopOutcome::TimedOut(s) => s,
        }
    }
}

/// Ask `child` to stop through `request`, then wait up to `grace`. A child
/// whose request fails, or that is still alive after `grace`, is killed.
async fn stop_child<F>(child: &mut Child, grace: Duration, request: F) -> HarnessResult<StopOutcome>
where
    F: FnOnce(&mut Child) -> HarnessResult<()>,
{
    if let Err(e) = request(child) {
        warn!("Cannot ask the server to stop ({}), killing it", e);
        child.start_kill()?;
        return Ok(StopOutcome::Forced(child.wait().await?));
    }

    match timeout(grace, child.wait()).await {
        Ok(status) => Ok(StopOutcome::Graceful(status?)),
        Err(_) => {
            warn!("Server did not stop within {} ms, killing it", grace.as_millis());
            child.start_kill()?;
            Ok(StopOutcome::TimedOut(child.wait().await?))
        }
    }
}

fn take_pipes(child: &mut Child) -> HarnessResult<(ChildStdout, ChildStderr)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("server stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("server stderr was not captured"))?;
    Ok((stdout, stderr))
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> HarnessResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        // Already gone between the liveness check and the signal
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(std::io::Error::from(e).into()),
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> HarnessResult<()> {
    child.start_kill()?;
    Ok(())
}

/// Exit code with shell semantics for signal deaths
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::LocalArtifact;

    fn supervisor() -> Supervisor {
        let config = HarnessConfig::default();
        Supervisor::with_resolver(config, Arc::new(LocalArtifact::new("/nonexistent/server.zip")))
    }

    #[test]
    fn test_initial_state() {
        let mut supervisor = supervisor();
        assert_eq!(supervisor.state(), LifecycleState::Idle);
        assert_eq!(supervisor.exit_code(), None);
        assert_eq!(supervisor.http_port(), 8080);
        assert_eq!(supervisor.relative_path(), "/");
        assert_eq!(supervisor.readiness_url(), "http://localhost:8080/realms/master/");
        assert!(!supervisor.is_running());
        assert!(supervisor.stdout_lines().is_empty());
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_a_noop() {
        let mut supervisor = supervisor();
        supervisor.stop_if_running().await.unwrap();
        supervisor.stop_if_running().await.unwrap();
        assert_eq!(supervisor.state(), LifecycleState::Idle);
        assert_eq!(supervisor.exit_code(), None);
    }

    #[tokio::test]
    async fn test_preparation_failure_fails_start() {
        let mut supervisor = supervisor();
        let result = supervisor.start(["start-dev"]).await;
        assert!(matches!(result, Err(HarnessError::Preparation(_))));
        assert_eq!(supervisor.state(), LifecycleState::Failed);
        assert!(supervisor.install_path().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_stop_request_falls_back_to_kill() {
        let mut child = Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap();

        let outcome = stop_child(&mut child, Duration::from_secs(5), |_| {
            Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied).into())
        })
        .await
        .unwrap();

        assert!(matches!(outcome, StopOutcome::Forced(_)), "{:?}", outcome);
        assert_eq!(exit_code(outcome.status()), 137);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_child_within_grace_is_graceful() {
        let mut child = Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap();

        let outcome = stop_child(&mut child, Duration::from_secs(5), request_termination)
            .await
            .unwrap();

        assert!(matches!(outcome, StopOutcome::Graceful(_)), "{:?}", outcome);
        assert_eq!(exit_code(outcome.status()), 143);
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_from_signal() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code(ExitStatus::from_raw(15)), 143);
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
    }
}
