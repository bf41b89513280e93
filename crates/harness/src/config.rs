//! Harness configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dist::{ArtifactResolver, EnvArtifact, LocalArtifact};
use crate::error::{HarnessError, HarnessResult};
use crate::probe::RetryPolicy;

/// Environment variable consulted for the artifact when none is configured
pub const DEFAULT_ARTIFACT_ENV: &str = "DISTTEST_ARTIFACT";

/// Who is responsible for stopping the server after `start` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopPolicy {
    /// The server runs to completion inside `start` and is always torn down
    /// before `start` returns.
    #[default]
    Automatic,
    /// `start` returns once the server is ready; the caller stops it.
    Manual,
}

impl StopPolicy {
    pub fn is_manual(self) -> bool {
        matches!(self, StopPolicy::Manual)
    }

    /// Whether `start` tears the server down even when it succeeded
    pub fn tears_down_after_start(self) -> bool {
        matches!(self, StopPolicy::Automatic)
    }

    /// Only servers that run to completion are launched in test mode
    pub fn launch_mode(self) -> Option<&'static str> {
        match self {
            StopPolicy::Automatic => Some("test"),
            StopPolicy::Manual => None,
        }
    }
}

/// Renames the expanded installation directory, e.g.
/// `server-dist-1.0` -> `server-1.0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRename {
    pub from: String,
    pub to: String,
}

/// Top-level harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory the distribution is expanded into
    pub dist_root: PathBuf,

    /// Distribution archive (falls back to `artifact_env`)
    pub artifact: Option<PathBuf>,

    /// Environment variable holding the archive path
    pub artifact_env: String,

    /// Launcher script inside `<install>/bin`
    pub launcher: String,

    /// System property carrying the launch mode
    pub launch_mode_property: String,

    /// Lifecycle policy
    pub policy: StopPolicy,

    /// Re-expand the distribution even if it already exists
    pub recreate: bool,

    /// Pass `--debug` to the launcher
    pub debug: bool,

    /// Echo server output lines through tracing
    pub echo_output: bool,

    /// Optional rename applied to the archive stem
    pub install_rename: Option<InstallRename>,

    /// Environment injected into the server process
    pub bootstrap_env: BTreeMap<String, String>,

    /// Readiness probing
    pub readiness: ReadinessConfig,

    /// Shutdown bounds
    pub timeouts: TimeoutConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let mut bootstrap_env = BTreeMap::new();
        bootstrap_env.insert("KEYCLOAK_ADMIN".to_string(), "admin".to_string());
        bootstrap_env.insert("KEYCLOAK_ADMIN_PASSWORD".to_string(), "admin".to_string());

        Self {
            dist_root: std::env::temp_dir().join("kc-tests"),
            artifact: None,
            artifact_env: DEFAULT_ARTIFACT_ENV.to_string(),
            launcher: "kc.sh".to_string(),
            launch_mode_property: "kc.launch.mode".to_string(),
            policy: StopPolicy::Automatic,
            recreate: false,
            debug: false,
            echo_output: true,
            install_rename: None,
            bootstrap_env,
            readiness: ReadinessConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Readiness endpoint and polling cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub scheme: String,
    pub host: String,
    /// Appended to the server's relative path
    pub path_suffix: String,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            path_suffix: "/realms/master/".to_string(),
            interval_ms: 1_000,
            timeout_ms: 120_000,
        }
    }
}

impl ReadinessConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_millis(self.interval_ms),
            deadline: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Grace period between SIGTERM and SIGKILL
    pub stop_ms: u64,
    /// Bound on joining the output reader
    pub drain_join_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            stop_ms: 10_000,
            drain_join_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn stop(&self) -> Duration {
        Duration::from_millis(self.stop_ms)
    }

    pub fn drain_join(&self) -> Duration {
        Duration::from_millis(self.drain_join_ms)
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file, or defaults if it does not exist
    pub fn load(path: &Path) -> HarnessResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| HarnessError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> HarnessResult<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> HarnessResult<String> {
        toml::to_string_pretty(self).map_err(|e| HarnessError::Config(e.to_string()))
    }

    /// Resolver for the configured artifact
    pub fn resolver(&self) -> Arc<dyn ArtifactResolver> {
        match &self.artifact {
            Some(path) => Arc::new(LocalArtifact::new(path.clone())),
            None => Arc::new(EnvArtifact::new(self.artifact_env.clone())),
        }
    }
}
