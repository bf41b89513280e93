//! disttest harness
//!
//! Drives a packaged server distribution through a repeatable test
//! lifecycle:
//! - Expands the distribution archive into a reusable installation
//! - Launches the server launcher script with derived arguments
//! - Captures the server console output line by line
//! - Polls the realm endpoint until the server is ready
//! - Stops the server gracefully, then forcibly
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Supervisor                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  start(args)                                                │
//! │    ├── Distribution::prepare() -> install path              │
//! │    ├── LaunchArgs::build()     -> argv, port, context path  │
//! │    ├── spawn launcher in <install>/bin                      │
//! │    ├── StopPolicy::Automatic -> Drain inline until exit     │
//! │    └── StopPolicy::Manual    -> DrainTask + ReadinessProbe  │
//! │  stop_if_running()                                          │
//! │    ├── SIGTERM, bounded wait, SIGKILL                       │
//! │    └── join DrainTask, collect CapturedOutput               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod args;
pub mod config;
pub mod dist;
pub mod drain;
pub mod error;
mod insecure;
pub mod page;
pub mod probe;
pub mod supervisor;

pub use args::LaunchArgs;
pub use config::{HarnessConfig, ReadinessConfig, StopPolicy, TimeoutConfig};
pub use dist::{ArtifactResolver, Distribution, EnvArtifact, LocalArtifact};
pub use drain::{CapturedOutput, OutputStream};
pub use error::{HarnessError, HarnessResult};
pub use probe::{ProbeOutcome, ReadinessProbe, RetryPolicy};
pub use supervisor::{LifecycleState, Supervisor};
