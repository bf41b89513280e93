//! Readiness probing
//!
//! Polls the server's realm endpoint at a fixed interval until it answers
//! `200` or the deadline passes. There is no backoff: server startup time in
//! tests is bounded, and a steady cadence keeps the worst case predictable.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tracing::{debug, info, trace};

use crate::config::ReadinessConfig;
use crate::error::HarnessResult;
use crate::insecure;

/// Fixed-interval retry bounded by a deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            deadline: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready { attempts: usize, elapsed: Duration },
    TimedOut { attempts: usize, elapsed: Duration },
}

impl ProbeOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeOutcome::Ready { .. })
    }

    pub fn attempts(&self) -> usize {
        match self {
            ProbeOutcome::Ready { attempts, .. } | ProbeOutcome::TimedOut { attempts, .. } => *attempts,
        }
    }
}

/// Build the readiness URL, collapsing repeated `/` in the path
pub fn readiness_url(config: &ReadinessConfig, port: u16, relative_path: &str) -> String {
    let path = collapse_slashes(&format!("/{}/{}", relative_path, config.path_suffix));
    format!("{}://{}:{}{}", config.scheme, config.host, port, path)
}

fn collapse_slashes(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed
}

pub struct ReadinessProbe {
    client: Client,
    policy: RetryPolicy,
}

impl ReadinessProbe {
    pub fn new(policy: RetryPolicy) -> HarnessResult<Self> {
        Ok(Self {
            client: insecure::client()?,
            policy,
        })
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Poll `url` until it answers `200` or the deadline passes.
    ///
    /// Each round waits one interval before connecting. Every failure (other
    /// status codes, refused connections, TLS errors, timeouts) is retried.
    /// An attempt never outlives the deadline, so a timeout is reported no
    /// later than deadline + one interval.
    pub async fn wait_for_ready(&self, url: &str) -> ProbeOutcome {
        let started = Instant::now();
        let mut attempts = 0;

        loop {
            sleep(self.policy.interval).await;

            let elapsed = started.elapsed();
            let Some(remaining) = self.policy.deadline.checked_sub(elapsed).filter(|r| !r.is_zero()) else {
                debug!("Readiness deadline passed after {} attempts", attempts);
                return ProbeOutcome::TimedOut { attempts, elapsed };
            };

            attempts += 1;
            match self.client.get(url).timeout(remaining).send().await {
                Ok(resp) if resp.status() == StatusCode::OK => {
                    let elapsed = started.elapsed();
                    info!("Server is ready at {} ({} ms)", url, elapsed.as_millis());
                    return ProbeOutcome::Ready { attempts, elapsed };
                }
                Ok(resp) => {
                    debug!("Readiness check returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for server at {}...", url);
                    }
                    // Connection refused is expected while the server boots
                    if e.is_connect() {
                        trace!("Readiness check error: {}", e);
                    } else {
                        debug!("Readiness check error: {}", e);
                    }
                }
            }
        }
    }
}
