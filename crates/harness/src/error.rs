//! Error types for the harness

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Failed to prepare distribution: {0}")]
    Preparation(String),

    #[error("Server already running. Stop it before starting it again")]
    AlreadyRunning,

    #[error("Failed to start the server ({}): {source}", program.display())]
    Start {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument { arg: String, reason: String },

    #[error("Failed to read server {stream}: {source}")]
    StreamRead {
        stream: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout [{timeout_ms} ms] while waiting for server at {url} ({attempts} attempts)")]
    ReadinessTimeout {
        url: String,
        timeout_ms: u64,
        attempts: usize,
    },

    #[error("Failed to stop the server (pid {pid}) within {timeout_ms} ms; it was killed")]
    Stop { pid: u32, timeout_ms: u64 },

    #[error("Failed to terminate output reader: {0}")]
    DrainJoin(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Page error: {0}")]
    Page(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
