//! Typed configuration from environment variables.
//!
//! Loads once at startup. Every setting has a default; malformed values
//! fail fast. Tokens are wrapped in `SecretString` so they never reach logs.

pub mod secrets;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use self::secrets::SecretString;

use crate::download::DownloadSource;
use crate::error::{Error, Result};

pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_JOB_RETENTION_SECS: u64 = 3600;

#[derive(Debug)]
pub struct Config {
    /// Number of jobs that may execute at the same time.
    pub workers: usize,
    pub queue_capacity: usize,
    pub cleanup_interval: Duration,
    /// How long finished job records are kept before eviction.
    pub job_retention: Duration,
    pub checkpoint_dir: PathBuf,
    /// Forced model download source; `None` means probe the network.
    pub download_source: Option<DownloadSource>,
    /// Executable run once per job by the command runner.
    pub generate_command: Option<PathBuf>,
    /// Base directory for per-job working directories.
    pub job_dir: PathBuf,
    pub hf_token: Option<SecretString>,
    /// Hugging Face mirror base URL, if not the public hub.
    pub hf_endpoint: Option<String>,
    pub modelscope_endpoint: Option<String>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let cleanup_interval_secs: u64 = parsed_var("GENQ_CLEANUP_INTERVAL_SECS")?
            .unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECS);
        if cleanup_interval_secs == 0 {
            return Err(Error::Config(
                "GENQ_CLEANUP_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            workers: parsed_var("GENQ_WORKERS")?.unwrap_or(DEFAULT_WORKERS).max(1),
            queue_capacity: parsed_var("GENQ_QUEUE_CAPACITY")?
                .unwrap_or(DEFAULT_QUEUE_CAPACITY)
                .max(1),
            cleanup_interval: Duration::from_secs(cleanup_interval_secs),
            job_retention: Duration::from_secs(
                parsed_var("GENQ_JOB_RETENTION_SECS")?.unwrap_or(DEFAULT_JOB_RETENTION_SECS),
            ),
            checkpoint_dir: optional_var("GENQ_CHECKPOINT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("checkpoints")),
            download_source: parsed_var("GENQ_DOWNLOAD_SOURCE")?,
            generate_command: optional_var("GENQ_GENERATE_COMMAND").map(PathBuf::from),
            job_dir: optional_var("GENQ_JOB_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("genq-jobs")),
            hf_token: optional_var("HF_TOKEN").map(SecretString::from),
            hf_endpoint: optional_var("HF_ENDPOINT"),
            modelscope_endpoint: optional_var("MODELSCOPE_ENDPOINT"),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// Set and non-blank, or `None`.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
        None => Ok(None),
    }
}
