//! Error types for genq.

use thiserror::Error;

use crate::model::JobStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("job queue is full")]
    QueueFull,

    #[error("job queue is closed")]
    QueueClosed,

    #[error("{0}")]
    Validation(String),

    #[error("model download failed: {0}")]
    Download(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
