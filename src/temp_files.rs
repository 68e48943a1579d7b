//! Per-job temp-file tracking.
//!
//! Uploads and working directories created for a job are registered here and
//! removed when the worker finishes the job, whatever the outcome.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::model::JobId;

/// Removes whatever temporary files a job left behind.
///
/// Must be idempotent and must not fail for a job with no temp files.
#[async_trait]
pub trait TempFileCleaner: Send + Sync {
    async fn cleanup_job_temp_files(&self, job_id: &JobId);
}

/// Registry of temp paths (files or directories) owned by each job.
#[derive(Debug, Default)]
pub struct TempFiles {
    paths: Mutex<HashMap<JobId, Vec<PathBuf>>>,
}

impl TempFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, job_id: &JobId, path: impl Into<PathBuf>) {
        self.paths
            .lock()
            .await
            .entry(job_id.clone())
            .or_default()
            .push(path.into());
    }

    pub async fn registered(&self, job_id: &JobId) -> Vec<PathBuf> {
        self.paths
            .lock()
            .await
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TempFileCleaner for TempFiles {
    async fn cleanup_job_temp_files(&self, job_id: &JobId) {
        let paths = self.paths.lock().await.remove(job_id).unwrap_or_default();

        for path in paths {
            let removed = match tokio::fs::symlink_metadata(&path).await {
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(e) => Err(e),
            };
            match removed {
                Ok(()) => debug!(job_id = %job_id, path = %path.display(), "temp file removed"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(job_id = %job_id, path = %path.display(), error = %e, "temp file cleanup failed")
                }
            }
        }
    }
}
