//! Job execution routines.
//!
//! The worker hands each job to a [`JobRunner`]. A runner records success on
//! the job itself; any error it returns is treated as a job failure.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::download::ModelDownloader;
use crate::error::{Error, Result};
use crate::model::{GenerateRequest, JobId};
use crate::store::JobStore;
use crate::temp_files::TempFiles;

/// Executes one job. Expected to mark the job succeeded (or failed) through
/// the store; returning an error leaves that to the worker.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_one_job(&self, job_id: &JobId, request: GenerateRequest) -> Result<()>;
}

/// Runs an external generator executable once per job.
///
/// Each job gets a working directory `<base_dir>/<job_id>` containing
/// `request.json`. The generator runs with that directory as its cwd and
/// must write `result.json` there before exiting 0. The directory is
/// registered as a job temp file, so the worker removes it afterwards.
pub struct CommandRunner {
    command: PathBuf,
    base_dir: PathBuf,
    store: Arc<dyn JobStore>,
    temp_files: Arc<TempFiles>,
    models: Option<(Arc<ModelDownloader>, PathBuf)>,
}

impl CommandRunner {
    pub fn new(
        command: impl Into<PathBuf>,
        base_dir: impl Into<PathBuf>,
        store: Arc<dyn JobStore>,
        temp_files: Arc<TempFiles>,
    ) -> Self {
        Self {
            command: command.into(),
            base_dir: base_dir.into(),
            store,
            temp_files,
            models: None,
        }
    }

    /// Make sure the requested model is on disk before the generator runs.
    /// Its path is passed to the generator as `GENQ_MODEL_PATH`.
    pub fn with_models(mut self, downloader: Arc<ModelDownloader>, checkpoint_dir: PathBuf) -> Self {
        self.models = Some((downloader, checkpoint_dir));
        self
    }

    fn job_dir(&self, job_id: &JobId) -> Result<PathBuf> {
        let mut components = Path::new(job_id.as_str()).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.base_dir.join(job_id.as_str())),
            _ => Err(Error::Validation(format!(
                "job id '{job_id}' is not a valid directory name"
            ))),
        }
    }
}

#[async_trait]
impl JobRunner for CommandRunner {
    async fn run_one_job(&self, job_id: &JobId, request: GenerateRequest) -> Result<()> {
        let dir = self.job_dir(job_id)?;
        tokio::fs::create_dir_all(&dir).await?;
        self.temp_files.register(job_id, &dir).await;

        let model_path = match (&self.models, &request.model) {
            (Some((downloader, checkpoint_dir)), Some(model)) => {
                Some(downloader.ensure_model_downloaded(model, checkpoint_dir).await?)
            }
            _ => None,
        };

        tokio::fs::write(dir.join("request.json"), serde_json::to_vec_pretty(&request)?).await?;

        // Resolve a relative command path against the process cwd, not the
        // job dir. Bare names are left for PATH lookup.
        let command = if self.command.is_relative() && self.command.components().count() > 1 {
            std::env::current_dir()?.join(&self.command)
        } else {
            self.command.clone()
        };

        debug!(command = %command.display(), dir = %dir.display(), "running generator");

        let mut cmd = Command::new(&command);
        cmd.current_dir(&dir)
            .env("GENQ_JOB_ID", job_id.as_str())
            .env("GENQ_JOB_DIR", &dir)
            .stdin(Stdio::null())
            // stdout belongs to the CLI's event stream
            .stdout(std::io::stderr())
            .kill_on_drop(true);
        if let Some(ref path) = model_path {
            cmd.env("GENQ_MODEL_PATH", path);
        }
        let status = cmd.status().await?;

        if !status.success() {
            return Err(Error::Other(format!(
                "generator exited with status {}",
                status.code().unwrap_or(-1)
            )));
        }

        let output = tokio::fs::read_to_string(dir.join("result.json"))
            .await
            .map_err(|e| Error::Other(format!("missing result.json: {e}")))?;
        let result: serde_json::Value = serde_json::from_str(&output)
            .map_err(|e| Error::Other(format!("bad result.json: {e}")))?;

        self.store.mark_succeeded(job_id, result)?;
        info!(job_id = %job_id, "generator completed");
        Ok(())
    }
}
