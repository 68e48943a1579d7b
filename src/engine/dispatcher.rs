//! Producer side: accept a request, create its record, and queue it.

use std::path::PathBuf;
use std::sync::Arc;

use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::Result;
use crate::model::{
    CompletionSignal, GenerateRequest, JobId, JobListeners, JobStatus, ProgressEvent,
};
use crate::queue::JobQueue;
use crate::store::JobStore;
use crate::telemetry::metrics;
use crate::temp_files::{TempFileCleaner, TempFiles};

/// Progress events buffered per job before the worker waits on the reader.
pub const PROGRESS_BUFFER: usize = 16;

/// What the submitter gets back: the job id and, if it asked to listen, the
/// receiving ends of the progress channel and completion signal.
#[derive(Debug)]
pub struct JobSubscription {
    pub job_id: JobId,
    pub progress: Option<mpsc::Receiver<ProgressEvent>>,
    pub done: Option<CompletionSignal>,
}

impl JobSubscription {
    /// Read progress events up to and including `Done`.
    ///
    /// Returns an empty list for a fire-and-forget submission.
    pub async fn collect_events(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        if let Some(ref mut rx) = self.progress {
            while let Some(event) = rx.recv().await {
                let done = event == ProgressEvent::Done;
                events.push(event);
                if done {
                    break;
                }
            }
        }
        events
    }
}

/// Point-in-time view of a job for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    /// 1-based position while still waiting for a worker.
    pub queue_position: Option<usize>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

pub struct Dispatcher {
    queue: Arc<JobQueue>,
    store: Arc<dyn JobStore>,
    temp_files: Arc<TempFiles>,
}

impl Dispatcher {
    pub fn new(queue: Arc<JobQueue>, store: Arc<dyn JobStore>, temp_files: Arc<TempFiles>) -> Self {
        Self {
            queue,
            store,
            temp_files,
        }
    }

    pub async fn submit(&self, request: GenerateRequest, listen: bool) -> Result<JobSubscription> {
        self.submit_with_files(request, listen, Vec::new()).await
    }

    /// Validate and queue `request`. `files` (typically saved uploads) become
    /// owned by the job and are removed once it finishes, or right away if
    /// the submission is rejected.
    pub async fn submit_with_files(
        &self,
        request: GenerateRequest,
        listen: bool,
        files: Vec<PathBuf>,
    ) -> Result<JobSubscription> {
        let job_id = JobId::new();
        for file in files {
            self.temp_files.register(&job_id, file).await;
        }

        match self.try_submit(&job_id, request, listen).await {
            Ok(subscription) => {
                metrics::jobs_submitted().add(1, &[KeyValue::new("result", "ok")]);
                info!(job_id = %job_id, "job queued");
                Ok(subscription)
            }
            Err(e) => {
                metrics::jobs_submitted().add(1, &[KeyValue::new("result", "rejected")]);
                warn!(job_id = %job_id, error = %e, "job rejected");
                self.temp_files.cleanup_job_temp_files(&job_id).await;
                Err(e)
            }
        }
    }

    async fn try_submit(
        &self,
        job_id: &JobId,
        mut request: GenerateRequest,
        listen: bool,
    ) -> Result<JobSubscription> {
        request.validate_paths()?;

        let (listeners, progress, done) = if listen {
            let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
            let done = CompletionSignal::new();
            let listeners = JobListeners {
                progress: Some(tx),
                done: Some(done.clone()),
            };
            (listeners, Some(rx), Some(done))
        } else {
            (JobListeners::none(), None, None)
        };

        self.store.create(job_id.clone(), listeners)?;
        if let Err(e) = self.queue.try_enqueue(job_id.clone(), request).await {
            if let Err(mark_err) = self.store.mark_failed(job_id, &e.to_string()) {
                warn!(job_id = %job_id, error = %mark_err, "could not mark rejected job failed");
            }
            return Err(e);
        }

        Ok(JobSubscription {
            job_id: job_id.clone(),
            progress,
            done,
        })
    }

    /// Current status of a job, with its queue position if not yet claimed.
    pub async fn status(&self, job_id: &JobId) -> Option<JobView> {
        let record = self.store.get(job_id)?;
        let queue_position = match record.status {
            JobStatus::Queued => self.queue.queue_position(job_id).await,
            _ => None,
        };
        Some(JobView {
            job_id: record.id,
            status: record.status,
            queue_position,
            result: record.result,
            error: record.error,
        })
    }
}
