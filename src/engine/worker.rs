//! Worker pool: drains the job queue and drives each job from dispatch to
//! resource release.
//!
//! Every dequeued job, whatever happens inside the execution routine, ends
//! with its terminal progress events published, its completion signal set,
//! its temp files removed, and its queue slot acknowledged.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use opentelemetry::KeyValue;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::Error;
use crate::model::{JobId, JobListeners, JobStatus, ProgressEvent};
use crate::queue::{JobQueue, QueueItem};
use crate::store::JobStore;
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;
use crate::temp_files::TempFileCleaner;

use super::runner::JobRunner;

/// Progress message used when a job ends `failed` without a stored error.
pub const FALLBACK_ERROR: &str = "Generation failed";

/// A fixed number of workers sharing one queue, store, and runner.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    store: Arc<dyn JobStore>,
    runner: Arc<dyn JobRunner>,
    temp_files: Arc<dyn TempFileCleaner>,
    shutdown: CancellationToken,
    workers: usize,
}

impl Clone for WorkerPool {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            store: Arc::clone(&self.store),
            runner: Arc::clone(&self.runner),
            temp_files: Arc::clone(&self.temp_files),
            shutdown: self.shutdown.clone(),
            workers: self.workers,
        }
    }
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        store: Arc<dyn JobStore>,
        runner: Arc<dyn JobRunner>,
        temp_files: Arc<dyn TempFileCleaner>,
        workers: usize,
    ) -> Self {
        Self {
            queue,
            store,
            runner,
            temp_files,
            shutdown: CancellationToken::new(),
            workers: workers.max(1),
        }
    }

    /// Stop taking new jobs. Jobs already running finish normally.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Spawn one task per worker.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|worker| {
                let pool = self.clone();
                tokio::spawn(async move { pool.run_worker(worker).await })
            })
            .collect()
    }

    /// Dequeue and process jobs until shutdown or until the queue is closed
    /// and empty.
    pub async fn run_worker(&self, worker: usize) {
        info!(worker, "worker started");
        loop {
            let item = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                item = self.queue.dequeue() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            self.process_queue_item(worker, item).await;
        }
        info!(worker, "worker stopped");
    }

    /// Drive one job end to end. Never fails: every error from the job is
    /// recorded on the job and reported to its listeners.
    ///
    /// Temp-file cleanup and the queue acknowledgement run exactly once even
    /// if the store or a notification step panics.
    pub async fn process_queue_item(&self, worker: usize, item: QueueItem) {
        let QueueItem { job_id, request } = item;
        let span = start_job_span(&job_id, worker);

        async {
            let driven = AssertUnwindSafe(self.run_and_notify(&job_id, request, &span))
                .catch_unwind()
                .await;
            if let Err(payload) = driven {
                error!(error = %panic_message(payload), "job bookkeeping panicked");
                metrics::jobs_finished().add(1, &[KeyValue::new("status", "unknown")]);
            }

            let cleaned = AssertUnwindSafe(self.temp_files.cleanup_job_temp_files(&job_id))
                .catch_unwind()
                .await;
            if let Err(payload) = cleaned {
                error!(error = %panic_message(payload), "temp file cleanup panicked");
            }
            self.queue.acknowledge();
        }
        .instrument(span.clone())
        .await
    }

    async fn run_and_notify(
        &self,
        job_id: &JobId,
        request: crate::model::GenerateRequest,
        span: &tracing::Span,
    ) {
        let listeners = self.store.get(job_id).map(|record| record.listeners);
        self.queue.claim(job_id).await;
        let _unwind = listeners.as_ref().map(DoneOnUnwind);

        if listeners.is_some() {
            match self.store.mark_running(job_id) {
                Ok(()) => record_state_transition(span, JobStatus::Queued, JobStatus::Running),
                Err(e) => warn!(error = %e, "could not mark job running"),
            }
        } else {
            debug!("no record for job, running without notifications");
        }

        let started = Instant::now();
        let outcome = self.execute(job_id, request).await;
        metrics::job_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &[]);

        let status = match (outcome, listeners.as_ref()) {
            (Ok(()), Some(listeners)) => self.notify_completed(job_id, listeners).await,
            (Err(message), Some(listeners)) => {
                self.notify_failed(job_id, listeners, &message, span).await
            }
            (Ok(()), None) => "unknown",
            (Err(message), None) => {
                warn!(error = %message, "job without record failed");
                "failed"
            }
        };
        metrics::jobs_finished().add(1, &[KeyValue::new("status", status)]);
    }

    /// Run the job in its own task so a panic in the job body surfaces as an
    /// ordinary failure message instead of taking the worker down.
    async fn execute(
        &self,
        job_id: &JobId,
        request: crate::model::GenerateRequest,
    ) -> Result<(), String> {
        let runner = Arc::clone(&self.runner);
        let id = job_id.clone();
        let handle = tokio::spawn(async move { runner.run_one_job(&id, request).await });

        match handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(join_err) if join_err.is_panic() => Err(panic_message(join_err.into_panic())),
            Err(join_err) => Err(join_err.to_string()),
        }
    }

    /// The routine returned normally: report whatever outcome it recorded.
    async fn notify_completed(&self, job_id: &JobId, listeners: &JobListeners) -> &'static str {
        let status = match self.store.get(job_id) {
            Some(record) => match (record.status, record.result) {
                (JobStatus::Succeeded, Some(result)) => {
                    listeners.publish(ProgressEvent::Result { result }).await;
                    "succeeded"
                }
                (JobStatus::Failed, _) => {
                    let content = record.error.unwrap_or_else(|| FALLBACK_ERROR.to_string());
                    listeners.publish(ProgressEvent::Error { content }).await;
                    "failed"
                }
                (status, _) => {
                    warn!(%status, "job returned without a terminal outcome");
                    "unknown"
                }
            },
            None => "unknown",
        };
        listeners.publish(ProgressEvent::Done).await;
        listeners.signal_done();
        status
    }

    /// The routine failed: record the failure unless an outcome is already
    /// terminal, then report it.
    async fn notify_failed(
        &self,
        job_id: &JobId,
        listeners: &JobListeners,
        message: &str,
        span: &tracing::Span,
    ) -> &'static str {
        error!(error = %message, "job failed");

        let current = self.store.get(job_id).map(|record| record.status);
        if let Some(status) = current {
            if !status.is_terminal() {
                match self.store.mark_failed(job_id, message) {
                    Ok(()) => record_state_transition(span, status, JobStatus::Failed),
                    Err(Error::InvalidTransition { from, .. }) => {
                        debug!(%from, "job reached a terminal state concurrently")
                    }
                    Err(e) => warn!(error = %e, "could not mark job failed"),
                }
            }
        }

        listeners
            .publish(ProgressEvent::Error {
                content: message.to_string(),
            })
            .await;
        listeners.publish(ProgressEvent::Done).await;
        listeners.signal_done();
        "failed"
    }
}

/// Ends the progress stream and fires the completion signal if notification
/// unwinds, so a listener never waits on a job the worker gave up on.
struct DoneOnUnwind<'a>(&'a JobListeners);

impl Drop for DoneOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            if let Some(ref tx) = self.0.progress {
                let _ = tx.try_send(ProgressEvent::Done);
            }
            self.0.signal_done();
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}
