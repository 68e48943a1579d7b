//! Fakes shared by the integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use genq::download::ModelSource;
use genq::engine::{JobRunner, WorkerPool};
use genq::error::{Error, Result};
use genq::model::{GenerateRequest, JobId, JobListeners, JobRecord, JobStatus, ProgressEvent};
use genq::queue::JobQueue;
use genq::store::{JobStats, JobStore};
use genq::temp_files::TempFileCleaner;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// One scripted outcome of `cleanup_old_jobs`.
#[derive(Debug, Clone)]
pub enum Sweep {
    Removed(usize),
    Fail(&'static str),
    Panic(&'static str),
}

/// Store holding at most one record. `mark_failed` is unguarded so tests can
/// check that the worker does its own terminal-state check.
pub struct FakeStore {
    record: Mutex<Option<JobRecord>>,
    mark_failed_calls: Mutex<Vec<(JobId, String)>>,
    sweeps: Vec<Sweep>,
    cleanup_calls: AtomicUsize,
    stats_calls: AtomicUsize,
}

impl FakeStore {
    pub fn new(record: Option<JobRecord>) -> Self {
        Self {
            record: Mutex::new(record),
            mark_failed_calls: Mutex::new(Vec::new()),
            sweeps: vec![Sweep::Removed(0)],
            cleanup_calls: AtomicUsize::new(0),
            stats_calls: AtomicUsize::new(0),
        }
    }

    /// Script the sweeps. The last entry repeats once the script runs out.
    pub fn with_sweeps(mut self, sweeps: Vec<Sweep>) -> Self {
        assert!(!sweeps.is_empty());
        self.sweeps = sweeps;
        self
    }

    pub fn record(&self) -> Option<JobRecord> {
        self.record.lock().unwrap().clone()
    }

    /// Overwrite the status without touching result or error.
    pub fn force_status(&self, status: JobStatus) {
        if let Some(record) = self.record.lock().unwrap().as_mut() {
            record.status = status;
        }
    }

    pub fn mark_failed_calls(&self) -> Vec<(JobId, String)> {
        self.mark_failed_calls.lock().unwrap().clone()
    }

    pub fn cleanup_calls(&self) -> usize {
        self.cleanup_calls.load(Ordering::SeqCst)
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    fn with_record(&self, id: &JobId, update: impl FnOnce(&mut JobRecord)) -> Result<()> {
        let mut guard = self.record.lock().unwrap();
        match guard.as_mut() {
            Some(record) if &record.id == id => {
                update(record);
                Ok(())
            }
            _ => Err(Error::NotFound(id.to_string())),
        }
    }
}

impl JobStore for FakeStore {
    fn create(&self, id: JobId, listeners: JobListeners) -> Result<JobRecord> {
        let record = JobRecord::new(id, listeners);
        *self.record.lock().unwrap() = Some(record.clone());
        Ok(record)
    }

    fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.record().filter(|record| &record.id == id)
    }

    fn mark_running(&self, id: &JobId) -> Result<()> {
        self.with_record(id, |record| record.status = JobStatus::Running)
    }

    fn mark_succeeded(&self, id: &JobId, result: serde_json::Value) -> Result<()> {
        self.with_record(id, |record| {
            record.status = JobStatus::Succeeded;
            record.result = Some(result);
            record.finished_at = Some(Utc::now());
        })
    }

    fn mark_failed(&self, id: &JobId, error: &str) -> Result<()> {
        self.mark_failed_calls
            .lock()
            .unwrap()
            .push((id.clone(), error.to_string()));
        self.with_record(id, |record| {
            record.status = JobStatus::Failed;
            record.error = Some(error.to_string());
            record.finished_at = Some(Utc::now());
        })
    }

    fn cleanup_old_jobs(&self) -> Result<usize> {
        let call = self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        match &self.sweeps[call.min(self.sweeps.len() - 1)] {
            Sweep::Removed(n) => Ok(*n),
            Sweep::Fail(msg) => Err(Error::Other(msg.to_string())),
            Sweep::Panic(msg) => panic!("{msg}"),
        }
    }

    fn stats(&self) -> JobStats {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        JobStats::default()
    }
}

/// Wraps a real store and panics on every second `get`. With one worker the
/// lookup at the start of a job succeeds and the one during notification
/// panics.
pub struct PanickyLookups {
    inner: Arc<dyn JobStore>,
    gets: AtomicUsize,
}

impl PanickyLookups {
    pub fn new(inner: Arc<dyn JobStore>) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
        }
    }
}

impl JobStore for PanickyLookups {
    fn create(&self, id: JobId, listeners: JobListeners) -> Result<JobRecord> {
        self.inner.create(id, listeners)
    }

    fn get(&self, id: &JobId) -> Option<JobRecord> {
        if self.gets.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
            panic!("record index corrupted");
        }
        self.inner.get(id)
    }

    fn mark_running(&self, id: &JobId) -> Result<()> {
        self.inner.mark_running(id)
    }

    fn mark_succeeded(&self, id: &JobId, result: serde_json::Value) -> Result<()> {
        self.inner.mark_succeeded(id, result)
    }

    fn mark_failed(&self, id: &JobId, error: &str) -> Result<()> {
        self.inner.mark_failed(id, error)
    }

    fn cleanup_old_jobs(&self) -> Result<usize> {
        self.inner.cleanup_old_jobs()
    }

    fn stats(&self) -> JobStats {
        self.inner.stats()
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// What the fake execution routine does with each job.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Record success with this result.
    Succeed(serde_json::Value),
    /// Record the failure itself and return normally.
    RecordFailure(&'static str),
    /// Return an error without touching the store.
    Fail(&'static str),
    /// Record success, then return an error anyway.
    SucceedThenFail(&'static str),
    Panic(&'static str),
}

pub struct FakeRunner {
    store: Arc<dyn JobStore>,
    behavior: Behavior,
    calls: Mutex<Vec<JobId>>,
}

impl FakeRunner {
    pub fn new(store: Arc<dyn JobStore>, behavior: Behavior) -> Self {
        Self {
            store,
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<JobId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobRunner for FakeRunner {
    async fn run_one_job(&self, job_id: &JobId, _request: GenerateRequest) -> Result<()> {
        self.calls.lock().unwrap().push(job_id.clone());
        match &self.behavior {
            Behavior::Succeed(result) => self.store.mark_succeeded(job_id, result.clone()),
            Behavior::RecordFailure(msg) => self.store.mark_failed(job_id, msg),
            Behavior::Fail(msg) => Err(Error::Other(msg.to_string())),
            Behavior::SucceedThenFail(msg) => {
                self.store
                    .mark_succeeded(job_id, serde_json::json!("partial"))?;
                Err(Error::Other(msg.to_string()))
            }
            Behavior::Panic(msg) => panic!("{msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Temp file cleaner
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeCleaner {
    calls: Mutex<Vec<JobId>>,
}

impl FakeCleaner {
    pub fn calls(&self) -> Vec<JobId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TempFileCleaner for FakeCleaner {
    async fn cleanup_job_temp_files(&self, job_id: &JobId) {
        self.calls.lock().unwrap().push(job_id.clone());
    }
}

// ---------------------------------------------------------------------------
// Model sources
// ---------------------------------------------------------------------------

/// Calls a [`FakeSource`] received: `(repo_id, target_dir)`.
pub type CallLog = Arc<Mutex<Vec<(String, PathBuf)>>>;

/// Model hub that either writes a single weights file or fails.
pub struct FakeSource {
    name: &'static str,
    fail: bool,
    calls: CallLog,
}

impl FakeSource {
    pub fn ok(name: &'static str) -> (Box<dyn ModelSource>, CallLog) {
        Self::boxed(name, false)
    }

    pub fn failing(name: &'static str) -> (Box<dyn ModelSource>, CallLog) {
        Self::boxed(name, true)
    }

    fn boxed(name: &'static str, fail: bool) -> (Box<dyn ModelSource>, CallLog) {
        let calls = CallLog::default();
        let source = Self {
            name,
            fail,
            calls: Arc::clone(&calls),
        };
        (Box::new(source), calls)
    }
}

#[async_trait]
impl ModelSource for FakeSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn snapshot(&self, repo_id: &str, target_dir: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((repo_id.to_string(), target_dir.to_path_buf()));
        if self.fail {
            return Err(Error::Download(format!("{} unreachable", self.name)));
        }
        tokio::fs::create_dir_all(target_dir).await?;
        tokio::fs::write(target_dir.join("weights.bin"), b"w").await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Listeners wired to a fresh channel, plus the receiving ends.
pub fn listening() -> (
    JobListeners,
    mpsc::Receiver<ProgressEvent>,
    genq::model::CompletionSignal,
) {
    let (tx, rx) = mpsc::channel(16);
    let done = genq::model::CompletionSignal::new();
    (
        JobListeners {
            progress: Some(tx),
            done: Some(done.clone()),
        },
        rx,
        done,
    )
}

/// Drain whatever is currently buffered on a progress channel.
pub fn drain(rx: &mut mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// A pool over `store` with a fake runner and cleaner.
pub fn fake_pool(
    queue: Arc<JobQueue>,
    store: Arc<dyn JobStore>,
    behavior: Behavior,
    workers: usize,
) -> (WorkerPool, Arc<FakeRunner>, Arc<FakeCleaner>) {
    let runner = Arc::new(FakeRunner::new(Arc::clone(&store), behavior));
    let cleaner = Arc::new(FakeCleaner::default());
    let pool = WorkerPool::new(
        queue,
        store,
        runner.clone(),
        cleaner.clone(),
        workers,
    );
    (pool, runner, cleaner)
}
