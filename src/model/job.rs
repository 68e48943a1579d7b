//! Job identity, lifecycle state, and the listener handles attached to a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Job ID
// ---------------------------------------------------------------------------

/// Newtype for job IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted and waiting for a worker.
    Queued,
    /// A worker is executing the job.
    Running,
    /// Finished with a result. Terminal.
    Succeeded,
    /// Finished with an error. Terminal.
    Failed,
}

impl JobStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Queued, Running)
                | (Queued, Failed)      // failed before dispatch
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress events
// ---------------------------------------------------------------------------

/// One entry on a job's progress stream. `Done` is always the last event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Result { result: serde_json::Value },
    Error { content: String },
    Done,
}

// ---------------------------------------------------------------------------
// Completion signal
// ---------------------------------------------------------------------------

/// Single-fire completion flag. Clones share the same underlying state.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Returns `true` only for the call that flipped it.
    pub fn set(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Handles through which the submitter observes a job. Either may be absent.
#[derive(Debug, Clone, Default)]
pub struct JobListeners {
    pub progress: Option<mpsc::Sender<ProgressEvent>>,
    pub done: Option<CompletionSignal>,
}

impl JobListeners {
    /// No listener attached (fire-and-forget submission).
    pub fn none() -> Self {
        Self::default()
    }

    /// Publish one event. A missing channel or a dropped receiver is a no-op.
    pub async fn publish(&self, event: ProgressEvent) {
        if let Some(ref tx) = self.progress {
            let _ = tx.send(event).await;
        }
    }

    /// Fire the completion signal, if one is attached.
    pub fn signal_done(&self) {
        if let Some(ref done) = self.done {
            done.set();
        }
    }
}

// ---------------------------------------------------------------------------
// Job record
// ---------------------------------------------------------------------------

/// The state of one job, as held by the job store.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    /// Present iff `status` is `Succeeded`.
    pub result: Option<serde_json::Value>,
    /// Present iff `status` is `Failed`.
    pub error: Option<String>,
    pub listeners: JobListeners,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(id: JobId, listeners: JobListeners) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Queued,
            result: None,
            error: None,
            listeners,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }
}
