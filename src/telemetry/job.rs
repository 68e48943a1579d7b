//! Job execution span helpers.
//!
//! Every dequeued job runs inside a `job.execute` span so the worker's log
//! lines and the execution routine's own events share the job id.

use tracing::Span;

use crate::model::{JobId, JobStatus};

/// Start a span for one job's execution.
///
/// `job.status` is declared empty and filled in by [`record_state_transition`].
pub fn start_job_span(job_id: &JobId, worker: usize) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.id" = %job_id,
        "job.worker" = worker,
        "job.status" = tracing::field::Empty,
    )
}

/// Record a state transition on the span and emit it as an event.
pub fn record_state_transition(span: &Span, from: JobStatus, to: JobStatus) {
    span.record("job.status", to.as_str());
    span.in_scope(|| {
        tracing::info!(from = from.as_str(), to = to.as_str(), "state_transition");
    });
}
