//! Metric instrument factories for genq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("genq")
}

/// Counter: jobs accepted onto the queue.
/// Labels: `result` ("ok" | "rejected").
pub fn jobs_submitted() -> Counter<u64> {
    meter()
        .u64_counter("genq.jobs.submitted")
        .with_description("Number of jobs submitted")
        .build()
}

/// Counter: jobs a worker finished processing.
/// Labels: `status` ("succeeded" | "failed" | "unknown").
pub fn jobs_finished() -> Counter<u64> {
    meter()
        .u64_counter("genq.jobs.finished")
        .with_description("Number of jobs finished by workers")
        .build()
}

/// Counter: records evicted by the store cleanup loop.
pub fn jobs_swept() -> Counter<u64> {
    meter()
        .u64_counter("genq.jobs.swept")
        .with_description("Number of expired job records evicted")
        .build()
}

/// Histogram: wall time of the execution routine in milliseconds.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("genq.job.duration_ms")
        .with_description("Job execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
