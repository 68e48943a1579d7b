//! Core data model.
//!
//! A job is one generation request moving through the queue. Its record
//! carries lifecycle state, the outcome, and the optional listener handles
//! the submitter attached.

pub mod job;
pub mod request;

pub use job::{CompletionSignal, JobId, JobListeners, JobRecord, JobStatus, ProgressEvent};
pub use request::{GenerateRequest, Seed};
