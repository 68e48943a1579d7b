//! # genq
//!
//! Asynchronous generation job queue.
//!
//! Jobs are queued onto a bounded FIFO, executed by a fixed pool of workers,
//! and report progress to whoever submitted them. Finished job records and
//! per-job temp files are reclaimed automatically. Also provides upload path
//! validation and on-demand model checkpoint downloads.

pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod model;
pub mod queue;
pub mod store;
pub mod telemetry;
pub mod temp_files;
pub mod upload;
