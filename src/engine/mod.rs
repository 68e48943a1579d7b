//! Job engine: producers, the worker pool, execution routines, and store
//! housekeeping.

pub mod cleanup;
pub mod dispatcher;
pub mod runner;
pub mod worker;

pub use cleanup::run_job_store_cleanup_loop;
pub use dispatcher::{Dispatcher, JobSubscription, JobView};
pub use runner::{CommandRunner, JobRunner};
pub use worker::WorkerPool;
