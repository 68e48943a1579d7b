//! Periodic eviction of finished job records.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::store::JobStore;
use crate::telemetry::metrics;

use super::worker::panic_message;

/// Sweep the store every `interval` until `cancel` fires.
///
/// A failed or panicking sweep is logged and the loop carries on with the
/// next tick. Cancellation is observed at the sleep boundary and is the only
/// way out.
pub async fn run_job_store_cleanup_loop(
    store: Arc<dyn JobStore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        "job store cleanup started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("job store cleanup stopping");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let swept = std::panic::catch_unwind(AssertUnwindSafe(|| sweep(store.as_ref())));
        if let Err(payload) = swept {
            tracing::error!(error = %panic_message(payload), "job store cleanup panicked");
        }
    }
}

/// One sweep: evict, then report what is left if anything was removed.
fn sweep(store: &dyn JobStore) {
    match store.cleanup_old_jobs() {
        Ok(0) => tracing::debug!("job store cleanup: nothing to evict"),
        Ok(removed) => {
            metrics::jobs_swept().add(removed as u64, &[]);
            let stats = store.stats();
            tracing::info!(
                removed,
                total = stats.total,
                queued = stats.queued,
                running = stats.running,
                succeeded = stats.succeeded,
                failed = stats.failed,
                "cleaned up old jobs"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "job store cleanup failed");
        }
    }
}
