//! Deadline watchdog: cancels a job that is still unfinished after a fixed duration.

use crate::Job;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Watch `job` and call [`Job::cancel`] once `deadline` elapses, unless the job finishes
/// first. The task resolves to true when it cancelled the job.
pub fn spawn_deadline(job: Arc<Job>, deadline: Duration) -> JoinHandle<bool> {
    tokio::spawn(async move {
        tokio::select! {
            _ = job.finished() => false,
            _ = tokio::time::sleep(deadline) => {
                let cancelled = job.cancel();
                if cancelled {
                    tracing::warn!(job_id = %job.id(), ?deadline, "job exceeded its deadline; cancelled");
                }
                cancelled
            }
        }
    })
}
