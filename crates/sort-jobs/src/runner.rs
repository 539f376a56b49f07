//! Worker contract and the task that runs a worker against a job.

use crate::Job;
use async_trait::async_trait;
use sort_types::{EmbedderError, JobStatus, PhotoServiceError, ProviderError, RepositoryError};
use std::any::Any;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("photo service: {0}")]
    PhotoService(#[from] PhotoServiceError),
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("repository: {0}")]
    Repository(#[from] RepositoryError),
    #[error("{0}")]
    Other(String),
}

/// Logic that drives one job to completion.
///
/// Contract: call `set_running` before doing work, report progress through the job,
/// and finish with exactly one of `set_completed` / `set_failed`, unless the job's
/// cancellation token fired, in which case stop promptly and leave the status alone.
/// Returning `Err` is equivalent to `set_failed` with the error's message.
#[async_trait]
pub trait SortWorker: Send + Sync {
    async fn run(&self, job: Arc<Job>) -> Result<(), WorkerError>;
}

/// Run `worker` for `job` on a background task.
///
/// Errors and panics raised by the worker become a Failed job and never reach the
/// caller. A job cancelled before the task got scheduled is left untouched.
pub fn spawn_job(job: Arc<Job>, worker: Arc<dyn SortWorker>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if job.is_cancelled() {
            tracing::info!(job_id = %job.id(), "job cancelled before the worker started");
            return;
        }
        let task_job = Arc::clone(&job);
        let outcome = tokio::spawn(async move { worker.run(task_job).await }).await;
        match outcome {
            Ok(Ok(())) => {
                if !job.status().is_terminal() && !job.is_cancelled() {
                    tracing::warn!(job_id = %job.id(), "worker returned without finishing the job");
                    fail(&job, "worker returned without finishing the job");
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job.id(), error = %e, "worker failed");
                fail(&job, e.to_string());
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    format!("worker panicked: {}", panic_message(join_err.into_panic()))
                } else {
                    "worker task was aborted".to_string()
                };
                tracing::error!(job_id = %job.id(), %message, "worker crashed");
                fail(&job, message);
            }
        }
    })
}

/// Fail `job`, passing through Running when the worker never started it.
fn fail(job: &Job, message: impl Into<String>) {
    if job.status() == JobStatus::Pending {
        job.set_running();
    }
    job.set_failed(message);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sort_types::{AlbumRef, JobEvent, JobOptions};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn job() -> Arc<Job> {
        Arc::new(Job::new(
            "j1",
            AlbumRef::new("alb1", "Trip"),
            JobOptions::default(),
        ))
    }

    struct Completes;

    #[async_trait]
    impl SortWorker for Completes {
        async fn run(&self, job: Arc<Job>) -> Result<(), WorkerError> {
            job.set_running();
            job.set_total(2);
            job.send_event(JobEvent::new("photo"));
            job.increment();
            job.increment();
            job.set_completed(serde_json::json!({ "processed": 2 }));
            Ok(())
        }
    }

    struct Errors;

    #[async_trait]
    impl SortWorker for Errors {
        async fn run(&self, job: Arc<Job>) -> Result<(), WorkerError> {
            job.set_running();
            Err(WorkerError::Other("album listing failed".into()))
        }
    }

    /// Fails before it ever marks the job running.
    struct RejectsUpfront;

    #[async_trait]
    impl SortWorker for RejectsUpfront {
        async fn run(&self, _job: Arc<Job>) -> Result<(), WorkerError> {
            Err(WorkerError::Other("unknown provider: gemini".into()))
        }
    }

    struct Panics;

    #[async_trait]
    impl SortWorker for Panics {
        async fn run(&self, job: Arc<Job>) -> Result<(), WorkerError> {
            job.set_running();
            panic!("index out of range");
        }
    }

    struct ForgetsToFinish;

    #[async_trait]
    impl SortWorker for ForgetsToFinish {
        async fn run(&self, job: Arc<Job>) -> Result<(), WorkerError> {
            job.set_running();
            Ok(())
        }
    }

    /// Loops until cancelled, checking the token once per step.
    struct Cooperative {
        touched: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SortWorker for Cooperative {
        async fn run(&self, job: Arc<Job>) -> Result<(), WorkerError> {
            self.touched.store(true, Ordering::SeqCst);
            job.set_running();
            let token = job.cancellation_token();
            loop {
                if token.is_cancelled() {
                    return Ok(());
                }
                job.increment();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    #[tokio::test]
    async fn completed_worker() {
        let job = job();
        let mut listener = job.add_listener();
        spawn_job(Arc::clone(&job), Arc::new(Completes)).await.unwrap();

        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.progress(), (2, 2));
        let mut kinds = Vec::new();
        while let Ok(event) = listener.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(kinds.first().map(String::as_str), Some("running"));
        assert_eq!(kinds.last().map(String::as_str), Some("completed"));
    }

    #[tokio::test]
    async fn worker_error_becomes_failed() {
        let job = job();
        spawn_job(Arc::clone(&job), Arc::new(Errors)).await.unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error().as_deref(), Some("album listing failed"));
    }

    #[tokio::test]
    async fn error_before_running_still_fails_through_running() {
        let job = job();
        let mut listener = job.add_listener();
        spawn_job(Arc::clone(&job), Arc::new(RejectsUpfront))
            .await
            .unwrap();

        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error().as_deref(), Some("unknown provider: gemini"));
        let mut kinds = Vec::new();
        while let Ok(event) = listener.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(kinds, vec!["running", "failed"]);
    }

    #[tokio::test]
    async fn worker_panic_becomes_failed() {
        let job = job();
        let handle = spawn_job(Arc::clone(&job), Arc::new(Panics));
        assert!(handle.await.is_ok());
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error().unwrap().contains("index out of range"));
    }

    #[tokio::test]
    async fn unfinished_worker_is_failed() {
        let job = job();
        spawn_job(Arc::clone(&job), Arc::new(ForgetsToFinish))
            .await
            .unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let job = job();
        assert!(job.cancel());
        let touched = Arc::new(AtomicBool::new(false));
        spawn_job(
            Arc::clone(&job),
            Arc::new(Cooperative {
                touched: Arc::clone(&touched),
            }),
        )
        .await
        .unwrap();

        assert!(!touched.load(Ordering::SeqCst));
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(job.progress(), (0, 0));
    }

    #[tokio::test]
    async fn cancel_mid_run_stops_worker() {
        let job = job();
        let touched = Arc::new(AtomicBool::new(false));
        let handle = spawn_job(
            Arc::clone(&job),
            Arc::new(Cooperative {
                touched: Arc::clone(&touched),
            }),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(job.cancel());

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop after cancellation")
            .unwrap();
        assert_eq!(job.status(), JobStatus::Cancelled);
        let (processed, _) = job.progress();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(job.progress().0, processed);
    }
}
