//! Job registry trait: create, look up, delete, and list jobs.

use crate::Job;
use async_trait::async_trait;
use sort_types::{AlbumRef, JobOptions};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum JobsError {
    #[error("job already exists: {0}")]
    DuplicateJob(String),
    #[error("job id must not be empty")]
    EmptyId,
}

/// Owner of every job's lifetime.
///
/// Contract: `get_job` returns `None` when the id is unknown (never created, deleted,
/// or pruned); a job that exists but already finished is still returned. The API layer
/// maps `None` to 404. Deleting a job neither cancels it nor closes its listeners.
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Create and register a job under a caller-chosen id.
    async fn create_job(
        &self,
        id: String,
        album: AlbumRef,
        options: JobOptions,
    ) -> Result<Arc<Job>, JobsError>;

    /// Create and register a job under a fresh registry-assigned id.
    async fn create_job_with_generated_id(
        &self,
        album: AlbumRef,
        options: JobOptions,
    ) -> Result<Arc<Job>, JobsError> {
        self.create_job(uuid::Uuid::new_v4().to_string(), album, options)
            .await
    }

    async fn get_job(&self, id: &str) -> Option<Arc<Job>>;

    /// Remove a job; returns it if it was present.
    async fn delete_job(&self, id: &str) -> Option<Arc<Job>>;

    /// Stable snapshot of the registered jobs, oldest first.
    async fn list_jobs(&self) -> Vec<Arc<Job>>;

    /// Drop terminal jobs that finished more than `older_than` ago; returns how many.
    async fn prune_finished(&self, older_than: Duration) -> usize;
}
