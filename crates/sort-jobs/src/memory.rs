//! In-memory job registry: jobs in a map behind a reader/writer lock.

use crate::{Job, JobRegistry, JobsError};
use async_trait::async_trait;
use chrono::Utc;
use sort_types::{AlbumRef, JobOptions};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Process-lifetime registry. Construct once at startup and share by `Arc`.
pub struct InMemoryJobRegistry {
    jobs: RwLock<HashMap<String, Arc<Job>>>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryJobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRegistry for InMemoryJobRegistry {
    async fn create_job(
        &self,
        id: String,
        album: AlbumRef,
        options: JobOptions,
    ) -> Result<Arc<Job>, JobsError> {
        if id.trim().is_empty() {
            return Err(JobsError::EmptyId);
        }
        let mut guard = self.jobs.write().await;
        if guard.contains_key(&id) {
            return Err(JobsError::DuplicateJob(id));
        }
        let job = Arc::new(Job::new(id.clone(), album, options));
        guard.insert(id, Arc::clone(&job));
        tracing::info!(job_id = %job.id(), album_id = %job.album().id, "job created");
        Ok(job)
    }

    async fn get_job(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.read().await.get(id).cloned()
    }

    async fn delete_job(&self, id: &str) -> Option<Arc<Job>> {
        let removed = self.jobs.write().await.remove(id);
        if removed.is_some() {
            tracing::info!(job_id = %id, "job deleted");
        }
        removed
    }

    async fn list_jobs(&self) -> Vec<Arc<Job>> {
        let mut jobs: Vec<Arc<Job>> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| {
            a.started_at()
                .cmp(&b.started_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        jobs
    }

    async fn prune_finished(&self, older_than: Duration) -> usize {
        let retention =
            chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::days(36500));
        let cutoff = Utc::now() - retention;
        let candidates: Vec<Arc<Job>> = self.jobs.read().await.values().cloned().collect();
        let expired: Vec<Arc<Job>> = candidates
            .into_iter()
            .filter(|job| job.status().is_terminal())
            .filter(|job| job.completed_at().is_some_and(|at| at < cutoff))
            .collect();
        if expired.is_empty() {
            return 0;
        }
        let mut guard = self.jobs.write().await;
        let mut pruned = 0;
        for job in expired {
            if guard.get(job.id()).is_some_and(|current| Arc::ptr_eq(current, &job)) {
                guard.remove(job.id());
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::debug!(pruned, "finished jobs pruned");
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sort_types::JobStatus;

    fn album() -> AlbumRef {
        AlbumRef::new("alb1", "Trip")
    }

    #[tokio::test]
    async fn create_then_get() {
        let registry = InMemoryJobRegistry::new();
        let job = registry
            .create_job("j1".into(), album(), JobOptions::default())
            .await
            .unwrap();
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.progress(), (0, 0));

        let fetched = registry.get_job("j1").await.unwrap();
        assert!(Arc::ptr_eq(&job, &fetched));
        assert!(registry.get_job("missing").await.is_none());
    }

    #[tokio::test]
    async fn duplicate_and_empty_ids_are_rejected() {
        let registry = InMemoryJobRegistry::new();
        registry
            .create_job("j1".into(), album(), JobOptions::default())
            .await
            .unwrap();
        let dup = registry
            .create_job("j1".into(), album(), JobOptions::default())
            .await;
        assert!(matches!(dup, Err(JobsError::DuplicateJob(id)) if id == "j1"));

        let empty = registry
            .create_job(" ".into(), album(), JobOptions::default())
            .await;
        assert!(matches!(empty, Err(JobsError::EmptyId)));
    }

    #[tokio::test]
    async fn generated_ids_are_unique() {
        let registry = InMemoryJobRegistry::new();
        let a = registry
            .create_job_with_generated_id(album(), JobOptions::default())
            .await
            .unwrap();
        let b = registry
            .create_job_with_generated_id(album(), JobOptions::default())
            .await
            .unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.list_jobs().await.len(), 2);
    }

    #[tokio::test]
    async fn finished_job_is_found_not_missing() {
        let registry = InMemoryJobRegistry::new();
        let job = registry
            .create_job("j1".into(), album(), JobOptions::default())
            .await
            .unwrap();
        job.cancel();
        let fetched = registry.get_job("j1").await.unwrap();
        assert_eq!(fetched.status(), JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn delete_keeps_listeners_and_job_alive() {
        let registry = InMemoryJobRegistry::new();
        let job = registry
            .create_job("j1".into(), album(), JobOptions::default())
            .await
            .unwrap();
        let mut listener = job.add_listener();
        job.set_running();

        let removed = registry.delete_job("j1").await.unwrap();
        assert!(Arc::ptr_eq(&job, &removed));
        assert!(registry.get_job("j1").await.is_none());
        assert!(registry.delete_job("j1").await.is_none());

        assert_eq!(job.status(), JobStatus::Running);
        assert!(!job.is_cancelled());
        job.increment();
        assert_eq!(listener.try_recv().unwrap().kind, "running");
        assert_eq!(listener.try_recv().unwrap().kind, "progress");
    }

    #[tokio::test]
    async fn list_is_a_stable_snapshot() {
        let registry = InMemoryJobRegistry::new();
        for id in ["a", "b", "c"] {
            registry
                .create_job(id.into(), album(), JobOptions::default())
                .await
                .unwrap();
        }
        let listed = registry.list_jobs().await;
        registry.delete_job("b").await;
        registry
            .create_job("d".into(), album(), JobOptions::default())
            .await
            .unwrap();

        let ids: Vec<&str> = listed.iter().map(|j| j.id()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&"b"));
        assert!(!ids.contains(&"d"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_and_reads() {
        let registry = Arc::new(InMemoryJobRegistry::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let id = format!("job-{}", i);
                registry
                    .create_job(id.clone(), album(), JobOptions::default())
                    .await
                    .unwrap();
                assert!(registry.get_job(&id).await.is_some());
                registry.list_jobs().await.len()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap() >= 1);
        }
        assert_eq!(registry.list_jobs().await.len(), 32);
    }

    #[tokio::test]
    async fn prune_removes_only_old_terminal_jobs() {
        let registry = InMemoryJobRegistry::new();
        let done = registry
            .create_job("done".into(), album(), JobOptions::default())
            .await
            .unwrap();
        let running = registry
            .create_job("running".into(), album(), JobOptions::default())
            .await
            .unwrap();
        done.set_running();
        done.set_completed(serde_json::json!({}));
        running.set_running();

        assert_eq!(registry.prune_finished(Duration::from_secs(3600)).await, 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(registry.prune_finished(Duration::ZERO).await, 1);
        assert!(registry.get_job("done").await.is_none());
        assert!(registry.get_job("running").await.is_some());
    }
}
