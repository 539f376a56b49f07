//! The worker that sorts one album: analyse each photo with a vision provider, write the
//! description and date back to the photo service, and index the description embedding.

use crate::{ProviderRegistry, StatsService};
use async_trait::async_trait;
use chrono::Utc;
use sort_jobs::{CancellationToken, Job, JobEvent, SortWorker, WorkerError};
use sort_types::{
    EmbeddingRecord, EmbeddingRepository, Embedder, Photo, PhotoAnalysis, PhotoService,
    PhotoUpdate, ProviderError, SortMode, VisionProvider,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Photos requested per listing call.
pub const PAGE_SIZE: usize = 100;
/// Photos sent per provider call in batch mode.
pub const BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Updated,
    Analyzed,
    Failed,
    Cancelled,
}

#[derive(Debug, Default)]
struct Tally {
    updated: u64,
    failed: u64,
}

impl Tally {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Updated => self.updated += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Analyzed | Outcome::Cancelled => {}
        }
    }
}

/// `SortWorker` that processes the photos of `job.album()`.
#[derive(Clone)]
pub struct AlbumSorter {
    photos: Arc<dyn PhotoService>,
    providers: Arc<ProviderRegistry>,
    embedder: Arc<dyn Embedder>,
    embeddings: Arc<dyn EmbeddingRepository>,
    stats: Option<Arc<StatsService>>,
}

impl AlbumSorter {
    pub fn new(
        photos: Arc<dyn PhotoService>,
        providers: Arc<ProviderRegistry>,
        embedder: Arc<dyn Embedder>,
        embeddings: Arc<dyn EmbeddingRepository>,
    ) -> Self {
        Self {
            photos,
            providers,
            embedder,
            embeddings,
            stats: None,
        }
    }

    /// Invalidate these statistics whenever a job may have changed the library.
    pub fn with_stats(mut self, stats: Arc<StatsService>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Photos of the album, at most `limit`. `None` when cancelled while paging.
    async fn collect_photos(
        &self,
        job: &Job,
        token: &CancellationToken,
    ) -> Result<Option<Vec<Photo>>, WorkerError> {
        let limit = job.options().limit.unwrap_or(usize::MAX);
        let mut photos = Vec::new();
        let mut offset = 0;
        loop {
            if token.is_cancelled() {
                return Ok(None);
            }
            let count = PAGE_SIZE.min(limit - photos.len());
            let page = self
                .photos
                .list_album_photos(&job.album().id, offset, count)
                .await?;
            let fetched = page.photos.len();
            offset += fetched;
            photos.extend(page.photos);
            if !page.has_more || fetched == 0 || photos.len() >= limit {
                break;
            }
        }
        photos.truncate(limit);
        Ok(Some(photos))
    }

    async fn run_individual(
        &self,
        job: &Arc<Job>,
        provider: Arc<dyn VisionProvider>,
        photos: Vec<Photo>,
        token: &CancellationToken,
    ) -> Result<Tally, WorkerError> {
        let semaphore = Arc::new(Semaphore::new(job.options().concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut tally = Tally::default();

        for photo in photos {
            if token.is_cancelled() {
                break;
            }
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| WorkerError::Other(e.to_string()))?;
            let this = self.clone();
            let task_job = Arc::clone(job);
            let provider = Arc::clone(&provider);
            let token = token.clone();
            tasks.spawn(async move {
                let _permit = permit;
                this.process_one(&task_job, provider.as_ref(), photo, &token)
                    .await
            });
        }
        while let Some(done) = tasks.join_next().await {
            tally.record(Self::joined(job, done));
        }
        Ok(tally)
    }

    fn joined(job: &Job, done: Result<Outcome, tokio::task::JoinError>) -> Outcome {
        done.unwrap_or_else(|e| {
            tracing::error!(job_id = %job.id(), error = %e, "photo task crashed");
            Outcome::Failed
        })
    }

    async fn run_batches(
        &self,
        job: &Job,
        provider: Arc<dyn VisionProvider>,
        photos: Vec<Photo>,
        token: &CancellationToken,
    ) -> Tally {
        let mut tally = Tally::default();
        for chunk in photos.chunks(BATCH_SIZE) {
            if token.is_cancelled() {
                break;
            }
            let analyses = provider.analyze_batch(chunk).await.and_then(|analyses| {
                if analyses.len() == chunk.len() {
                    Ok(analyses)
                } else {
                    Err(ProviderError::Parse(format!(
                        "{} analyses for {} photos",
                        analyses.len(),
                        chunk.len()
                    )))
                }
            });
            match analyses {
                Ok(analyses) => {
                    for (photo, analysis) in chunk.iter().zip(analyses) {
                        let outcome = self.apply(job, photo, analysis, token).await;
                        if outcome == Outcome::Cancelled {
                            return tally;
                        }
                        tally.record(outcome);
                        job.increment();
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id(), size = chunk.len(), error = %e, "batch analysis failed");
                    for photo in chunk {
                        Self::photo_failed(job, &photo.id, &e.to_string());
                        tally.record(Outcome::Failed);
                        job.increment();
                    }
                }
            }
        }
        tally
    }

    async fn process_one(
        &self,
        job: &Job,
        provider: &dyn VisionProvider,
        photo: Photo,
        token: &CancellationToken,
    ) -> Outcome {
        if token.is_cancelled() {
            return Outcome::Cancelled;
        }
        let outcome = match provider.analyze(&photo).await {
            Ok(analysis) => self.apply(job, &photo, analysis, token).await,
            Err(e) => {
                Self::photo_failed(job, &photo.id, &e.to_string());
                Outcome::Failed
            }
        };
        if outcome != Outcome::Cancelled {
            job.increment();
        }
        outcome
    }

    /// Write one analysis back, unless dry-running, and announce it.
    async fn apply(
        &self,
        job: &Job,
        photo: &Photo,
        analysis: PhotoAnalysis,
        token: &CancellationToken,
    ) -> Outcome {
        if job.options().dry_run {
            Self::photo_done(job, &analysis, false);
            return Outcome::Analyzed;
        }
        if token.is_cancelled() {
            return Outcome::Cancelled;
        }
        let update = PhotoUpdate {
            description: Some(analysis.description.clone()),
            taken_at: if job.options().force_date || photo.taken_at.is_none() {
                analysis.taken_at
            } else {
                None
            },
        };
        if let Err(e) = self.photos.update_photo(&photo.id, &update).await {
            Self::photo_failed(job, &photo.id, &e.to_string());
            return Outcome::Failed;
        }
        if token.is_cancelled() {
            return Outcome::Cancelled;
        }
        if let Err(e) = self.index(&analysis).await {
            Self::photo_failed(job, &photo.id, &e.to_string());
            return Outcome::Failed;
        }
        Self::photo_done(job, &analysis, true);
        Outcome::Updated
    }

    async fn index(&self, analysis: &PhotoAnalysis) -> Result<(), WorkerError> {
        let vector = self.embedder.embed(&analysis.description).await?;
        self.embeddings
            .upsert(EmbeddingRecord {
                photo_id: analysis.photo_id.clone(),
                vector,
                model: self.embedder.model().to_string(),
                updated_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    fn photo_done(job: &Job, analysis: &PhotoAnalysis, updated: bool) {
        job.send_event(JobEvent::new("photo").with_data(serde_json::json!({
            "photo_id": analysis.photo_id,
            "description": analysis.description,
            "taken_at": analysis.taken_at,
            "labels": analysis.labels,
            "updated": updated,
        })));
    }

    fn photo_failed(job: &Job, photo_id: &str, error: &str) {
        tracing::warn!(job_id = %job.id(), photo_id, error, "photo failed");
        job.send_event(
            JobEvent::new("photo_failed")
                .with_message(error)
                .with_data(serde_json::json!({ "photo_id": photo_id })),
        );
    }
}

#[async_trait]
impl SortWorker for AlbumSorter {
    async fn run(&self, job: Arc<Job>) -> Result<(), WorkerError> {
        let token = job.cancellation_token();
        if token.is_cancelled() {
            return Ok(());
        }
        job.set_running();

        let options = job.options().clone();
        let provider = self
            .providers
            .get(&options.provider)
            .ok_or_else(|| WorkerError::Other(format!("unknown provider: {}", options.provider)))?;

        let photos = match self.collect_photos(&job, &token).await {
            Ok(Some(photos)) => photos,
            Ok(None) => return Ok(()),
            Err(_) if token.is_cancelled() => return Ok(()),
            Err(e) => return Err(e),
        };
        job.set_total(photos.len() as u64);
        tracing::info!(
            job_id = %job.id(),
            album_id = %job.album().id,
            photos = photos.len(),
            mode = ?options.mode,
            dry_run = options.dry_run,
            "sorting album"
        );

        let tally = match options.mode {
            SortMode::Individual => self.run_individual(&job, provider, photos, &token).await?,
            SortMode::Batch => self.run_batches(&job, provider, photos, &token).await,
        };
        if token.is_cancelled() {
            tracing::info!(job_id = %job.id(), "sort stopped after cancellation");
            return Ok(());
        }

        // Invalidate first so readers that see Completed also see fresh stats.
        if !options.dry_run {
            if let Some(ref stats) = self.stats {
                stats.invalidate().await;
            }
        }
        let (processed, _) = job.progress();
        job.set_completed(serde_json::json!({
            "processed": processed,
            "updated": tally.updated,
            "failed": tally.failed,
            "dry_run": options.dry_run,
        }));
        Ok(())
    }
}
