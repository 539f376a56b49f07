//! Library statistics, served from a TTL cache.

use sort_cache::TtlCache;
use sort_types::{
    EmbeddingRepository, FaceRepository, PhotoService, PhotoServiceError, PhotoStats,
    RepositoryError,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("photo service: {0}")]
    PhotoService(#[from] PhotoServiceError),
    #[error("repository: {0}")]
    Repository(#[from] RepositoryError),
}

/// Aggregates counts from the photo service and the repositories. Counting the library
/// pages through every photo, so results are cached until the TTL runs out or a sort job
/// writes changes.
pub struct StatsService {
    photos: Arc<dyn PhotoService>,
    embeddings: Arc<dyn EmbeddingRepository>,
    faces: Arc<dyn FaceRepository>,
    cache: TtlCache<PhotoStats>,
}

impl StatsService {
    pub fn new(
        photos: Arc<dyn PhotoService>,
        embeddings: Arc<dyn EmbeddingRepository>,
        faces: Arc<dyn FaceRepository>,
        ttl: Duration,
    ) -> Self {
        Self {
            photos,
            embeddings,
            faces,
            cache: TtlCache::new(ttl),
        }
    }

    pub async fn photo_stats(&self) -> Result<PhotoStats, StatsError> {
        if let Some(stats) = self.cache.get().await {
            tracing::debug!("photo stats served from cache");
            return Ok(stats);
        }
        let generation = self.cache.generation().await;
        let stats = PhotoStats {
            total_photos: self.photos.count_photos().await?,
            analyzed_photos: self.embeddings.count().await?,
            detected_faces: self.faces.count().await?,
        };
        if !self.cache.set_if_current(stats, generation).await {
            tracing::debug!("photo stats invalidated while counting; not cached");
            return Ok(stats);
        }
        tracing::debug!(
            total = stats.total_photos,
            analyzed = stats.analyzed_photos,
            faces = stats.detected_faces,
            "photo stats recomputed"
        );
        Ok(stats)
    }

    /// Drop the cached value; the next `photo_stats` recomputes.
    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }
}
