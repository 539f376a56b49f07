//! Traits for the external collaborators: photo service, AI providers, repositories.

use crate::{
    AlbumRef, EmbeddingRecord, FaceRecord, Photo, PhotoAnalysis, PhotoPage, PhotoUpdate,
    SimilarPhoto,
};
use async_trait::async_trait;

/// External photo-management service.
#[async_trait]
pub trait PhotoService: Send + Sync {
    /// Look up an album; `Ok(None)` when the service does not know it.
    async fn get_album(&self, album_id: &str) -> Result<Option<AlbumRef>, PhotoServiceError>;

    /// One page of the photos in an album, ordered as the service orders them.
    async fn list_album_photos(
        &self,
        album_id: &str,
        offset: usize,
        count: usize,
    ) -> Result<PhotoPage, PhotoServiceError>;

    /// Number of photos in the whole library.
    async fn count_photos(&self) -> Result<u64, PhotoServiceError>;

    /// Write back the given fields of one photo.
    async fn update_photo(&self, photo_id: &str, update: &PhotoUpdate)
        -> Result<(), PhotoServiceError>;
}

/// AI provider that describes and dates photos.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Provider name used in `JobOptions::provider`.
    fn name(&self) -> &str;

    /// Analyse a single photo.
    async fn analyze(&self, photo: &Photo) -> Result<PhotoAnalysis, ProviderError>;

    /// Analyse several photos in one call: one analysis per photo, in the same order.
    /// Default implementation calls `analyze` in turn.
    async fn analyze_batch(&self, photos: &[Photo]) -> Result<Vec<PhotoAnalysis>, ProviderError> {
        let mut out = Vec::with_capacity(photos.len());
        for photo in photos {
            out.push(self.analyze(photo).await?);
        }
        Ok(out)
    }
}

/// Embedder: text -> vector(s).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier stored with each embedding.
    fn model(&self) -> &str;

    /// Embed a single text. Default implementation uses embed_batch.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let v = self.embed_batch(&[text.to_string()]).await?;
        v.into_iter().next().ok_or(EmbedderError::EmptyResponse)
    }

    /// Embed multiple texts.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError>;
}

/// Relational store for description embeddings.
#[async_trait]
pub trait EmbeddingRepository: Send + Sync {
    async fn upsert(&self, record: EmbeddingRecord) -> Result<(), RepositoryError>;

    async fn get(&self, photo_id: &str) -> Result<Option<EmbeddingRecord>, RepositoryError>;

    /// Number of photos with a stored embedding.
    async fn count(&self) -> Result<u64, RepositoryError>;

    /// Photos whose embeddings are closest to `photo_id`'s, best first, excluding itself.
    async fn similar(
        &self,
        photo_id: &str,
        top_k: usize,
    ) -> Result<Vec<SimilarPhoto>, RepositoryError>;
}

/// Relational store for detected faces.
#[async_trait]
pub trait FaceRepository: Send + Sync {
    async fn add_faces(&self, faces: &[FaceRecord]) -> Result<(), RepositoryError>;

    async fn faces_for_photo(&self, photo_id: &str) -> Result<Vec<FaceRecord>, RepositoryError>;

    /// Number of stored faces.
    async fn count(&self) -> Result<u64, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PhotoServiceError {
    #[error("photo service request failed: {0}")]
    Transport(String),
    #[error("photo service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("photo service response could not be parsed: {0}")]
    Parse(String),
    #[error("photo not found: {0}")]
    NotFound(String),
}

impl PhotoServiceError {
    /// Transport failures and 5xx responses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            PhotoServiceError::Transport(_) => true,
            PhotoServiceError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider error: {0}")]
    Other(String),
    #[error("provider API error: {0}")]
    Api(String),
    #[error("provider response could not be parsed: {0}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    #[error("embedder error: {0}")]
    Other(String),
    #[error("empty response")]
    EmptyResponse,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("repository error: {0}")]
    Other(String),
}
