//! In-memory repositories (brute-force similarity search).

use async_trait::async_trait;
use sort_types::{
    EmbeddingRecord, EmbeddingRepository, FaceRecord, FaceRepository, RepositoryError,
    SimilarPhoto,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cosine similarity; 0.0 for empty, mismatched, or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

/// Rank `candidates` against `query`, best first, skipping `exclude`.
pub(crate) fn rank_similar<'a>(
    query: &[f32],
    exclude: &str,
    candidates: impl Iterator<Item = (&'a str, &'a [f32])>,
    top_k: usize,
) -> Vec<SimilarPhoto> {
    let mut scored: Vec<SimilarPhoto> = candidates
        .filter(|(id, _)| *id != exclude)
        .map(|(id, vector)| SimilarPhoto {
            photo_id: id.to_string(),
            score: cosine_similarity(query, vector),
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(top_k);
    scored
}

/// Embeddings keyed by photo id.
pub struct InMemoryEmbeddingStore {
    store: Arc<RwLock<HashMap<String, EmbeddingRecord>>>,
}

impl InMemoryEmbeddingStore {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryEmbeddingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingRepository for InMemoryEmbeddingStore {
    async fn upsert(&self, record: EmbeddingRecord) -> Result<(), RepositoryError> {
        self.store
            .write()
            .await
            .insert(record.photo_id.clone(), record);
        Ok(())
    }

    async fn get(&self, photo_id: &str) -> Result<Option<EmbeddingRecord>, RepositoryError> {
        Ok(self.store.read().await.get(photo_id).cloned())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.store.read().await.len() as u64)
    }

    async fn similar(
        &self,
        photo_id: &str,
        top_k: usize,
    ) -> Result<Vec<SimilarPhoto>, RepositoryError> {
        let guard = self.store.read().await;
        let Some(query) = guard.get(photo_id) else {
            return Ok(Vec::new());
        };
        Ok(rank_similar(
            &query.vector,
            photo_id,
            guard
                .values()
                .map(|r| (r.photo_id.as_str(), r.vector.as_slice())),
            top_k,
        ))
    }
}

/// Faces keyed by face id.
pub struct InMemoryFaceStore {
    faces: Arc<RwLock<HashMap<String, FaceRecord>>>,
}

impl InMemoryFaceStore {
    pub fn new() -> Self {
        Self {
            faces: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryFaceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FaceRepository for InMemoryFaceStore {
    async fn add_faces(&self, faces: &[FaceRecord]) -> Result<(), RepositoryError> {
        let mut guard = self.faces.write().await;
        for face in faces {
            guard.insert(face.id.clone(), face.clone());
        }
        Ok(())
    }

    async fn faces_for_photo(&self, photo_id: &str) -> Result<Vec<FaceRecord>, RepositoryError> {
        let guard = self.faces.read().await;
        let mut faces: Vec<FaceRecord> = guard
            .values()
            .filter(|f| f.photo_id == photo_id)
            .cloned()
            .collect();
        faces.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(faces)
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.faces.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(photo_id: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            photo_id: photo_id.to_string(),
            vector,
            model: "test".to_string(),
            updated_at: Utc::now(),
        }
    }

    fn face(id: &str, photo_id: &str) -> FaceRecord {
        FaceRecord {
            id: id.to_string(),
            photo_id: photo_id.to_string(),
            person: None,
            x: 0.1,
            y: 0.2,
            width: 0.3,
            height: 0.3,
        }
    }

    #[test]
    fn cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn upsert_replaces_and_counts_photos() {
        let store = InMemoryEmbeddingStore::new();
        store.upsert(record("p1", vec![1.0, 0.0])).await.unwrap();
        store.upsert(record("p1", vec![0.0, 1.0])).await.unwrap();
        store.upsert(record("p2", vec![1.0, 0.0])).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(
            store.get("p1").await.unwrap().unwrap().vector,
            vec![0.0, 1.0]
        );
        assert!(store.get("p9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn similar_ranks_and_excludes_self() {
        let store = InMemoryEmbeddingStore::new();
        store.upsert(record("q", vec![1.0, 0.0])).await.unwrap();
        store.upsert(record("near", vec![0.9, 0.1])).await.unwrap();
        store.upsert(record("far", vec![0.0, 1.0])).await.unwrap();

        let hits = store.similar("q", 5).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.photo_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);

        assert_eq!(store.similar("q", 1).await.unwrap().len(), 1);
        assert!(store.similar("unknown", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn faces_by_photo_and_count() {
        let store = InMemoryFaceStore::new();
        store
            .add_faces(&[face("f2", "p1"), face("f1", "p1"), face("f3", "p2")])
            .await
            .unwrap();
        let faces = store.faces_for_photo("p1").await.unwrap();
        assert_eq!(
            faces.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
            vec!["f1", "f2"]
        );
        assert_eq!(store.count().await.unwrap(), 3);
    }
}
