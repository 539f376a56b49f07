//! Mock providers for tests: deterministic output, no network.

use chrono::{TimeZone, Utc};
use sort_types::{Embedder, EmbedderError, Photo, PhotoAnalysis, ProviderError, VisionProvider};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const DIM: usize = 64;

/// Mock embedder that returns deterministic unit-length vectors from text hash.
pub struct MockEmbedder;

impl MockEmbedder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Embedder for MockEmbedder {
    fn model(&self) -> &str {
        "mock-embedding"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            let h = hasher.finish();
            let mut v = Vec::with_capacity(DIM);
            for i in 0..DIM {
                let x = ((h.wrapping_add(i as u64)).wrapping_mul(0x9e3779b97f4a7c15) >> 32) as f32
                    / u32::MAX as f32;
                v.push(x * 2.0 - 1.0);
            }
            let norm: f64 = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
            if norm > 0.0 {
                for x in &mut v {
                    *x = (*x as f64 / norm) as f32;
                }
            }
            out.push(v);
        }
        Ok(out)
    }
}

/// Mock vision provider: describes each photo from its title and dates it 2020-06-01.
pub struct MockVisionProvider {
    name: String,
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockVisionProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failing: HashSet::new(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Make `analyze` fail for this photo id.
    pub fn failing_on(mut self, photo_id: impl Into<String>) -> Self {
        self.failing.insert(photo_id.into());
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of provider calls made (a batch counts once).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn describe(photo: &Photo) -> PhotoAnalysis {
        PhotoAnalysis {
            photo_id: photo.id.clone(),
            description: format!("{} (mock)", photo.title),
            taken_at: Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).single(),
            labels: vec!["mock".to_string()],
        }
    }

    async fn call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check(&self, photo: &Photo) -> Result<(), ProviderError> {
        if self.failing.contains(&photo.id) {
            return Err(ProviderError::Api(format!("mock failure for {}", photo.id)));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl VisionProvider for MockVisionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, photo: &Photo) -> Result<PhotoAnalysis, ProviderError> {
        self.call().await;
        self.check(photo)?;
        Ok(Self::describe(photo))
    }

    async fn analyze_batch(&self, photos: &[Photo]) -> Result<Vec<PhotoAnalysis>, ProviderError> {
        self.call().await;
        for photo in photos {
            self.check(photo)?;
        }
        Ok(photos.iter().map(Self::describe).collect())
    }
}
