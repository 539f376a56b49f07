//! REST client for the photo service (`/api/v1/...`), with paging and retries.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use sort_types::{AlbumRef, Photo, PhotoPage, PhotoService, PhotoServiceError, PhotoUpdate};
use std::time::Duration;

/// Page size used when walking the whole library.
const PAGE_SIZE: usize = 100;
const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
struct AlbumResponse {
    #[serde(alias = "UID")]
    id: String,
    #[serde(alias = "Title")]
    title: String,
}

/// Photo service reached over HTTP with an optional bearer token.
pub struct HttpPhotoService {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl HttpPhotoService {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            max_attempts: DEFAULT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn from_env() -> Self {
        let url = std::env::var("PHOTO_API_URL")
            .unwrap_or_else(|_| "http://localhost:2342".to_string());
        let token = std::env::var("PHOTO_API_TOKEN").ok();
        Self::new(url, token)
    }

    /// Attempts per request and the first backoff delay (doubled per retry).
    pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Send the request built by `build`, retrying transport errors and 5xx responses.
    /// 404 is returned to the caller, which decides what "missing" means.
    async fn execute<F>(&self, what: &str, build: F) -> Result<reqwest::Response, PhotoServiceError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut delay = self.retry_delay;
        let mut attempt = 1;
        loop {
            let mut req = build(&self.client);
            if let Some(ref token) = self.token {
                req = req.bearer_auth(token);
            }
            let err = match req.send().await {
                Ok(res) if res.status().is_success() || res.status() == StatusCode::NOT_FOUND => {
                    return Ok(res)
                }
                Ok(res) => {
                    let status = res.status().as_u16();
                    let body = res.text().await.unwrap_or_default();
                    PhotoServiceError::Status { status, body }
                }
                Err(e) => PhotoServiceError::Transport(e.to_string()),
            };
            if attempt >= self.max_attempts || !err.is_retryable() {
                return Err(err);
            }
            tracing::warn!(what, attempt, error = %err, "photo service call failed; retrying");
            tokio::time::sleep(delay).await;
            delay *= 2;
            attempt += 1;
        }
    }

    async fn photos_page(
        &self,
        path: &str,
        offset: usize,
        count: usize,
    ) -> Result<PhotoPage, PhotoServiceError> {
        let url = self.url(path);
        let res = self
            .execute("list photos", |client| {
                client
                    .get(&url)
                    .query(&[("offset", offset), ("count", count)])
            })
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(PhotoServiceError::NotFound(path.to_string()));
        }
        let photos: Vec<Photo> = res
            .json()
            .await
            .map_err(|e| PhotoServiceError::Parse(e.to_string()))?;
        let has_more = photos.len() >= count && count > 0;
        Ok(PhotoPage { photos, has_more })
    }
}

#[async_trait]
impl PhotoService for HttpPhotoService {
    async fn get_album(&self, album_id: &str) -> Result<Option<AlbumRef>, PhotoServiceError> {
        let url = self.url(&format!("/albums/{}", album_id));
        let res = self.execute("get album", |client| client.get(&url)).await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let album: AlbumResponse = res
            .json()
            .await
            .map_err(|e| PhotoServiceError::Parse(e.to_string()))?;
        Ok(Some(AlbumRef::new(album.id, album.title)))
    }

    async fn list_album_photos(
        &self,
        album_id: &str,
        offset: usize,
        count: usize,
    ) -> Result<PhotoPage, PhotoServiceError> {
        self.photos_page(&format!("/albums/{}/photos", album_id), offset, count)
            .await
    }

    async fn count_photos(&self) -> Result<u64, PhotoServiceError> {
        let mut offset = 0;
        let mut total = 0u64;
        loop {
            let page = self.photos_page("/photos", offset, PAGE_SIZE).await?;
            total += page.photos.len() as u64;
            offset += page.photos.len();
            if !page.has_more {
                return Ok(total);
            }
        }
    }

    async fn update_photo(
        &self,
        photo_id: &str,
        update: &PhotoUpdate,
    ) -> Result<(), PhotoServiceError> {
        if update.is_empty() {
            return Ok(());
        }
        let url = self.url(&format!("/photos/{}", photo_id));
        let res = self
            .execute("update photo", |client| client.put(&url).json(update))
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(PhotoServiceError::NotFound(photo_id.to_string()));
        }
        Ok(())
    }
}
