//! In-memory photo service (process lifetime only).

use async_trait::async_trait;
use sort_types::{AlbumRef, Photo, PhotoPage, PhotoService, PhotoServiceError, PhotoUpdate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

struct Album {
    album: AlbumRef,
    photo_ids: Vec<String>,
}

/// Photo service kept in memory. Records every applied update and can be told to fail
/// album listings.
pub struct InMemoryPhotoService {
    albums: RwLock<HashMap<String, Album>>,
    photos: RwLock<HashMap<String, Photo>>,
    updates: RwLock<Vec<(String, PhotoUpdate)>>,
    fail_listing: AtomicBool,
    count_calls: AtomicUsize,
}

impl InMemoryPhotoService {
    pub fn new() -> Self {
        Self {
            albums: RwLock::new(HashMap::new()),
            photos: RwLock::new(HashMap::new()),
            updates: RwLock::new(Vec::new()),
            fail_listing: AtomicBool::new(false),
            count_calls: AtomicUsize::new(0),
        }
    }

    /// Add (or replace) an album together with its photos.
    pub async fn add_album(&self, album: AlbumRef, photos: Vec<Photo>) {
        let photo_ids = photos.iter().map(|p| p.id.clone()).collect();
        {
            let mut guard = self.photos.write().await;
            for photo in photos {
                guard.insert(photo.id.clone(), photo);
            }
        }
        self.albums.write().await.insert(
            album.id.clone(),
            Album { album, photo_ids },
        );
    }

    pub async fn photo(&self, photo_id: &str) -> Option<Photo> {
        self.photos.read().await.get(photo_id).cloned()
    }

    /// Updates applied so far, in order.
    pub async fn updates(&self) -> Vec<(String, PhotoUpdate)> {
        self.updates.read().await.clone()
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// How many times `count_photos` ran.
    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryPhotoService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PhotoService for InMemoryPhotoService {
    async fn get_album(&self, album_id: &str) -> Result<Option<AlbumRef>, PhotoServiceError> {
        Ok(self
            .albums
            .read()
            .await
            .get(album_id)
            .map(|a| a.album.clone()))
    }

    async fn list_album_photos(
        &self,
        album_id: &str,
        offset: usize,
        count: usize,
    ) -> Result<PhotoPage, PhotoServiceError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(PhotoServiceError::Status {
                status: 500,
                body: "listing disabled".to_string(),
            });
        }
        let (ids, has_more) = {
            let albums = self.albums.read().await;
            let album = albums
                .get(album_id)
                .ok_or_else(|| PhotoServiceError::NotFound(album_id.to_string()))?;
            let ids: Vec<String> = album.photo_ids.iter().skip(offset).take(count).cloned().collect();
            let has_more = album.photo_ids.len() > offset + ids.len();
            (ids, has_more)
        };
        let photos_guard = self.photos.read().await;
        let photos = ids
            .iter()
            .filter_map(|id| photos_guard.get(id).cloned())
            .collect();
        Ok(PhotoPage { photos, has_more })
    }

    async fn count_photos(&self) -> Result<u64, PhotoServiceError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.photos.read().await.len() as u64)
    }

    async fn update_photo(
        &self,
        photo_id: &str,
        update: &PhotoUpdate,
    ) -> Result<(), PhotoServiceError> {
        {
            let mut photos = self.photos.write().await;
            let photo = photos
                .get_mut(photo_id)
                .ok_or_else(|| PhotoServiceError::NotFound(photo_id.to_string()))?;
            if let Some(ref description) = update.description {
                photo.description = Some(description.clone());
            }
            if let Some(taken_at) = update.taken_at {
                photo.taken_at = Some(taken_at);
            }
        }
        self.updates
            .write()
            .await
            .push((photo_id.to_string(), update.clone()));
        Ok(())
    }
}
