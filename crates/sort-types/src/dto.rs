//! Photo, statistics, and response DTOs shared by the API and the collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Album reference: id in the photo service plus the display title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRef {
    pub id: String,
    pub title: String,
}

impl AlbumRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// One photo as returned by the photo service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub taken_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: Option<String>,
    /// URL the AI provider can fetch a thumbnail from.
    #[serde(default)]
    pub thumb_url: Option<String>,
}

/// One page of an album listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhotoPage {
    pub photos: Vec<Photo>,
    /// True when the service may have more photos after this page.
    #[serde(default)]
    pub has_more: bool,
}

/// Fields written back to the photo service; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhotoUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
}

impl PhotoUpdate {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.taken_at.is_none()
    }
}

/// What an AI provider inferred about one photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoAnalysis {
    pub photo_id: String,
    pub description: String,
    #[serde(default)]
    pub taken_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Stored embedding of a photo description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub photo_id: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub updated_at: DateTime<Utc>,
}

/// Detected face; the box is relative (0..1) to the photo's displayed orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub id: String,
    pub photo_id: String,
    #[serde(default)]
    pub person: Option<String>,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Similarity hit (photo id + cosine score).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarPhoto {
    pub photo_id: String,
    pub score: f64,
}

/// Aggregate counts behind the statistics endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoStats {
    pub total_photos: u64,
    pub analyzed_photos: u64,
    pub detected_faces: u64,
}

/// Base response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseResponse<T> {
    #[serde(default = "default_code")]
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn default_code() -> i32 {
    200
}

impl<T> BaseResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 200,
            message: "Success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_omits_data() {
        let res: BaseResponse<PhotoStats> = BaseResponse::error(404, "Job not found");
        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["code"], 404);
        assert!(json.get("data").is_none());
    }

    #[test]
    fn photo_update_empty() {
        assert!(PhotoUpdate::default().is_empty());
        let update = PhotoUpdate {
            description: Some("beach".into()),
            taken_at: None,
        };
        assert!(!update.is_empty());
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("taken_at").is_none());
    }
}
