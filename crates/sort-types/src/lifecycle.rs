//! Job lifecycle types: status, options, events, and the serializable job snapshot.

use crate::AlbumRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound for `JobOptions::concurrency`.
pub const MAX_CONCURRENCY: usize = 16;

/// Status of a sort job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, Failed and Cancelled admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How photos are sent to the AI provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// One provider call per photo.
    #[default]
    Individual,
    /// Several photos per provider call.
    Batch,
}

/// Options fixed at job creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Analyse but never write back to the photo service or the repositories.
    #[serde(default)]
    pub dry_run: bool,
    /// Maximum number of photos to process; `None` processes the whole album.
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub mode: SortMode,
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Overwrite dates the photo service already has.
    #[serde(default)]
    pub force_date: bool,
    /// Photos analysed in parallel (individual mode).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_concurrency() -> usize {
    1
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            limit: None,
            mode: SortMode::default(),
            provider: default_provider(),
            force_date: false,
            concurrency: default_concurrency(),
        }
    }
}

impl JobOptions {
    /// Checks option values that do not depend on external state.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.provider.trim().is_empty() {
            return Err(ValidationError::InvalidOptions(
                "provider must not be empty".to_string(),
            ));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(ValidationError::InvalidOptions(format!(
                "concurrency must be between 1 and {}",
                MAX_CONCURRENCY
            )));
        }
        if self.limit == Some(0) {
            return Err(ValidationError::InvalidOptions(
                "limit must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Rejections raised before a job is created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid album: {0}")]
    InvalidAlbum(String),
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// Event broadcast to the listeners of a job. Serialized as
/// `{"type": .., "message": .., "data": ..}` with absent fields omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JobEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: None,
            data: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn progress(processed: u64, total: u64) -> Self {
        Self::new("progress").with_data(serde_json::json!({
            "processed": processed,
            "total": total,
        }))
    }

    /// Transition event: the type is the new status.
    pub fn status(status: JobStatus) -> Self {
        Self::new(status.as_str()).with_data(serde_json::json!({ "status": status }))
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

/// Point-in-time view of a job, as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub album: AlbumRef,
    pub status: JobStatus,
    pub processed: u64,
    pub total: u64,
    pub options: JobOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn event_wire_shape() {
        let event = JobEvent::new("photo")
            .with_message("analysed p1")
            .with_data(serde_json::json!({ "photo_id": "p1" }));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "photo");
        assert_eq!(json["message"], "analysed p1");
        assert_eq!(json["data"]["photo_id"], "p1");

        let bare = serde_json::to_string(&JobEvent::new("cancelled")).unwrap();
        assert_eq!(bare, r#"{"type":"cancelled"}"#);
    }

    #[test]
    fn status_event_uses_lowercase_status() {
        let json = serde_json::to_value(JobEvent::status(JobStatus::Running)).unwrap();
        assert_eq!(json["type"], "running");
        assert_eq!(json["data"]["status"], "running");
    }

    #[test]
    fn options_defaults_from_empty_json() {
        let opts: JobOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, JobOptions::default());
        assert_eq!(opts.provider, "openai");
        assert_eq!(opts.concurrency, 1);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn options_validation() {
        let zero = JobOptions {
            concurrency: 0,
            ..JobOptions::default()
        };
        assert!(matches!(
            zero.validate(),
            Err(ValidationError::InvalidOptions(_))
        ));

        let too_many = JobOptions {
            concurrency: MAX_CONCURRENCY + 1,
            ..JobOptions::default()
        };
        assert!(too_many.validate().is_err());

        let zero_limit = JobOptions {
            limit: Some(0),
            ..JobOptions::default()
        };
        assert!(zero_limit.validate().is_err());

        let blank_provider = JobOptions {
            provider: "  ".to_string(),
            ..JobOptions::default()
        };
        assert!(blank_provider.validate().is_err());
    }

    #[test]
    fn mode_serializes_lowercase() {
        let opts = JobOptions {
            mode: SortMode::Batch,
            ..JobOptions::default()
        };
        let json = serde_json::to_value(&opts).unwrap();
        assert_eq!(json["mode"], "batch");
    }
}
