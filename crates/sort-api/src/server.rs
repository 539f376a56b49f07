//! Axum server and routes.

use crate::events;
use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use sort_engine::{ProviderRegistry, StatsService};
use sort_jobs::{watchdog, JobRegistry, SortWorker};
use sort_types::{
    AlbumRef, BaseResponse, EmbeddingRepository, JobOptions, JobSnapshot, PhotoService,
    PhotoStats, SimilarPhoto, ValidationError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

const DEFAULT_SIMILAR: usize = 10;

pub struct AppState {
    pub jobs: Arc<dyn JobRegistry>,
    pub photos: Arc<dyn PhotoService>,
    pub providers: Arc<ProviderRegistry>,
    pub sorter: Arc<dyn SortWorker>,
    pub stats: Arc<StatsService>,
    pub embeddings: Arc<dyn EmbeddingRepository>,
    /// Cancel jobs still running after this long.
    pub job_deadline: Option<Duration>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/albums/:album_id/sort", post(handle_start_sort))
        .route("/api/jobs", get(handle_list_jobs))
        .route("/api/jobs/:id", get(handle_get_job).delete(handle_delete_job))
        .route("/api/jobs/:id/events", get(handle_job_events))
        .route("/api/jobs/:id/cancel", post(handle_cancel_job))
        .route("/api/stats", get(handle_stats))
        .route("/api/stats/invalidate", post(handle_invalidate_stats))
        .route("/api/photos/:photo_id/similar", get(handle_similar))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Periodically drop finished jobs older than `retention`.
pub fn spawn_janitor(
    jobs: Arc<dyn JobRegistry>,
    retention: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let pruned = jobs.prune_finished(retention).await;
            if pruned > 0 {
                tracing::info!(pruned, "pruned finished jobs");
            }
        }
    })
}

fn not_found<T>(id: &str) -> Json<BaseResponse<T>> {
    Json(BaseResponse::error(404, format!("job not found: {}", id)))
}

fn rejected<T>(err: ValidationError) -> Json<BaseResponse<T>> {
    let code = match err {
        ValidationError::InvalidAlbum(_) => 404,
        ValidationError::InvalidOptions(_) | ValidationError::UnknownProvider(_) => 400,
    };
    Json(BaseResponse::error(code, err.to_string()))
}

#[derive(Debug, Default, Deserialize)]
pub struct StartSortRequest {
    /// Overrides the album title reported by the photo service.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub options: Option<JobOptions>,
}

async fn handle_start_sort(
    State(state): State<Arc<AppState>>,
    Path(album_id): Path<String>,
    Json(req): Json<StartSortRequest>,
) -> Json<BaseResponse<JobSnapshot>> {
    let album_id = album_id.trim().to_string();
    if album_id.is_empty() {
        return rejected(ValidationError::InvalidAlbum(
            "album id must not be empty".to_string(),
        ));
    }
    let options = req.options.unwrap_or_default();
    if let Err(e) = state.providers.validate(&options) {
        return rejected(e);
    }
    let album = match state.photos.get_album(&album_id).await {
        Ok(Some(album)) => album,
        Ok(None) => {
            return rejected(ValidationError::InvalidAlbum(format!(
                "album not found: {}",
                album_id
            )))
        }
        Err(e) => {
            tracing::warn!(album_id = %album_id, error = %e, "album lookup failed");
            return Json(BaseResponse::error(502, e.to_string()));
        }
    };
    let album = match req.title {
        Some(title) if !title.trim().is_empty() => AlbumRef::new(album.id, title),
        _ => album,
    };

    let job = match state
        .jobs
        .create_job_with_generated_id(album, options)
        .await
    {
        Ok(job) => job,
        Err(e) => return Json(BaseResponse::error(500, e.to_string())),
    };
    tracing::info!(job_id = %job.id(), album_id = %job.album().id, "sort job submitted");

    sort_jobs::spawn_job(Arc::clone(&job), Arc::clone(&state.sorter));
    if let Some(deadline) = state.job_deadline {
        watchdog::spawn_deadline(Arc::clone(&job), deadline);
    }
    Json(BaseResponse::ok(job.snapshot()))
}

async fn handle_list_jobs(State(state): State<Arc<AppState>>) -> Json<BaseResponse<Vec<JobSnapshot>>> {
    let jobs = state.jobs.list_jobs().await;
    Json(BaseResponse::ok(jobs.iter().map(|j| j.snapshot()).collect()))
}

async fn handle_get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<BaseResponse<JobSnapshot>> {
    match state.jobs.get_job(&id).await {
        Some(job) => Json(BaseResponse::ok(job.snapshot())),
        None => not_found(&id),
    }
}

async fn handle_job_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.jobs.get_job(&id).await {
        Some(job) => events::job_stream(job).into_response(),
        None => not_found::<()>(&id).into_response(),
    }
}

async fn handle_cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<BaseResponse<serde_json::Value>> {
    let Some(job) = state.jobs.get_job(&id).await else {
        return not_found(&id);
    };
    let cancelled = job.cancel();
    Json(BaseResponse::ok(serde_json::json!({
        "cancelled": cancelled,
        "status": job.status(),
    })))
}

async fn handle_delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<BaseResponse<JobSnapshot>> {
    match state.jobs.delete_job(&id).await {
        Some(job) => {
            if !job.status().is_terminal() {
                job.cancel();
            }
            Json(BaseResponse::ok(job.snapshot()))
        }
        None => not_found(&id),
    }
}

async fn handle_stats(State(state): State<Arc<AppState>>) -> Json<BaseResponse<PhotoStats>> {
    match state.stats.photo_stats().await {
        Ok(stats) => Json(BaseResponse::ok(stats)),
        Err(e) => {
            tracing::warn!(error = %e, "stats unavailable");
            Json(BaseResponse::error(500, e.to_string()))
        }
    }
}

async fn handle_invalidate_stats(State(state): State<Arc<AppState>>) -> Json<BaseResponse<()>> {
    state.stats.invalidate().await;
    Json(BaseResponse::ok(()))
}

#[derive(Debug, Deserialize)]
pub struct SimilarQuery {
    #[serde(default)]
    pub top_k: Option<usize>,
}

async fn handle_similar(
    State(state): State<Arc<AppState>>,
    Path(photo_id): Path<String>,
    Query(q): Query<SimilarQuery>,
) -> Json<BaseResponse<Vec<SimilarPhoto>>> {
    let top_k = q.top_k.unwrap_or(DEFAULT_SIMILAR).clamp(1, 100);
    match state.embeddings.get(&photo_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Json(BaseResponse::error(
                404,
                format!("no embedding for photo: {}", photo_id),
            ))
        }
        Err(e) => return Json(BaseResponse::error(500, e.to_string())),
    }
    match state.embeddings.similar(&photo_id, top_k).await {
        Ok(hits) => Json(BaseResponse::ok(hits)),
        Err(e) => Json(BaseResponse::error(500, e.to_string())),
    }
}

async fn handle_health() -> &'static str {
    "ok"
}
