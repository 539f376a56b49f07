//! Album sort API server.

use sort_ai::{OpenAiEmbedder, OpenAiVisionProvider};
use sort_api::config::ServerConfig;
use sort_api::server::{self, AppState};
use sort_engine::{AlbumSorter, ProviderRegistry, StatsService};
use sort_jobs::InMemoryJobRegistry;
use sort_photos::HttpPhotoService;
use sort_types::{EmbeddingRepository, FaceRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Repositories = (Arc<dyn EmbeddingRepository>, Arc<dyn FaceRepository>);

fn memory_repositories() -> Repositories {
    let embeddings: Arc<dyn EmbeddingRepository> = Arc::new(sort_store::InMemoryEmbeddingStore::new());
    let faces: Arc<dyn FaceRepository> = Arc::new(sort_store::InMemoryFaceStore::new());
    (embeddings, faces)
}

#[cfg(feature = "sqlite")]
fn repositories(
    config: &ServerConfig,
) -> Result<Repositories, Box<dyn std::error::Error + Send + Sync>> {
    let Some(ref path) = config.sqlite_path else {
        return Ok(memory_repositories());
    };
    let store = Arc::new(sort_store::SqliteStore::open(path)?);
    tracing::info!(path = %path, "using sqlite repositories");
    let embeddings: Arc<dyn EmbeddingRepository> = store.clone();
    let faces: Arc<dyn FaceRepository> = store;
    Ok((embeddings, faces))
}

#[cfg(not(feature = "sqlite"))]
fn repositories(
    config: &ServerConfig,
) -> Result<Repositories, Box<dyn std::error::Error + Send + Sync>> {
    if config.sqlite_path.is_some() {
        tracing::warn!("SORT_SQLITE_PATH is set but the sqlite feature is disabled; using memory");
    }
    Ok(memory_repositories())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    let photos: Arc<dyn sort_types::PhotoService> = Arc::new(HttpPhotoService::from_env());
    let (embeddings, faces) = repositories(&config)?;

    let mut providers = ProviderRegistry::new();
    match OpenAiVisionProvider::from_env() {
        Some(provider) => providers.register(Arc::new(provider)),
        None => tracing::warn!("LLM_API_KEY not set; no vision provider registered"),
    }
    let providers = Arc::new(providers);

    let stats = Arc::new(StatsService::new(
        Arc::clone(&photos),
        Arc::clone(&embeddings),
        faces,
        config.stats_ttl,
    ));
    let sorter = AlbumSorter::new(
        Arc::clone(&photos),
        Arc::clone(&providers),
        Arc::new(OpenAiEmbedder::from_env()),
        Arc::clone(&embeddings),
    )
    .with_stats(Arc::clone(&stats));

    let jobs: Arc<dyn sort_jobs::JobRegistry> = Arc::new(InMemoryJobRegistry::new());
    server::spawn_janitor(
        Arc::clone(&jobs),
        config.job_retention,
        Duration::from_secs(60),
    );

    let state = Arc::new(AppState {
        jobs,
        photos,
        providers,
        sorter: Arc::new(sorter),
        stats,
        embeddings,
        job_deadline: config.job_deadline,
    });
    let app = server::router(state);
    tracing::info!("sort API listening on {}", config.listen);
    axum::serve(
        tokio::net::TcpListener::bind(config.listen).await?,
        app.into_make_service(),
    )
    .await?;
    Ok(())
}
