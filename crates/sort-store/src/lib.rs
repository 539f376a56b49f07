//! Repositories for description embeddings and detected faces.

mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::{cosine_similarity, InMemoryEmbeddingStore, InMemoryFaceStore};
pub use sort_types::{EmbeddingRepository, FaceRepository, RepositoryError};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
