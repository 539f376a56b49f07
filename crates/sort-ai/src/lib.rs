//! OpenAI-compatible AI clients: photo analysis (chat completions) and text embeddings.

#[cfg(feature = "test-util")]
pub mod mock;
mod embedding;
mod vision;

pub use embedding::OpenAiEmbedder;
pub use sort_types::{Embedder, EmbedderError, ProviderError, VisionProvider};
pub use vision::{parse_analysis, parse_batch_analysis, OpenAiVisionProvider};

#[cfg(feature = "test-util")]
pub use mock::{MockEmbedder, MockVisionProvider};
