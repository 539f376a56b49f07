//! Clients for the external photo-management service.

mod http;
mod memory;

pub use http::HttpPhotoService;
pub use memory::InMemoryPhotoService;
pub use sort_types::{PhotoService, PhotoServiceError};
