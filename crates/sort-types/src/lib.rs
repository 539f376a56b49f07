//! Core types and traits for the album sort backend.
//!
//! Job-facing types (status, options, events, snapshots) live in `lifecycle`; photo and
//! statistics DTOs plus the response envelope live in `dto`; the boundaries to external
//! collaborators (photo service, AI providers, repositories) live in `traits`.

mod dto;
mod lifecycle;
mod traits;

pub use dto::*;
pub use lifecycle::*;
pub use traits::*;
