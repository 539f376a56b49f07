//! Sorting engine: the worker that analyses an album's photos, the registry of vision
//! providers it can use, and the cached statistics over the photo library.

mod providers;
mod sorter;
mod stats;

pub use providers::ProviderRegistry;
pub use sorter::{AlbumSorter, BATCH_SIZE, PAGE_SIZE};
pub use stats::{StatsError, StatsService};
