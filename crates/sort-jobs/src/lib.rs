//! Background sort jobs: per-job state machine with listener fan-out and cooperative
//! cancellation, an in-memory job registry, and the task runner that drives a worker.

mod job;
mod memory;
mod runner;
mod trait_;
pub mod watchdog;

pub use job::{Job, Listener, ListenerId, LISTENER_CAPACITY};
pub use memory::InMemoryJobRegistry;
pub use runner::{spawn_job, SortWorker, WorkerError};
pub use sort_types::{AlbumRef, JobEvent, JobOptions, JobSnapshot, JobStatus};
pub use tokio_util::sync::CancellationToken;
pub use trait_::{JobRegistry, JobsError};
