//! Server-sent event stream for one job.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use serde::Serialize;
use sort_jobs::{Job, JobEvent, ListenerId};
use std::convert::Infallible;
use std::sync::Arc;

/// Detaches the listener when the stream is dropped, including on client disconnect.
struct ListenerGuard {
    job: Arc<Job>,
    id: ListenerId,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if self.job.remove_listener(self.id) {
            tracing::debug!(job_id = %self.job.id(), "event stream closed");
        }
    }
}

fn sse_event<T: Serialize>(name: &str, payload: &T) -> Event {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string());
    Event::default().event(name).data(data)
}

fn job_event(event: &JobEvent) -> Event {
    sse_event(&event.kind, event)
}

/// `snapshot` first, then every event the job emits, until the job is finished and the
/// listener queue is drained.
pub fn job_stream(job: Arc<Job>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut listener = job.add_listener();
    // Owned by the stream from here on, so dropping it unpolled still detaches.
    let guard = ListenerGuard {
        job: Arc::clone(&job),
        id: listener.id(),
    };
    let snapshot = job.snapshot();

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok(sse_event("snapshot", &snapshot));

        if !snapshot.status.is_terminal() {
            loop {
                let next = tokio::select! {
                    biased;
                    event = listener.recv() => event,
                    _ = job.finished() => None,
                };
                match next {
                    Some(event) => yield Ok(job_event(&event)),
                    None => break,
                }
            }
        }
        while let Ok(event) = listener.try_recv() {
            yield Ok(job_event(&event));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
