//! A single sort job: status machine, progress, listener fan-out, cancellation.

use chrono::{DateTime, Utc};
use sort_types::{AlbumRef, JobEvent, JobOptions, JobSnapshot, JobStatus};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Capacity of every listener queue.
pub const LISTENER_CAPACITY: usize = 100;

/// Opaque handle identifying one listener of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Subscriber side of a listener: the handle plus the receiving end of its queue.
///
/// The subscriber must hand the id back to [`Job::remove_listener`]; otherwise the
/// sender stays registered for the job's lifetime.
#[derive(Debug)]
pub struct Listener {
    id: ListenerId,
    rx: mpsc::Receiver<JobEvent>,
}

impl Listener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Next event; `None` once the listener was removed and the queue drained.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<JobEvent, TryRecvError> {
        self.rx.try_recv()
    }
}

struct JobInner {
    status: JobStatus,
    processed: u64,
    total: u64,
    result: Option<serde_json::Value>,
    error: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    listeners: HashMap<ListenerId, mpsc::Sender<JobEvent>>,
    next_listener: u64,
}

/// One sort operation.
///
/// Every mutable field sits behind a single mutex; events are delivered while that
/// mutex is held, so a listener never sees an event after its removal returned.
pub struct Job {
    id: String,
    album: AlbumRef,
    options: JobOptions,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    done: CancellationToken,
    inner: Mutex<JobInner>,
}

impl Job {
    pub fn new(id: impl Into<String>, album: AlbumRef, options: JobOptions) -> Self {
        Self {
            id: id.into(),
            album,
            options,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            inner: Mutex::new(JobInner {
                status: JobStatus::Pending,
                processed: 0,
                total: 0,
                result: None,
                error: None,
                completed_at: None,
                listeners: HashMap::new(),
                next_listener: 1,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn album(&self) -> &AlbumRef {
        &self.album
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    /// `(processed, total)`.
    pub fn progress(&self) -> (u64, u64) {
        let inner = self.lock();
        (inner.processed, inner.total)
    }

    pub fn result(&self) -> Option<serde_json::Value> {
        self.lock().result.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.lock().completed_at
    }

    /// Token the worker observes; triggered by [`Job::cancel`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the job has reached a terminal state.
    pub async fn finished(&self) {
        self.done.cancelled().await
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let inner = self.lock();
        JobSnapshot {
            id: self.id.clone(),
            album: self.album.clone(),
            status: inner.status,
            processed: inner.processed,
            total: inner.total,
            options: self.options.clone(),
            result: inner.result.clone(),
            error: inner.error.clone(),
            started_at: self.started_at,
            completed_at: inner.completed_at,
        }
    }

    /// Register a new bounded listener queue.
    pub fn add_listener(&self) -> Listener {
        let (tx, rx) = mpsc::channel(LISTENER_CAPACITY);
        let mut inner = self.lock();
        let id = ListenerId(inner.next_listener);
        inner.next_listener += 1;
        inner.listeners.insert(id, tx);
        tracing::debug!(job_id = %self.id, listener = id.0, "listener added");
        Listener { id, rx }
    }

    /// Deregister a listener and close its queue. Returns false for unknown handles.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = self.lock().listeners.remove(&id);
        if removed.is_some() {
            tracing::debug!(job_id = %self.id, listener = id.0, "listener removed");
        }
        removed.is_some()
    }

    /// Deliver `event` to every registered listener without waiting.
    pub fn send_event(&self, event: JobEvent) {
        let inner = self.lock();
        self.deliver(&inner, &event);
    }

    /// Pending -> Running. No-op when already running; ignored once terminal.
    pub fn set_running(&self) -> bool {
        let mut inner = self.lock();
        let current = inner.status;
        match current {
            JobStatus::Pending => {
                inner.status = JobStatus::Running;
                tracing::info!(job_id = %self.id, album_id = %self.album.id, "job running");
                self.deliver(&inner, &JobEvent::status(JobStatus::Running));
                true
            }
            JobStatus::Running => false,
            terminal => {
                self.reject(&inner, terminal, JobStatus::Running);
                false
            }
        }
    }

    /// Running -> Completed. Refused while Pending or once terminal.
    pub fn set_completed(&self, result: serde_json::Value) -> bool {
        let event = JobEvent::status(JobStatus::Completed).with_data(serde_json::json!({
            "status": JobStatus::Completed,
            "result": result,
        }));
        self.finish(JobStatus::Completed, event, |inner| {
            inner.result = Some(result);
        })
    }

    pub fn set_failed(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        let event = JobEvent::status(JobStatus::Failed).with_message(message.clone());
        self.finish(JobStatus::Failed, event, |inner| {
            inner.error = Some(message);
        })
    }

    /// Trigger cancellation and move the job to Cancelled unless it is already terminal.
    ///
    /// The token is triggered in every case. Returns true only for the call that
    /// performed the transition; only that call emits the `cancelled` event.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel();
        let event = JobEvent::status(JobStatus::Cancelled).with_message("job cancelled");
        let mut inner = self.lock();
        if inner.status.is_terminal() {
            tracing::debug!(job_id = %self.id, status = %inner.status, "cancel on finished job");
            return false;
        }
        self.apply_terminal(&mut inner, JobStatus::Cancelled, &event);
        drop(inner);
        self.done.cancel();
        true
    }

    /// Set the expected number of photos.
    pub fn set_total(&self, total: u64) {
        let mut inner = self.lock();
        if inner.status.is_terminal() {
            return;
        }
        inner.total = total;
        self.deliver(&inner, &JobEvent::progress(inner.processed, total));
    }

    /// Count one processed photo; returns the new processed count.
    pub fn increment(&self) -> u64 {
        let mut inner = self.lock();
        if inner.status.is_terminal() {
            return inner.processed;
        }
        inner.processed += 1;
        self.deliver(&inner, &JobEvent::progress(inner.processed, inner.total));
        inner.processed
    }

    fn finish(
        &self,
        to: JobStatus,
        event: JobEvent,
        apply: impl FnOnce(&mut JobInner),
    ) -> bool {
        let mut inner = self.lock();
        let current = inner.status;
        if current != JobStatus::Running {
            self.reject(&inner, current, to);
            return false;
        }
        apply(&mut inner);
        self.apply_terminal(&mut inner, to, &event);
        drop(inner);
        self.done.cancel();
        true
    }

    fn apply_terminal(&self, inner: &mut JobInner, to: JobStatus, event: &JobEvent) {
        let from = inner.status;
        inner.status = to;
        inner.completed_at = Some(Utc::now());
        tracing::info!(job_id = %self.id, from = %from, to = %to, "job finished");
        self.deliver(inner, event);
    }

    fn reject(&self, inner: &JobInner, current: JobStatus, attempted: JobStatus) {
        tracing::debug!(
            job_id = %self.id,
            status = %current,
            attempted = %attempted,
            "transition ignored"
        );
        let event = JobEvent::new("transition_ignored")
            .with_message(format!("job is {}; {} ignored", current, attempted))
            .with_data(serde_json::json!({ "status": current, "attempted": attempted }));
        self.deliver(inner, &event);
    }

    fn deliver(&self, inner: &JobInner, event: &JobEvent) {
        for (id, tx) in &inner.listeners {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::trace!(job_id = %self.id, listener = id.0, kind = %event.kind, "listener queue full; event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::trace!(job_id = %self.id, listener = id.0, kind = %event.kind, "listener receiver gone; event dropped");
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("album", &self.album)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trip_job() -> Job {
        Job::new("j1", AlbumRef::new("alb1", "Trip"), JobOptions::default())
    }

    fn drain(listener: &mut Listener) -> Vec<JobEvent> {
        let mut out = Vec::new();
        while let Ok(event) = listener.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn new_job_is_pending_with_zero_progress() {
        let job = trip_job();
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.progress(), (0, 0));
        assert!(job.result().is_none());
        assert!(job.error().is_none());
        assert!(job.completed_at().is_none());
        assert_eq!(job.album().title, "Trip");
        assert_eq!(job.options(), &JobOptions::default());
    }

    #[test]
    fn listener_count_tracks_adds_and_successful_removes() {
        let job = trip_job();
        let a = job.add_listener();
        let b = job.add_listener();
        let c = job.add_listener();
        assert_ne!(a.id(), b.id());
        assert_eq!(job.listener_count(), 3);

        assert!(job.remove_listener(b.id()));
        assert!(!job.remove_listener(b.id()));
        assert_eq!(job.listener_count(), 2);

        assert!(job.remove_listener(a.id()));
        assert!(job.remove_listener(c.id()));
        assert_eq!(job.listener_count(), 0);
    }

    #[tokio::test]
    async fn removing_a_listener_closes_its_queue() {
        let job = trip_job();
        let mut listener = job.add_listener();
        job.send_event(JobEvent::new("before"));
        assert!(job.remove_listener(listener.id()));
        job.send_event(JobEvent::new("after"));

        assert_eq!(listener.recv().await.map(|e| e.kind), Some("before".into()));
        assert_eq!(listener.recv().await, None);
    }

    #[test]
    fn early_listener_sees_worker_events_in_order() {
        let job = trip_job();
        let mut listener = job.add_listener();

        job.set_running();
        job.set_total(2);
        job.send_event(JobEvent::new("photo").with_message("p1"));
        job.increment();
        job.send_event(JobEvent::new("photo").with_message("p2"));
        job.increment();
        job.set_completed(serde_json::json!({ "processed": 2 }));

        let kinds: Vec<String> = drain(&mut listener).into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                "running",
                "progress",
                "photo",
                "progress",
                "photo",
                "progress",
                "completed"
            ]
        );
        assert_eq!(job.progress(), (2, 2));
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[test]
    fn full_listener_drops_while_others_receive() {
        let job = trip_job();
        let mut l1 = job.add_listener();
        let mut l2 = job.add_listener();

        for i in 0..LISTENER_CAPACITY {
            job.send_event(JobEvent::new(format!("fill-{}", i)));
        }
        drain(&mut l2);

        job.send_event(JobEvent::new("e"));

        let l2_events = drain(&mut l2);
        assert_eq!(l2_events.len(), 1);
        assert_eq!(l2_events[0].kind, "e");

        let l1_events = drain(&mut l1);
        assert_eq!(l1_events.len(), LISTENER_CAPACITY);
        assert!(l1_events.iter().all(|e| e.kind != "e"));
        assert_eq!(job.listener_count(), 2);
    }

    #[test]
    fn send_event_returns_with_every_queue_full() {
        let job = trip_job();
        let _listeners: Vec<Listener> = (0..4).map(|_| job.add_listener()).collect();
        let started = std::time::Instant::now();
        for _ in 0..LISTENER_CAPACITY * 5 {
            job.send_event(JobEvent::new("flood"));
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn send_event_tolerates_dropped_receiver() {
        let job = trip_job();
        let listener = job.add_listener();
        drop(listener);
        job.send_event(JobEvent::new("orphan"));
        assert_eq!(job.listener_count(), 1);
    }

    #[test]
    fn double_cancel_transitions_once() {
        let job = trip_job();
        let mut listener = job.add_listener();
        job.set_running();

        assert!(job.cancel());
        assert!(!job.cancel());
        assert!(job.is_cancelled());
        assert_eq!(job.status(), JobStatus::Cancelled);

        let cancelled = drain(&mut listener)
            .into_iter()
            .filter(|e| e.is_kind("cancelled"))
            .count();
        assert_eq!(cancelled, 1);
    }

    #[test]
    fn cancel_while_pending_skips_running() {
        let job = trip_job();
        let mut listener = job.add_listener();
        assert!(job.cancel());
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert!(job.completed_at().is_some());

        let events = drain(&mut listener);
        assert!(events.iter().all(|e| !e.is_kind("running")));
        assert_eq!(events.last().map(|e| e.kind.as_str()), Some("cancelled"));

        assert!(!job.set_running());
        assert_eq!(job.status(), JobStatus::Cancelled);
    }

    #[test]
    fn terminal_state_is_monotonic() {
        let job = trip_job();
        job.set_running();
        assert!(job.set_completed(serde_json::json!({ "processed": 3 })));

        assert!(!job.set_running());
        assert!(!job.set_failed("late failure"));
        assert!(!job.set_completed(serde_json::json!({ "processed": 99 })));
        assert!(!job.cancel());

        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.result(), Some(serde_json::json!({ "processed": 3 })));
        assert!(job.error().is_none());
    }

    #[test]
    fn pending_job_cannot_finish_without_running() {
        let job = trip_job();
        let mut listener = job.add_listener();

        assert!(!job.set_completed(serde_json::json!({ "processed": 0 })));
        assert!(!job.set_failed("too early"));
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.result().is_none());
        assert!(job.error().is_none());
        assert!(job.completed_at().is_none());
        assert!(!job.is_cancelled());

        let events = drain(&mut listener);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.is_kind("transition_ignored")));
        let data = events[0].data.as_ref().unwrap();
        assert_eq!(data["status"], "pending");
        assert_eq!(data["attempted"], "completed");

        assert!(job.set_running());
        assert!(job.set_failed("late but legal"));
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn ignored_transition_emits_observability_event() {
        let job = trip_job();
        job.set_running();
        job.set_failed("boom");
        let mut listener = job.add_listener();

        job.set_completed(serde_json::json!(null));

        let events = drain(&mut listener);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "transition_ignored");
        let data = events[0].data.as_ref().unwrap();
        assert_eq!(data["status"], "failed");
        assert_eq!(data["attempted"], "completed");
        assert_eq!(job.error().as_deref(), Some("boom"));
    }

    #[test]
    fn progress_is_frozen_after_terminal() {
        let job = trip_job();
        job.set_running();
        job.set_total(10);
        job.increment();
        job.cancel();
        assert_eq!(job.increment(), 1);
        job.set_total(50);
        assert_eq!(job.progress(), (1, 10));
    }

    #[test]
    fn snapshot_reflects_state() {
        let job = trip_job();
        job.set_running();
        job.set_total(4);
        job.increment();
        job.set_failed("provider unavailable");

        let snap = job.snapshot();
        assert_eq!(snap.id, "j1");
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!((snap.processed, snap.total), (1, 4));
        assert_eq!(snap.error.as_deref(), Some("provider unavailable"));
        assert!(snap.completed_at.is_some());
    }

    #[tokio::test]
    async fn finished_resolves_on_terminal_transition() {
        let job = std::sync::Arc::new(trip_job());
        let waiter = {
            let job = std::sync::Arc::clone(&job);
            tokio::spawn(async move { job.finished().await })
        };
        job.set_running();
        job.set_completed(serde_json::json!({}));
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("finished should resolve")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_completion_and_cancel_reach_one_terminal_state() {
        for _ in 0..50 {
            let job = std::sync::Arc::new(trip_job());
            job.set_running();
            let mut listener = job.add_listener();

            let a = {
                let job = std::sync::Arc::clone(&job);
                tokio::spawn(async move { job.set_completed(serde_json::json!({})) })
            };
            let b = {
                let job = std::sync::Arc::clone(&job);
                tokio::spawn(async move { job.cancel() })
            };
            let (completed, cancelled) = (a.await.unwrap(), b.await.unwrap());
            assert!(completed ^ cancelled);
            assert!(job.status().is_terminal());

            let terminal_events = drain(&mut listener)
                .into_iter()
                .filter(|e| e.is_kind("completed") || e.is_kind("cancelled"))
                .count();
            assert_eq!(terminal_events, 1);
        }
    }
}
