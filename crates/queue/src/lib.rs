//! In-process delayed work queue: a mutex-protected job set shared between
//! ingestion and a single background worker, with per-job retry budgets.
//!
//! Single consumer by design. Running more than one worker per queue (or
//! more than one process over the same persisted jobs) needs lease/ack
//! semantics this module deliberately does not have.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use parley_core::errors::ProcessingError;
use parley_core::jobs::{JobId, QueuedJob};

/// Handles one job kind. Deferred handlers are expected to re-check
/// conversation state and no-op when it has moved on.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &QueuedJob) -> Result<(), ProcessingError>;
}

/// Durability seam: mirror queue contents so pending jobs survive a restart.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn persist(&self, job: &QueuedJob) -> Result<(), ProcessingError>;
    async fn remove(&self, id: &JobId) -> Result<(), ProcessingError>;
}

/// Keeps nothing. The default for tests and ephemeral deployments.
#[derive(Default)]
pub struct NoopJobStore;

#[async_trait]
impl JobStore for NoopJobStore {
    async fn persist(&self, _job: &QueuedJob) -> Result<(), ProcessingError> {
        Ok(())
    }

    async fn remove(&self, _id: &JobId) -> Result<(), ProcessingError> {
        Ok(())
    }
}

/// A queued job with its schedule mapped into the tokio clock, so paused-time
/// tests and the runtime agree on when it becomes dispatchable.
struct Scheduled {
    job: QueuedJob,
    ready_at: Instant,
}

fn ready_at_for(not_before: DateTime<Utc>) -> Instant {
    let delay = (not_before - Utc::now()).to_std().unwrap_or_default();
    Instant::now() + delay
}

pub struct DelayedWorkQueue {
    jobs: Mutex<Vec<Scheduled>>,
    notify: Notify,
    store: Arc<dyn JobStore>,
}

fn lock(jobs: &Mutex<Vec<Scheduled>>) -> MutexGuard<'_, Vec<Scheduled>> {
    jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DelayedWorkQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { jobs: Mutex::new(Vec::new()), notify: Notify::new(), store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(NoopJobStore))
    }

    pub async fn enqueue(
        &self,
        kind: impl Into<String>,
        payload: serde_json::Value,
        priority: i32,
        not_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<JobId, ProcessingError> {
        let job = QueuedJob::new(kind, payload, priority, not_before, max_attempts);
        let id = job.id.clone();
        self.store.persist(&job).await?;
        debug!(
            event_name = "job_enqueued",
            job_id = %id.0,
            kind = %job.kind,
            priority,
            "job enqueued"
        );
        self.push(job);
        Ok(id)
    }

    /// Re-admit jobs loaded from the store after a restart, untouched.
    pub fn restore(&self, jobs: Vec<QueuedJob>) {
        if jobs.is_empty() {
            return;
        }
        info!(event_name = "jobs_restored", count = jobs.len(), "restored pending jobs");
        let mut guard = lock(&self.jobs);
        guard.extend(jobs.into_iter().map(|job| {
            let ready_at = ready_at_for(job.not_before);
            Scheduled { job, ready_at }
        }));
        drop(guard);
        self.notify.notify_one();
    }

    fn push(&self, job: QueuedJob) {
        let ready_at = ready_at_for(job.not_before);
        lock(&self.jobs).push(Scheduled { job, ready_at });
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for and remove the next dispatchable job: among jobs with
    /// `not_before <= now`, highest priority first, then earliest schedule.
    pub async fn next_ready(&self) -> QueuedJob {
        loop {
            let wake_at = {
                let mut jobs = lock(&self.jobs);
                let now = Instant::now();
                let best = jobs
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.ready_at <= now)
                    .max_by(|(_, a), (_, b)| {
                        a.job
                            .priority
                            .cmp(&b.job.priority)
                            .then(b.ready_at.cmp(&a.ready_at))
                    })
                    .map(|(index, _)| index);
                if let Some(index) = best {
                    return jobs.remove(index).job;
                }
                jobs.iter().map(|entry| entry.ready_at).min()
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }
}

/// Single background consumer: dispatches jobs to registered handlers and
/// drives the retry-with-backoff / terminal-drop lifecycle.
pub struct Worker {
    queue: Arc<DelayedWorkQueue>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl Worker {
    pub fn new(queue: Arc<DelayedWorkQueue>) -> Self {
        Self { queue, handlers: HashMap::new() }
    }

    pub fn register(mut self, kind: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(kind.into(), handler);
        self
    }

    pub async fn run(&self) {
        loop {
            let job = self.queue.next_ready().await;
            self.dispatch(job).await;
        }
    }

    async fn dispatch(&self, job: QueuedJob) {
        let Some(handler) = self.handlers.get(&job.kind) else {
            error!(
                event_name = "job_dropped",
                job_id = %job.id.0,
                kind = %job.kind,
                "no handler registered for job kind"
            );
            self.forget(&job.id).await;
            return;
        };

        match handler.handle(&job).await {
            Ok(()) => {
                debug!(
                    event_name = "job_completed",
                    job_id = %job.id.0,
                    kind = %job.kind,
                    attempt = job.attempt,
                    "job completed"
                );
                self.forget(&job.id).await;
            }
            Err(cause) => {
                let now = Utc::now();
                match job.after_failure(now) {
                    Some(retried) => {
                        warn!(
                            event_name = "job_retry_scheduled",
                            job_id = %retried.id.0,
                            kind = %retried.kind,
                            attempt = retried.attempt,
                            max_attempts = retried.max_attempts,
                            error = %cause,
                            "job failed, retry scheduled"
                        );
                        if let Err(persist_error) = self.queue.store.persist(&retried).await {
                            warn!(
                                event_name = "job_persist_failed",
                                job_id = %retried.id.0,
                                error = %persist_error,
                                "could not persist retried job"
                            );
                        }
                        self.queue.push(retried);
                    }
                    None => {
                        error!(
                            event_name = "job_dropped",
                            job_id = %job.id.0,
                            kind = %job.kind,
                            attempts = job.attempt + 1,
                            error = %cause,
                            "job exhausted its attempts and was dropped"
                        );
                        self.forget(&job.id).await;
                    }
                }
            }
        }
    }

    async fn forget(&self, id: &JobId) {
        if let Err(remove_error) = self.queue.store.remove(id).await {
            warn!(
                event_name = "job_remove_failed",
                job_id = %id.0,
                error = %remove_error,
                "could not remove job from store"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;
    use tokio::time::Instant;

    use parley_core::errors::ProcessingError;
    use parley_core::jobs::QueuedJob;

    use super::{DelayedWorkQueue, JobHandler, Worker};

    struct RecordingHandler {
        runs: Mutex<Vec<(Instant, String)>>,
        fail_first: u32,
        failures_seen: AtomicU32,
    }

    impl RecordingHandler {
        fn always_succeeding() -> Arc<Self> {
            Arc::new(Self {
                runs: Mutex::new(Vec::new()),
                fail_first: 0,
                failures_seen: AtomicU32::new(0),
            })
        }

        fn always_failing() -> Arc<Self> {
            Arc::new(Self {
                runs: Mutex::new(Vec::new()),
                fail_first: u32::MAX,
                failures_seen: AtomicU32::new(0),
            })
        }

        fn runs(&self) -> Vec<(Instant, String)> {
            self.runs.lock().expect("lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl JobHandler for RecordingHandler {
        async fn handle(&self, job: &QueuedJob) -> Result<(), ProcessingError> {
            self.runs
                .lock()
                .expect("lock")
                .push((Instant::now(), job.payload["tag"].as_str().unwrap_or("").to_string()));
            if self.failures_seen.fetch_add(1, Ordering::SeqCst) < self.fail_first {
                return Err(ProcessingError::Transport("induced failure".into()));
            }
            Ok(())
        }
    }

    fn spawn_worker(queue: Arc<DelayedWorkQueue>, handler: Arc<RecordingHandler>) {
        let worker = Worker::new(queue).register("test", handler);
        tokio::spawn(async move { worker.run().await });
    }

    #[tokio::test(start_paused = true)]
    async fn ready_jobs_dispatch_by_priority() {
        let queue = Arc::new(DelayedWorkQueue::in_memory());
        let handler = RecordingHandler::always_succeeding();

        let now = Utc::now();
        queue.enqueue("test", json!({"tag": "low"}), 1, now, 1).await.expect("enqueue");
        queue.enqueue("test", json!({"tag": "high"}), 100, now, 1).await.expect("enqueue");
        queue.enqueue("test", json!({"tag": "mid"}), 50, now, 1).await.expect("enqueue");

        spawn_worker(queue.clone(), handler.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;

        let tags: Vec<String> = handler.runs().into_iter().map(|(_, tag)| tag).collect();
        assert_eq!(tags, vec!["high", "mid", "low"]);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_jobs_wait_for_their_schedule() {
        let queue = Arc::new(DelayedWorkQueue::in_memory());
        let handler = RecordingHandler::always_succeeding();
        let started = Instant::now();

        let now = Utc::now();
        queue
            .enqueue("test", json!({"tag": "later"}), 100, now + chrono::Duration::seconds(30), 1)
            .await
            .expect("enqueue");
        queue.enqueue("test", json!({"tag": "now"}), 1, now, 1).await.expect("enqueue");

        spawn_worker(queue.clone(), handler.clone());
        tokio::time::sleep(Duration::from_secs(60)).await;

        let runs = handler.runs();
        assert_eq!(runs.len(), 2);
        // The low-priority ready job must not wait on the high-priority
        // deferred one.
        assert_eq!(runs[0].1, "now");
        assert!(runs[0].0 - started < Duration::from_secs(1));
        assert_eq!(runs[1].1, "later");
        assert!(runs[1].0 - started >= Duration::from_secs(29));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_job_retries_with_doubling_delay_then_drops() {
        let queue = Arc::new(DelayedWorkQueue::in_memory());
        let handler = RecordingHandler::always_failing();
        let started = Instant::now();

        queue.enqueue("test", json!({"tag": "doomed"}), 0, Utc::now(), 3).await.expect("enqueue");

        spawn_worker(queue.clone(), handler.clone());
        tokio::time::sleep(Duration::from_secs(120)).await;

        let runs = handler.runs();
        assert_eq!(runs.len(), 3, "three attempts, then dropped");
        let offsets: Vec<Duration> = runs.iter().map(|(at, _)| *at - started).collect();
        assert!(offsets[0] < Duration::from_secs(1));
        // Retry delays are 2s then 4s (within clock-mapping slop).
        assert!(offsets[1] >= Duration::from_millis(1_900) && offsets[1] < Duration::from_secs(3));
        assert!(offsets[2] >= Duration::from_millis(5_900) && offsets[2] < Duration::from_secs(7));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_job_kind_is_dropped_not_retried() {
        let queue = Arc::new(DelayedWorkQueue::in_memory());
        let handler = RecordingHandler::always_succeeding();

        queue.enqueue("mystery", json!({}), 0, Utc::now(), 5).await.expect("enqueue");

        spawn_worker(queue.clone(), handler.clone());
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(handler.runs().is_empty());
        assert!(queue.is_empty());
    }
}
