use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::cli::config::QueueSettings;
use crate::queue::job::{Job, JobCounts, JobState};

/// How often idle workers re-check for delayed jobs coming due
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handler executed for a claimed job
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &Job) -> Result<Value>;
}

/// Bookkeeping shared between the queue handle and its workers
struct QueueState {
    /// Every known job by id, terminal ones until pruned
    jobs: HashMap<String, Job>,

    /// FIFO of waiting job ids
    waiting: VecDeque<String>,

    /// Ids scheduled for a later retry
    delayed: Vec<String>,

    /// Ids currently held by a worker slot
    active: HashSet<String>,

    /// Active ids whose result must be dropped on completion
    discarded: HashSet<String>,

    /// Terminal ids, oldest first, for retention pruning
    finished_order: VecDeque<String>,

    /// Callers blocked on a terminal result
    watchers: HashMap<String, Vec<oneshot::Sender<Job>>>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            waiting: VecDeque::new(),
            delayed: Vec::new(),
            active: HashSet::new(),
            discarded: HashSet::new(),
            finished_order: VecDeque::new(),
            watchers: HashMap::new(),
        }
    }

    /// Move delayed jobs whose retry time has arrived to the back of the
    /// waiting queue
    fn promote_due_delayed(&mut self) {
        let now = Utc::now();
        let mut still_delayed = Vec::new();

        for id in self.delayed.drain(..) {
            let due = self.jobs.get(&id).map_or(false, |job| job.run_at <= now);
            if due {
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.state = JobState::Waiting;
                }
                self.waiting.push_back(id);
            } else {
                still_delayed.push(id);
            }
        }

        self.delayed = still_delayed;
    }

    /// Resolve watchers for a job that reached a terminal state
    fn resolve_watchers(&mut self, id: &str, job: &Job) {
        if let Some(senders) = self.watchers.remove(id) {
            for sender in senders {
                let _ = sender.send(job.clone());
            }
        }
    }

    /// Drop terminal jobs beyond the retention thresholds
    fn prune(&mut self, settings: &QueueSettings) {
        // Count cap, oldest first
        while self.finished_order.len() > settings.retention_count {
            if let Some(id) = self.finished_order.pop_front() {
                self.jobs.remove(&id);
                self.watchers.remove(&id);
            }
        }

        // Age cap; finished_order is ordered by finish time so stop at the
        // first job that is still young enough
        let cutoff = Utc::now() - ChronoDuration::seconds(settings.retention_age_secs);
        while let Some(id) = self.finished_order.front() {
            let expired = self
                .jobs
                .get(id)
                .and_then(|job| job.finished_at)
                .map_or(true, |at| at < cutoff);

            if !expired {
                break;
            }
            if let Some(id) = self.finished_order.pop_front() {
                self.jobs.remove(&id);
                self.watchers.remove(&id);
            }
        }
    }
}

struct Inner {
    name: String,
    settings: QueueSettings,
    state: Mutex<QueueState>,
    notify: Notify,
    handlers: std::sync::RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    shutdown: AtomicBool,
}

/// Work queue running named jobs at bounded concurrency with fixed-backoff
/// retries.
///
/// Concurrency defaults to 1: overlapping browser automation against the
/// same authenticated admin session corrupts UI state, so jobs of one queue
/// run strictly sequentially.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    /// Create a new queue; call `register_handler` then `start`
    pub fn new(name: &str, settings: QueueSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                settings,
                state: Mutex::new(QueueState::new()),
                notify: Notify::new(),
                handlers: std::sync::RwLock::new(HashMap::new()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Register the handler executed for jobs with the given task name
    pub fn register_handler(&self, task_name: &str, handler: Arc<dyn JobHandler>) {
        self.inner
            .handlers
            .write()
            .expect("handler registry poisoned")
            .insert(task_name.to_string(), handler);
    }

    /// Spawn the worker slots
    pub fn start(&self) {
        let slots = self.inner.settings.concurrency.max(1);
        info!("Starting queue '{}' with {} worker slot(s)", self.inner.name, slots);

        for slot in 0..slots {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                Self::worker_loop(inner, slot).await;
            });
        }
    }

    /// Stop claiming new jobs; in-flight jobs finish on their own
    pub fn stop(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Submit a job and return its initial snapshot
    pub async fn enqueue(&self, task_name: &str, payload: Value) -> Job {
        let job = Job::new(
            &self.inner.name,
            task_name,
            payload,
            self.inner.settings.max_attempts,
            self.inner.settings.backoff_ms,
        );
        let snapshot = job.clone();

        let mut state = self.inner.state.lock().await;
        state.waiting.push_back(job.id.clone());
        state.jobs.insert(job.id.clone(), job);
        drop(state);

        self.inner.notify.notify_one();

        debug!("Enqueued job {} ({})", snapshot.id, snapshot.task_name);
        snapshot
    }

    /// Await the terminal snapshot of a job.
    ///
    /// Errors if the job is unknown or is removed before finishing.
    pub async fn wait_for(&self, id: &str) -> Result<Job> {
        let rx = {
            let mut state = self.inner.state.lock().await;

            match state.jobs.get(id) {
                Some(job) if job.state.is_terminal() => return Ok(job.clone()),
                Some(_) => {}
                None => return Err(anyhow!("unknown job id '{}'", id)),
            }

            let (tx, rx) = oneshot::channel();
            state.watchers.entry(id.to_string()).or_default().push(tx);
            rx
        };

        rx.await
            .map_err(|_| anyhow!("job '{}' was removed before it finished", id))
    }

    /// Fetch the current snapshot of a job
    pub async fn get(&self, id: &str) -> Option<Job> {
        self.inner.state.lock().await.jobs.get(id).cloned()
    }

    /// Per-state counts
    pub async fn counts(&self) -> JobCounts {
        let state = self.inner.state.lock().await;
        let mut counts = JobCounts::default();

        for job in state.jobs.values() {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
                JobState::Delayed => counts.delayed += 1,
            }
        }

        counts
    }

    /// List jobs in a given state, oldest first, up to `limit`
    pub async fn list_by_state(&self, wanted: JobState, limit: usize) -> Vec<Job> {
        let state = self.inner.state.lock().await;

        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.state == wanted)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs.truncate(limit);

        jobs
    }

    /// Remove a job by id.
    ///
    /// Waiting, delayed and terminal jobs are dropped outright. An active
    /// job is discarded: the in-flight browser work is not interrupted, but
    /// its result is thrown away when the handler returns. Returns whether
    /// the id was known.
    pub async fn remove(&self, id: &str) -> bool {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        let Some(job) = state.jobs.get(id) else {
            return false;
        };

        match job.state {
            JobState::Active => {
                warn!("Discarding active job {}", id);
                state.discarded.insert(id.to_string());
            }
            JobState::Waiting => {
                state.waiting.retain(|queued| queued != id);
                state.jobs.remove(id);
            }
            JobState::Delayed => {
                state.delayed.retain(|queued| queued != id);
                state.jobs.remove(id);
            }
            JobState::Completed | JobState::Failed => {
                state.finished_order.retain(|queued| queued != id);
                state.jobs.remove(id);
            }
        }

        // Anyone awaiting the result learns it was removed
        state.watchers.remove(id);

        true
    }

    /// Put a failed job back at the end of the queue with its attempt
    /// counter reset
    pub async fn retry(&self, id: &str) -> Result<()> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown job id '{}'", id))?;

        if job.state != JobState::Failed {
            return Err(anyhow!("job '{}' is not failed, cannot retry", id));
        }

        job.state = JobState::Waiting;
        job.attempts_made = 0;
        job.error = None;
        job.finished_at = None;
        job.run_at = Utc::now();

        state.finished_order.retain(|queued| queued != id);
        state.waiting.push_back(id.to_string());
        drop(guard);

        self.inner.notify.notify_one();

        Ok(())
    }

    async fn worker_loop(inner: Arc<Inner>, slot: usize) {
        debug!("Queue '{}' worker slot {} started", inner.name, slot);

        loop {
            if inner.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let claimed = {
                let mut state = inner.state.lock().await;
                state.promote_due_delayed();

                match state.waiting.pop_front() {
                    Some(id) => {
                        let job = state.jobs.get_mut(&id).map(|job| {
                            job.state = JobState::Active;
                            job.clone()
                        });
                        if job.is_some() {
                            state.active.insert(id);
                        }
                        job
                    }
                    None => None,
                }
            };

            match claimed {
                Some(job) => Self::run_job(&inner, job).await,
                None => {
                    // Wake on new work or on the next delayed job coming due
                    tokio::select! {
                        _ = inner.notify.notified() => {}
                        _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                    }
                }
            }
        }

        debug!("Queue '{}' worker slot {} stopped", inner.name, slot);
    }

    async fn run_job(inner: &Arc<Inner>, job: Job) {
        let id = job.id.clone();
        info!("Job {} ({}) started, attempt {}/{}", id, job.task_name, job.attempts_made + 1, job.max_attempts);

        let handler = inner
            .handlers
            .read()
            .expect("handler registry poisoned")
            .get(&job.task_name)
            .cloned();

        let outcome = match handler {
            Some(handler) => handler.run(&job).await,
            None => Err(anyhow!("no handler registered for task '{}'", job.task_name)),
        };

        let mut guard = inner.state.lock().await;
        let state = &mut *guard;
        state.active.remove(&id);

        if state.discarded.remove(&id) {
            debug!("Job {} finished after removal, result discarded", id);
            state.jobs.remove(&id);
            state.watchers.remove(&id);
            return;
        }

        let Some(job) = state.jobs.get_mut(&id) else {
            return;
        };

        match outcome {
            Ok(value) => {
                job.state = JobState::Completed;
                job.result = Some(value);
                job.finished_at = Some(Utc::now());
                info!("Job {} completed", id);
            }
            Err(e) => {
                job.attempts_made += 1;

                if job.attempts_made < job.max_attempts {
                    job.state = JobState::Delayed;
                    job.error = Some(format!("{:#}", e));
                    job.run_at = Utc::now() + ChronoDuration::milliseconds(job.backoff_ms as i64);
                    warn!(
                        "Job {} attempt {}/{} failed, retrying in {}ms: {:#}",
                        id, job.attempts_made, job.max_attempts, job.backoff_ms, e
                    );
                    state.delayed.push(id.clone());
                } else {
                    job.state = JobState::Failed;
                    job.error = Some(format!("{:#}", e));
                    job.finished_at = Some(Utc::now());
                    warn!("Job {} failed after {} attempts: {:#}", id, job.attempts_made, e);
                }
            }
        }

        let terminal_snapshot = state
            .jobs
            .get(&id)
            .filter(|job| job.state.is_terminal())
            .cloned();
        if let Some(snapshot) = terminal_snapshot {
            state.resolve_watchers(&id, &snapshot);
            state.finished_order.push_back(id);
            state.prune(&inner.settings);
        }
        drop(guard);

        // Another job may already be waiting
        inner.notify.notify_one();
    }
}
