use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle state of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Eligible to run, behind earlier jobs in the queue
    Waiting,

    /// Currently executing in a worker slot
    Active,

    /// Handler returned a result
    Completed,

    /// Handler failed on its last allowed attempt
    Failed,

    /// Scheduled to re-enter the queue after a backoff delay
    Delayed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// A unit of queued asynchronous work with retry semantics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, also used as the correlation id in logs
    pub id: String,

    /// Name of the queue this job belongs to
    pub queue_name: String,

    /// Handler name the payload is dispatched to
    pub task_name: String,

    /// Request payload, persisted as job data
    pub payload: Value,

    pub state: JobState,

    /// Attempts started so far, including the current one when active
    pub attempts_made: u32,

    /// Attempts allowed before the job is marked failed
    pub max_attempts: u32,

    /// Fixed delay before a retry attempt, in milliseconds
    pub backoff_ms: u64,

    /// Handler return value, present once completed
    pub result: Option<Value>,

    /// Captured error message, present once failed
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Earliest time a delayed job may run again
    pub run_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new waiting job
    pub fn new(queue_name: &str, task_name: &str, payload: Value, max_attempts: u32, backoff_ms: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            queue_name: queue_name.to_string(),
            task_name: task_name.to_string(),
            payload,
            state: JobState::Waiting,
            attempts_made: 0,
            max_attempts,
            backoff_ms,
            result: None,
            error: None,
            created_at: now,
            run_at: now,
            finished_at: None,
        }
    }
}

/// Per-state job counts, returned by queue introspection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}
