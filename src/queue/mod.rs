pub mod engine;
pub mod job;

// Re-export common types
pub use engine::{JobHandler, JobQueue};
pub use job::{Job, JobCounts, JobState};
