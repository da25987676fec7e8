pub mod job;
pub mod queue;

pub use job::{Job, JobFilter, JobPatch, JobSpec, JobStats, JobStatus, RecoveryReport};
pub use queue::{DeadLetter, QueuedJob, SchedulingPolicy};
