pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{Result, SchedulerError};
pub use models::{
    DeadLetter, Job, JobFilter, JobPatch, JobSpec, JobStats, JobStatus, QueuedJob, RecoveryReport,
    SchedulingPolicy,
};
pub use traits::{JobStore, ReadyTransport};
