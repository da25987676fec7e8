use axum::{
    routing::{get, put},
    Router,
};
use std::sync::Arc;

use jobqueue_core::models::SchedulingPolicy;
use jobqueue_core::traits::{JobStore, ReadyTransport};

use crate::handlers::{
    health::health_check,
    jobs::{cancel_job, create_job, get_job, job_stats, list_jobs},
    scheduler::{list_dead_letters, scheduler_status, set_policy},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub transport: Arc<dyn ReadyTransport>,
    pub default_policy: SchedulingPolicy,
    pub worker_pool_size: usize,
    pub default_max_retries: i32,
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/jobs", get(list_jobs).post(create_job))
        .route("/api/jobs/stats", get(job_stats))
        .route("/api/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/api/scheduler/policy", put(set_policy))
        .route("/api/scheduler/status", get(scheduler_status))
        .route("/api/scheduler/dead-letter", get(list_dead_letters))
        .with_state(state)
}
