//! 内存任务存储
//!
//! 完整实现 [`JobStore`] 契约（包括CAS转移对 Conflict 与 NotFound 的
//! 区分），让引擎与Worker的并发竞争路径无需数据库即可测试。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use jobqueue_core::errors::{Result, SchedulerError};
use jobqueue_core::models::{
    Job, JobFilter, JobPatch, JobSpec, JobStats, JobStatus, RecoveryReport,
};
use jobqueue_core::traits::JobStore;

const MAX_PAGE_SIZE: i64 = 100;

/// 内存版任务存储
#[derive(Debug, Clone, Default)]
pub struct MockJobStore {
    jobs: Arc<Mutex<HashMap<Uuid, Job>>>,
}

impl MockJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// 直接写入任务记录, 绕过create校验, 用于构造特定状态的前置条件
    pub fn insert(&self, job: Job) {
        self.jobs.lock().unwrap().insert(job.id, job);
    }

    pub fn all_jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }

    pub fn clear(&self) {
        self.jobs.lock().unwrap().clear();
    }
}

#[async_trait]
impl JobStore for MockJobStore {
    async fn create(&self, spec: &JobSpec) -> Result<Job> {
        spec.validate()?;

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            name: spec.name.clone(),
            job_type: spec.job_type.clone(),
            payload: spec.payload.clone(),
            priority: spec.priority,
            estimated_duration: spec.estimated_duration,
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries: spec.max_retries,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            started_at: None,
            finished_at: None,
        };

        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn list(
        &self,
        filter: &JobFilter,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Job>, i64)> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

        let jobs = self.jobs.lock().unwrap();
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|job| {
                filter.status.map_or(true, |s| job.status == s)
                    && filter
                        .job_type
                        .as_ref()
                        .map_or(true, |t| &job.job_type == t)
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matched.len() as i64;

        let offset = ((page - 1) * page_size) as usize;
        let items = matched
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();
        Ok((items, total))
    }

    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        patch: JobPatch,
    ) -> Result<Job> {
        if !from.can_transition_to(to) {
            return Err(SchedulerError::InvalidTransition { from, to });
        }

        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or(SchedulerError::JobNotFound { id })?;

        if job.status != from {
            return Err(SchedulerError::Conflict {
                id,
                expected: from,
                actual: job.status,
            });
        }

        job.status = to;
        job.updated_at = Utc::now();
        if let Some(scheduled_at) = patch.scheduled_at {
            job.scheduled_at = Some(scheduled_at);
        }
        if let Some(started_at) = patch.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(finished_at) = patch.finished_at {
            job.finished_at = Some(finished_at);
        }
        if let Some(result) = patch.result {
            job.result = Some(result);
        }
        if let Some(error_message) = patch.error_message {
            job.error_message = Some(error_message);
        }
        if let Some(retry_count) = patch.retry_count {
            job.retry_count = retry_count;
        }

        Ok(job.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get(&id).ok_or(SchedulerError::JobNotFound { id })?;

        if !job.status.is_cancellable() {
            return Err(SchedulerError::NotCancellable {
                id,
                status: job.status,
            });
        }

        jobs.remove(&id);
        Ok(())
    }

    async fn claim_pending(&self, limit: i64) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap();
        let mut pending: Vec<Job> = jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .cloned()
            .collect();

        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn recover(&self) -> Result<RecoveryReport> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut report = RecoveryReport::default();

        for job in jobs.values_mut() {
            match job.status {
                JobStatus::Scheduled => {
                    job.status = JobStatus::Pending;
                    job.scheduled_at = None;
                    job.updated_at = Utc::now();
                    report.scheduled_reset += 1;
                }
                JobStatus::Running => {
                    job.status = JobStatus::Pending;
                    job.started_at = None;
                    job.updated_at = Utc::now();
                    report.running_reset += 1;
                }
                _ => {}
            }
        }

        Ok(report)
    }

    async fn stats(&self) -> Result<JobStats> {
        let jobs = self.jobs.lock().unwrap();
        let mut stats = JobStats {
            total: jobs.len() as i64,
            pending: 0,
            scheduled: 0,
            running: 0,
            completed: 0,
            failed: 0,
            retried: 0,
            avg_execution_ms: None,
        };

        let mut durations = Vec::new();
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Scheduled => stats.scheduled += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => {
                    stats.completed += 1;
                    if let Some(ms) = job.execution_duration_ms() {
                        durations.push(ms as f64);
                    }
                }
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Retried => stats.retried += 1,
            }
        }

        if !durations.is_empty() {
            stats.avg_execution_ms = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        Ok(stats)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
