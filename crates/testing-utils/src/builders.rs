//! 测试数据构造器

use chrono::{DateTime, Utc};
use uuid::Uuid;

use jobqueue_core::models::{Job, JobSpec, JobStatus};

/// 任务构造器
///
/// `build_spec` 产出提交参数（走正常的create路径），`build` 直接产出
/// 任务记录（配合 `MockJobStore::insert` 构造任意状态的前置条件）。
pub struct JobBuilder {
    name: String,
    job_type: String,
    payload: serde_json::Value,
    priority: i32,
    estimated_duration: f64,
    max_retries: i32,
    status: JobStatus,
    retry_count: i32,
    created_at: DateTime<Utc>,
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            name: "test_job".to_string(),
            job_type: "sleep".to_string(),
            payload: serde_json::json!({"duration": 0.0}),
            priority: 5,
            estimated_duration: 1.0,
            max_retries: 3,
            status: JobStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_job_type(mut self, job_type: &str) -> Self {
        self.job_type = job_type.to_string();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimated_duration(mut self, estimated_duration: f64) -> Self {
        self.estimated_duration = estimated_duration;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_retry_count(mut self, retry_count: i32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn build_spec(&self) -> JobSpec {
        JobSpec {
            name: self.name.clone(),
            job_type: self.job_type.clone(),
            payload: self.payload.clone(),
            priority: self.priority,
            estimated_duration: self.estimated_duration,
            max_retries: self.max_retries,
        }
    }

    pub fn build(&self) -> Job {
        Job {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            job_type: self.job_type.clone(),
            payload: self.payload.clone(),
            priority: self.priority,
            estimated_duration: self.estimated_duration,
            status: self.status,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            result: None,
            error_message: None,
            created_at: self.created_at,
            updated_at: self.created_at,
            scheduled_at: None,
            started_at: None,
            finished_at: None,
        }
    }
}
