use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SchedulerError;
use crate::models::Job;

/// 调度决策用的轻量任务摘要
///
/// 策略队列只需要排序所需的字段，不持有完整任务记录，
/// 使策略层无需依赖存储层即可单独测试。
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: Uuid,
    pub priority: i32,
    pub estimated_duration: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&Job> for QueuedJob {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            priority: job.priority,
            estimated_duration: job.estimated_duration,
            created_at: job.created_at,
        }
    }
}

/// 死信队列条目
///
/// 任务耗尽全部重试次数进入 FAILED 终态后，由 Worker 追加到传输层的
/// 死信列表，供外部接口检视。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job_id: Uuid,
    pub error: String,
    pub retry_count: i32,
    pub enqueued_at: DateTime<Utc>,
}

/// 调度策略名称
///
/// 活动策略以字符串形式保存在传输层的键值区，由策略切换接口写入、
/// 引擎每个tick读取。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchedulingPolicy {
    #[serde(rename = "fcfs")]
    Fcfs,
    #[serde(rename = "sjf")]
    Sjf,
    #[serde(rename = "priority")]
    Priority,
    #[serde(rename = "round_robin")]
    RoundRobin,
}

impl SchedulingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulingPolicy::Fcfs => "fcfs",
            SchedulingPolicy::Sjf => "sjf",
            SchedulingPolicy::Priority => "priority",
            SchedulingPolicy::RoundRobin => "round_robin",
        }
    }
}

impl std::fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SchedulingPolicy {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fcfs" => Ok(SchedulingPolicy::Fcfs),
            "sjf" => Ok(SchedulingPolicy::Sjf),
            "priority" => Ok(SchedulingPolicy::Priority),
            "round_robin" => Ok(SchedulingPolicy::RoundRobin),
            _ => Err(SchedulerError::Configuration(format!(
                "未知的调度策略: '{s}', 可用策略: fcfs, sjf, priority, round_robin"
            ))),
        }
    }
}
