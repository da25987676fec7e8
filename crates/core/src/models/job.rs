use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, SchedulerError};

/// 内置任务类型，提交校验以此为准
///
/// Worker端的处理器注册表是第二道防线：即使未知类型绕过校验进入队列，
/// 执行阶段也会直接判定为永久失败。
pub const KNOWN_JOB_TYPES: &[&str] = &["sleep", "word_count", "thumbnail"];

/// 任务记录
///
/// 系统中的核心实体，生命周期状态由存储层的CAS转移操作串行化。
///
/// # 字段说明
///
/// - `id`: 任务唯一标识符（UUID v4，创建时生成）
/// - `name`: 人类可读名称
/// - `job_type`: 任务类型，决定执行处理器（"sleep"、"word_count"、"thumbnail"）
/// - `payload`: 处理器输入参数，JSON 格式
/// - `priority`: 优先级，1 最高，10 最低，默认 5
/// - `estimated_duration`: 预估执行时长（秒），SJF 策略的排序依据
/// - `status`: 生命周期状态，见 [`JobStatus`]
/// - `retry_count` / `max_retries`: 重试计数与上限
/// - `result`: 执行成功后的结果，JSON 格式
/// - `error_message`: 最近一次失败的错误信息
/// - `created_at` / `updated_at` / `scheduled_at` / `started_at` / `finished_at`:
///   各生命周期节点的时间戳
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub estimated_duration: f64,
    pub status: JobStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// 任务生命周期状态
///
/// 合法转移见 [`JobStatus::can_transition_to`]；COMPLETED 与 FAILED 为终态。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "RETRIED")]
    Retried,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Retried => "RETRIED",
        }
    }

    /// 判断是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// 判断是否允许取消（删除）
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Scheduled)
    }

    /// 状态机合法转移表
    ///
    /// SCHEDULED -> PENDING 与 RUNNING -> PENDING 仅用于崩溃恢复与补偿回退，
    /// 不出现在正常执行路径上。
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Scheduled)
                | (Scheduled, Running)
                | (Scheduled, Pending)
                | (Running, Completed)
                | (Running, Retried)
                | (Running, Failed)
                | (Running, Pending)
                | (Retried, Pending)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "SCHEDULED" => Ok(JobStatus::Scheduled),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "RETRIED" => Ok(JobStatus::Retried),
            _ => Err(SchedulerError::InvalidJob(format!("未知的任务状态: {s}"))),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for JobStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for JobStatus {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        s.parse::<JobStatus>()
            .map_err(|_| format!("Invalid job status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for JobStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 任务提交参数
///
/// 提交接口的输入，经 [`JobSpec::validate`] 校验后由存储层持久化为
/// status=PENDING、retry_count=0 的新任务。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub job_type: String,
    #[serde(default = "default_payload")]
    pub payload: serde_json::Value,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_estimated_duration")]
    pub estimated_duration: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
}

fn default_payload() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_priority() -> i32 {
    5
}

fn default_estimated_duration() -> f64 {
    1.0
}

fn default_max_retries() -> i32 {
    3
}

impl JobSpec {
    /// 校验提交参数，任何一项不合法都拒绝整次提交
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > 255 {
            return Err(SchedulerError::InvalidJob(
                "任务名称长度必须在 1-255 之间".to_string(),
            ));
        }
        if !KNOWN_JOB_TYPES.contains(&self.job_type.as_str()) {
            return Err(SchedulerError::InvalidJob(format!(
                "未知的任务类型: '{}', 可用类型: {:?}",
                self.job_type, KNOWN_JOB_TYPES
            )));
        }
        if !(1..=10).contains(&self.priority) {
            return Err(SchedulerError::InvalidJob(format!(
                "优先级必须在 1-10 之间: {}",
                self.priority
            )));
        }
        if !self.estimated_duration.is_finite() || self.estimated_duration < 0.0 {
            return Err(SchedulerError::InvalidJob(format!(
                "预估时长必须为非负有限值: {}",
                self.estimated_duration
            )));
        }
        if !(0..=10).contains(&self.max_retries) {
            return Err(SchedulerError::InvalidJob(format!(
                "最大重试次数必须在 0-10 之间: {}",
                self.max_retries
            )));
        }
        Ok(())
    }
}

/// 状态转移时附带的字段更新
///
/// `None` 表示保持原值；retry_count 只增不减由调用方保证。
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub retry_count: Option<i32>,
}

/// 任务查询过滤条件
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
}

/// 各状态任务计数与平均执行时长
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStats {
    pub total: i64,
    pub pending: i64,
    pub scheduled: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub retried: i64,
    pub avg_execution_ms: Option<f64>,
}

/// 引擎启动时的状态恢复报告
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// SCHEDULED 回退为 PENDING 的任务数（可能从未推入就绪队列）
    pub scheduled_reset: u64,
    /// RUNNING 回退为 PENDING 的任务数（Worker 崩溃，retry_count 不变）
    pub running_reset: u64,
}

impl Job {
    /// 判断任务是否处于可被引擎摄取的状态
    pub fn is_pending(&self) -> bool {
        matches!(self.status, JobStatus::Pending)
    }

    /// 执行耗时（毫秒），仅在 started_at 与 finished_at 均已设置时有值
    pub fn execution_duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => Some((finished - started).num_milliseconds()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> JobSpec {
        JobSpec {
            name: "test".to_string(),
            job_type: "sleep".to_string(),
            payload: serde_json::json!({"duration": 0.1}),
            priority: 5,
            estimated_duration: 1.0,
            max_retries: 3,
        }
    }

    #[test]
    fn test_spec_validation() {
        assert!(sample_spec().validate().is_ok());

        let mut spec = sample_spec();
        spec.name = String::new();
        assert!(spec.validate().is_err());

        let mut spec = sample_spec();
        spec.job_type = "no_such_type".to_string();
        assert!(spec.validate().is_err());

        let mut spec = sample_spec();
        spec.priority = 0;
        assert!(spec.validate().is_err());
        spec.priority = 11;
        assert!(spec.validate().is_err());

        let mut spec = sample_spec();
        spec.estimated_duration = -1.0;
        assert!(spec.validate().is_err());
        spec.estimated_duration = f64::NAN;
        assert!(spec.validate().is_err());

        let mut spec = sample_spec();
        spec.max_retries = 11;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_legal_transitions() {
        use JobStatus::*;

        assert!(Pending.can_transition_to(Scheduled));
        assert!(Scheduled.can_transition_to(Running));
        assert!(Scheduled.can_transition_to(Pending));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Retried));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Pending));
        assert!(Retried.can_transition_to(Pending));

        // 不允许跳过任何边
        assert!(!Pending.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Scheduled.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Retried.can_transition_to(Running));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Scheduled,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Retried,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("BOGUS".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_and_cancellable() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());

        assert!(JobStatus::Pending.is_cancellable());
        assert!(JobStatus::Scheduled.is_cancellable());
        assert!(!JobStatus::Running.is_cancellable());
        assert!(!JobStatus::Completed.is_cancellable());
    }
}
