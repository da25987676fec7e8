use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

/// 调度系统错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("任务未找到: {id}")]
    JobNotFound { id: Uuid },

    #[error("无效的任务: {0}")]
    InvalidJob(String),

    #[error("状态冲突: 任务 {id} 期望状态 {expected}, 实际状态 {actual}")]
    Conflict {
        id: Uuid,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("非法的状态转移: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("任务 {id} 处于 {status} 状态, 无法取消")]
    NotCancellable { id: Uuid, status: JobStatus },

    #[error("传输层错误: {0}")]
    Transport(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// 判断错误是否为并发竞争（任务被取消或已由他人处理），调用方可直接丢弃
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            SchedulerError::Conflict { .. } | SchedulerError::JobNotFound { .. }
        )
    }
}
