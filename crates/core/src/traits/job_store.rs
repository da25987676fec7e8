use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{Job, JobFilter, JobPatch, JobSpec, JobStats, JobStatus, RecoveryReport};

/// 任务存储接口
///
/// 生命周期状态的唯一权威来源。所有状态变更都经由 [`transition`] 的
/// 比较并交换语义串行化，同一任务的状态序列因此保证是状态机的合法前缀。
///
/// [`transition`]: JobStore::transition
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 校验并持久化新任务，初始状态为 PENDING，retry_count 为 0
    async fn create(&self, spec: &JobSpec) -> Result<Job>;

    /// 根据ID获取任务
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    /// 按过滤条件分页查询，created_at 倒序，返回 (当前页, 总数)
    ///
    /// page 从 1 开始计数；page_size 超过实现上限时按上限截断。
    async fn list(&self, filter: &JobFilter, page: i64, page_size: i64)
        -> Result<(Vec<Job>, i64)>;

    /// 原子的状态转移：仅当当前状态等于 `from` 时更新为 `to` 并应用 `patch`
    ///
    /// 当前状态不等于 `from` 时返回 [`SchedulerError::Conflict`]，
    /// 任务不存在时返回 [`SchedulerError::JobNotFound`]。
    ///
    /// [`SchedulerError::Conflict`]: crate::errors::SchedulerError::Conflict
    /// [`SchedulerError::JobNotFound`]: crate::errors::SchedulerError::JobNotFound
    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        patch: JobPatch,
    ) -> Result<Job>;

    /// 删除任务（取消），仅允许 PENDING 或 SCHEDULED 状态
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// 只读地返回至多 `limit` 个 PENDING 任务，created_at 升序
    ///
    /// 供引擎向内存策略队列摄取，不改变任务状态。
    async fn claim_pending(&self, limit: i64) -> Result<Vec<Job>>;

    /// 崩溃恢复：把所有 SCHEDULED 与 RUNNING 任务回退为 PENDING
    ///
    /// 单调度器模型下，引擎启动时不存在存活的 Worker 认领，
    /// 回退不增加 retry_count（未得到处理器裁决的派发不算失败）。
    async fn recover(&self) -> Result<RecoveryReport>;

    /// 各状态计数与已完成任务的平均执行时长
    async fn stats(&self) -> Result<JobStats>;

    /// 存储连通性检查
    async fn health_check(&self) -> Result<()>;
}
