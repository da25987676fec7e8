use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{DeadLetter, SchedulingPolicy};

/// 就绪队列传输接口
///
/// 引擎与Worker之间的进程间交接点，包含三部分：
///
/// - 就绪队列：有序的任务ID列表，引擎追加到尾部，Worker从头部阻塞弹出
/// - 死信列表：追加写的JSON条目，记录耗尽重试的任务
/// - 活动策略键：单个策略名字符串，策略切换接口写、引擎读
///
/// 引擎是就绪队列的唯一写者；多个Worker并发弹出时各自观察到的
/// 交错都与FIFO一致。
#[async_trait]
pub trait ReadyTransport: Send + Sync {
    /// 把任务ID追加到就绪队列尾部
    async fn push_ready(&self, job_id: Uuid) -> Result<()>;

    /// 从就绪队列头部阻塞弹出一个任务ID，超时返回 None
    async fn pop_ready(&self, timeout: Duration) -> Result<Option<Uuid>>;

    /// 就绪队列当前深度
    async fn queue_depth(&self) -> Result<u64>;

    /// 追加死信条目
    async fn push_dead_letter(&self, entry: &DeadLetter) -> Result<()>;

    /// 分页读取死信条目，offset 从 0 开始
    async fn dead_letters(&self, offset: i64, limit: i64) -> Result<Vec<DeadLetter>>;

    /// 死信条目总数
    async fn dead_letter_count(&self) -> Result<u64>;

    /// 读取活动策略，未设置时返回 None
    async fn active_policy(&self) -> Result<Option<SchedulingPolicy>>;

    /// 写入活动策略，引擎在下一个tick生效
    async fn set_active_policy(&self, policy: SchedulingPolicy) -> Result<()>;

    /// 传输层连通性检查
    async fn health_check(&self) -> Result<()>;
}
