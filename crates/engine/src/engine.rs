use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use jobqueue_core::errors::Result;
use jobqueue_core::models::{JobPatch, JobStatus, QueuedJob, SchedulingPolicy};
use jobqueue_core::traits::{JobStore, ReadyTransport};

use crate::policy::PolicyQueue;

/// 引擎运行参数
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// tick间隔
    pub tick_interval: Duration,
    /// 每个tick从存储摄取的 PENDING 任务上限
    pub batch_size: i64,
    /// 传输层未设置活动策略时采用的策略
    pub default_policy: SchedulingPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            batch_size: 50,
            default_policy: SchedulingPolicy::Fcfs,
        }
    }
}

/// 调度引擎
///
/// 单任务循环，每个tick依次执行：
///
/// 1. 读取传输层的活动策略，变化时重建策略队列并迁移已持有的任务
/// 2. 从存储摄取 PENDING 任务进入策略队列（只读，不改状态）
/// 3. 按策略顺序逐个派发：先提交 PENDING -> SCHEDULED，成功后才推入
///    就绪队列；推入失败则补偿回退为 PENDING
///
/// 引擎只决定顺序，不执行任务。存储不可用时本次tick记录日志放弃，
/// 没有任何状态被破坏，下个tick自然重试。
pub struct SchedulerEngine {
    store: Arc<dyn JobStore>,
    transport: Arc<dyn ReadyTransport>,
    queue: PolicyQueue,
    settings: EngineSettings,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        transport: Arc<dyn ReadyTransport>,
        settings: EngineSettings,
    ) -> Self {
        let queue = PolicyQueue::new(settings.default_policy);
        Self {
            store,
            transport,
            queue,
            settings,
        }
    }

    /// 当前策略队列中待派发的任务数
    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    /// 运行引擎直到收到停止信号
    ///
    /// 启动时先执行崩溃恢复清扫；清扫失败视为初始化错误向上传播。
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let report = self.store.recover().await?;
        if report.scheduled_reset > 0 || report.running_reset > 0 {
            info!(
                "启动恢复完成: {} 个 SCHEDULED 与 {} 个 RUNNING 任务回退为 PENDING",
                report.scheduled_reset, report.running_reset
            );
        }

        info!(
            "调度引擎启动: 策略={}, tick={}ms",
            self.queue.policy(),
            self.settings.tick_interval.as_millis()
        );

        let mut tick = tokio::time::interval(self.settings.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("调度tick失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("调度引擎收到停止信号");
                    break;
                }
            }
        }

        Ok(())
    }

    /// 执行一次完整的调度tick
    pub async fn tick(&mut self) -> Result<()> {
        self.check_policy_change().await?;
        self.ingest_pending().await?;
        self.dispatch_ready().await?;
        Ok(())
    }

    /// 检测策略切换并迁移队列内容
    async fn check_policy_change(&mut self) -> Result<()> {
        let desired = self
            .transport
            .active_policy()
            .await?
            .unwrap_or(self.settings.default_policy);

        if desired == self.queue.policy() {
            return Ok(());
        }

        info!("检测到策略切换: {} -> {}", self.queue.policy(), desired);

        // 旧队列逐个取出重新插入, 待派发集合不变, 顺序按新策略重排
        let mut fresh = PolicyQueue::new(desired);
        let mut migrated = 0usize;
        while let Some(job) = self.queue.next() {
            fresh.offer(job);
            migrated += 1;
        }
        self.queue = fresh;

        if migrated > 0 {
            info!("已按新策略 {} 重排 {} 个待派发任务", desired, migrated);
        }
        Ok(())
    }

    /// 摄取新的 PENDING 任务
    async fn ingest_pending(&mut self) -> Result<()> {
        let jobs = self.store.claim_pending(self.settings.batch_size).await?;

        let mut offered = 0usize;
        for job in &jobs {
            if self.queue.contains(job.id) {
                continue;
            }
            self.queue.offer(QueuedJob::from(job));
            offered += 1;
        }

        if offered > 0 {
            debug!("摄取了 {} 个待调度任务", offered);
        }
        Ok(())
    }

    /// 按策略顺序派发队列中的任务
    async fn dispatch_ready(&mut self) -> Result<()> {
        let mut dispatched = 0u64;

        while let Some(queued) = self.queue.next() {
            let patch = JobPatch {
                scheduled_at: Some(Utc::now()),
                ..Default::default()
            };

            match self
                .store
                .transition(queued.id, JobStatus::Pending, JobStatus::Scheduled, patch)
                .await
            {
                Ok(_) => {
                    // 状态先落库, 之后才产生依赖它的副作用
                    if let Err(e) = self.transport.push_ready(queued.id).await {
                        error!("推入就绪队列失败, 回退任务 {}: {}", queued.id, e);
                        if let Err(comp) = self
                            .store
                            .transition(
                                queued.id,
                                JobStatus::Scheduled,
                                JobStatus::Pending,
                                JobPatch::default(),
                            )
                            .await
                        {
                            // 留在 SCHEDULED, 由下次启动的恢复清扫回收
                            warn!("补偿回退失败, 任务 {} 停留在 SCHEDULED: {}", queued.id, comp);
                        }
                        return Err(e);
                    }
                    dispatched += 1;
                }
                Err(e) if e.is_contention() => {
                    debug!("任务 {} 已被取消或变更, 跳过派发", queued.id);
                }
                Err(e) => return Err(e),
            }
        }

        if dispatched > 0 {
            info!("本次tick派发了 {} 个任务", dispatched);
        }
        Ok(())
    }
}
