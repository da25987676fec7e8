use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use jobqueue_core::errors::Result;
use jobqueue_core::models::{DeadLetter, Job, JobPatch, JobStatus};
use jobqueue_core::traits::{JobStore, ReadyTransport};

use crate::handlers::HandlerRegistry;

/// Worker池构建器
pub struct WorkerPoolBuilder {
    store: Arc<dyn JobStore>,
    transport: Arc<dyn ReadyTransport>,
    handlers: HandlerRegistry,
    pool_size: usize,
    pop_timeout: Duration,
}

impl WorkerPoolBuilder {
    pub fn new(store: Arc<dyn JobStore>, transport: Arc<dyn ReadyTransport>) -> Self {
        Self {
            store,
            transport,
            handlers: HandlerRegistry::with_defaults(),
            pool_size: 4,
            pop_timeout: Duration::from_secs(5),
        }
    }

    /// 替换整个处理器注册表
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// 设置并发执行器数量
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// 设置就绪队列弹出超时
    pub fn pop_timeout(mut self, pop_timeout: Duration) -> Self {
        self.pop_timeout = pop_timeout;
        self
    }

    pub fn build(self) -> WorkerPool {
        let worker_prefix = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "worker".to_string());

        WorkerPool {
            store: self.store,
            transport: self.transport,
            handlers: Arc::new(self.handlers),
            pool_size: self.pool_size,
            pop_timeout: self.pop_timeout,
            worker_prefix,
        }
    }
}

/// Worker池
///
/// 固定数量的并发执行器，各自独立地从就绪队列阻塞弹出任务ID并执行
/// 完整的处理流程。执行器之间只共享存储句柄与传输句柄，单个慢任务
/// 不会阻塞其他执行器。
///
/// 每个任务的流程:
///
/// 1. 弹出ID, 读取任务记录
/// 2. CAS 认领 SCHEDULED -> RUNNING; 冲突说明任务已被取消, 丢弃
/// 3. 按 job_type 查找处理器执行
/// 4. 成功 -> COMPLETED; 失败且有剩余重试 -> RETRIED -> PENDING;
///    重试耗尽 -> FAILED 并追加死信条目
pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    transport: Arc<dyn ReadyTransport>,
    handlers: Arc<HandlerRegistry>,
    pool_size: usize,
    pop_timeout: Duration,
    worker_prefix: String,
}

impl WorkerPool {
    pub fn builder(
        store: Arc<dyn JobStore>,
        transport: Arc<dyn ReadyTransport>,
    ) -> WorkerPoolBuilder {
        WorkerPoolBuilder::new(store, transport)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// 启动全部执行器并运行至收到停止信号
    ///
    /// 停止信号到达时不打断正在执行的任务，执行器完成手头任务后退出。
    pub async fn run(self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let pool = Arc::new(self);
        info!("Worker池启动: {} 个执行器", pool.pool_size);

        let mut handles = Vec::with_capacity(pool.pool_size);
        for index in 0..pool.pool_size {
            let pool = Arc::clone(&pool);
            let shutdown = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                pool.executor_loop(index, shutdown).await;
            }));
        }
        drop(shutdown_rx);

        for handle in handles {
            let _ = handle.await;
        }

        info!("Worker池已停止");
        Ok(())
    }

    async fn executor_loop(&self, index: usize, mut shutdown_rx: broadcast::Receiver<()>) {
        let worker_id = format!("{}-{}", self.worker_prefix, index);
        debug!("执行器 {} 启动", worker_id);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("执行器 {} 收到停止信号", worker_id);
                    break;
                }
                popped = self.transport.pop_ready(self.pop_timeout) => {
                    match popped {
                        Ok(Some(job_id)) => {
                            if let Err(e) = self.process(&worker_id, job_id).await {
                                error!("执行器 {} 处理任务 {} 失败: {}", worker_id, job_id, e);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!("执行器 {} 弹出就绪队列失败: {}", worker_id, e);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }

    /// 执行单个任务的完整生命周期
    async fn process(&self, worker_id: &str, job_id: Uuid) -> Result<()> {
        let Some(job) = self.store.get(job_id).await? else {
            debug!("任务 {} 不存在, 丢弃", job_id);
            return Ok(());
        };

        let claim = JobPatch {
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        let job = match self
            .store
            .transition(job.id, JobStatus::Scheduled, JobStatus::Running, claim)
            .await
        {
            Ok(job) => job,
            Err(e) if e.is_contention() => {
                debug!("任务 {} 已被取消或他人处理, 丢弃", job_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        info!(
            "执行器 {} 开始执行任务 {} [{}]",
            worker_id, job.id, job.job_type
        );

        let Some(handler) = self.handlers.get(&job.job_type) else {
            // 提交校验理应拦截未知类型, 这里是第二道防线: 永久失败, 不重试
            let message = format!("不支持的任务类型: {}", job.job_type);
            error!("执行器 {} {}", worker_id, message);
            return self.fail_permanently(&job, &message).await;
        };

        let started = Instant::now();
        match handler.run(&job.payload).await {
            Ok(mut result) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                if let serde_json::Value::Object(map) = &mut result {
                    map.insert("execution_time_ms".to_string(), json!(elapsed_ms));
                }

                let patch = JobPatch {
                    finished_at: Some(Utc::now()),
                    result: Some(result),
                    ..Default::default()
                };
                self.store
                    .transition(job.id, JobStatus::Running, JobStatus::Completed, patch)
                    .await?;

                info!(
                    "任务 {} [{}] 执行成功, 耗时 {}ms",
                    job.id, job.job_type, elapsed_ms
                );
                Ok(())
            }
            Err(e) => {
                warn!("任务 {} [{}] 执行失败: {}", job.id, job.job_type, e);
                self.handle_failure(&job, &e.to_string()).await
            }
        }
    }

    /// 失败裁决：有剩余重试则回到 PENDING，否则进入 FAILED 终态与死信
    ///
    /// 任务回到 PENDING 后走与新任务相同的调度路径，排序决策始终只在
    /// 引擎一处发生。
    async fn handle_failure(&self, job: &Job, error: &str) -> Result<()> {
        if job.retry_count < job.max_retries {
            let patch = JobPatch {
                retry_count: Some(job.retry_count + 1),
                error_message: Some(error.to_string()),
                ..Default::default()
            };
            self.store
                .transition(job.id, JobStatus::Running, JobStatus::Retried, patch)
                .await?;
            self.store
                .transition(
                    job.id,
                    JobStatus::Retried,
                    JobStatus::Pending,
                    JobPatch::default(),
                )
                .await?;

            info!(
                "任务 {} 将重试 ({}/{})",
                job.id,
                job.retry_count + 1,
                job.max_retries
            );
            Ok(())
        } else {
            self.fail_permanently(job, error).await
        }
    }

    async fn fail_permanently(&self, job: &Job, error: &str) -> Result<()> {
        let patch = JobPatch {
            finished_at: Some(Utc::now()),
            error_message: Some(error.to_string()),
            ..Default::default()
        };
        self.store
            .transition(job.id, JobStatus::Running, JobStatus::Failed, patch)
            .await?;

        self.transport
            .push_dead_letter(&DeadLetter {
                job_id: job.id,
                error: error.to_string(),
                retry_count: job.retry_count,
                enqueued_at: Utc::now(),
            })
            .await?;

        warn!(
            "任务 {} 耗尽重试次数 ({}), 进入死信队列",
            job.id, job.max_retries
        );
        Ok(())
    }

    /// 处理单个任务ID（测试与嵌入场景使用，生产路径走 [`run`]）
    ///
    /// [`run`]: WorkerPool::run
    pub async fn process_one(&self, job_id: Uuid) -> Result<()> {
        self.process("inline", job_id).await
    }
}
