use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use jobqueue_core::errors::{Result, SchedulerError};
use jobqueue_core::models::{DeadLetter, JobStatus, SchedulingPolicy};
use jobqueue_core::traits::{JobStore, ReadyTransport};
use jobqueue_engine::{EngineSettings, SchedulerEngine};
use jobqueue_infrastructure::InMemoryTransport;
use jobqueue_testing_utils::{JobBuilder, MockJobStore};

/// 可开关推送失败的传输层包装，用于验证引擎的补偿回退
struct ToggleTransport {
    inner: InMemoryTransport,
    fail_push: AtomicBool,
}

impl ToggleTransport {
    fn new() -> Self {
        Self {
            inner: InMemoryTransport::new(),
            fail_push: AtomicBool::new(false),
        }
    }

    fn set_fail_push(&self, fail: bool) {
        self.fail_push.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReadyTransport for ToggleTransport {
    async fn push_ready(&self, job_id: Uuid) -> Result<()> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(SchedulerError::Transport("模拟推送失败".to_string()));
        }
        self.inner.push_ready(job_id).await
    }

    async fn pop_ready(&self, timeout: Duration) -> Result<Option<Uuid>> {
        self.inner.pop_ready(timeout).await
    }

    async fn queue_depth(&self) -> Result<u64> {
        self.inner.queue_depth().await
    }

    async fn push_dead_letter(&self, entry: &DeadLetter) -> Result<()> {
        self.inner.push_dead_letter(entry).await
    }

    async fn dead_letters(&self, offset: i64, limit: i64) -> Result<Vec<DeadLetter>> {
        self.inner.dead_letters(offset, limit).await
    }

    async fn dead_letter_count(&self) -> Result<u64> {
        self.inner.dead_letter_count().await
    }

    async fn active_policy(&self) -> Result<Option<SchedulingPolicy>> {
        self.inner.active_policy().await
    }

    async fn set_active_policy(&self, policy: SchedulingPolicy) -> Result<()> {
        self.inner.set_active_policy(policy).await
    }

    async fn health_check(&self) -> Result<()> {
        self.inner.health_check().await
    }
}

fn engine_with(
    store: &Arc<MockJobStore>,
    transport: &Arc<InMemoryTransport>,
) -> SchedulerEngine {
    SchedulerEngine::new(
        store.clone() as Arc<dyn JobStore>,
        transport.clone() as Arc<dyn ReadyTransport>,
        EngineSettings::default(),
    )
}

async fn drain_transport(transport: &InMemoryTransport) -> Vec<Uuid> {
    let mut order = Vec::new();
    while let Some(id) = transport
        .pop_ready(Duration::from_millis(20))
        .await
        .unwrap()
    {
        order.push(id);
    }
    order
}

#[tokio::test]
async fn test_tick_dispatches_pending_in_fcfs_order() {
    let store = Arc::new(MockJobStore::new());
    let transport = Arc::new(InMemoryTransport::new());
    let mut engine = engine_with(&store, &transport);

    let base = chrono::Utc::now();
    let mut expected = Vec::new();
    for i in 0..3 {
        let job = JobBuilder::new()
            .with_name(&format!("job-{i}"))
            .with_created_at(base + chrono::Duration::milliseconds(i * 10))
            .build();
        expected.push(job.id);
        store.insert(job);
    }

    engine.tick().await.unwrap();

    assert_eq!(drain_transport(&transport).await, expected);
    for id in &expected {
        let job = store.get(*id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Scheduled);
        assert!(job.scheduled_at.is_some());
    }
}

#[tokio::test]
async fn test_policy_switch_reorders_dispatch() {
    let store = Arc::new(MockJobStore::new());
    let transport = Arc::new(InMemoryTransport::new());
    let mut engine = engine_with(&store, &transport);

    let base = chrono::Utc::now();
    // 先提交低优先级, 后提交高优先级
    let low = JobBuilder::new()
        .with_priority(9)
        .with_created_at(base)
        .build();
    let high = JobBuilder::new()
        .with_priority(1)
        .with_created_at(base + chrono::Duration::milliseconds(10))
        .build();
    let (low_id, high_id) = (low.id, high.id);
    store.insert(low);
    store.insert(high);

    transport
        .set_active_policy(SchedulingPolicy::Priority)
        .await
        .unwrap();

    engine.tick().await.unwrap();

    assert_eq!(drain_transport(&transport).await, vec![high_id, low_id]);
}

#[tokio::test]
async fn test_ten_jobs_follow_priority_after_switch() {
    let store = Arc::new(MockJobStore::new());
    let transport = Arc::new(InMemoryTransport::new());
    let mut engine = engine_with(&store, &transport);

    let base = chrono::Utc::now();
    let mut by_priority = Vec::new();
    for i in 0..10i64 {
        let priority = (10 - i) as i32;
        let job = JobBuilder::new()
            .with_priority(priority)
            .with_created_at(base + chrono::Duration::milliseconds(i))
            .build();
        by_priority.push((priority, job.id));
        store.insert(job);
    }
    by_priority.sort();

    transport
        .set_active_policy(SchedulingPolicy::Priority)
        .await
        .unwrap();
    engine.tick().await.unwrap();

    let expected: Vec<Uuid> = by_priority.into_iter().map(|(_, id)| id).collect();
    assert_eq!(drain_transport(&transport).await, expected);

    // 全部10个任务都被派发, 没有任务在切换中丢失
    for id in &expected {
        assert_eq!(
            store.get(*id).await.unwrap().unwrap().status,
            JobStatus::Scheduled
        );
    }
}

#[tokio::test]
async fn test_canceled_job_in_queue_is_dropped_silently() {
    let store = Arc::new(MockJobStore::new());
    let transport = Arc::new(ToggleTransport::new());
    let mut engine = SchedulerEngine::new(
        store.clone() as Arc<dyn JobStore>,
        transport.clone() as Arc<dyn ReadyTransport>,
        EngineSettings::default(),
    );

    let base = chrono::Utc::now();
    let doomed = JobBuilder::new().with_created_at(base).build();
    let keep = JobBuilder::new()
        .with_created_at(base + chrono::Duration::milliseconds(10))
        .build();
    let (doomed_id, keep_id) = (doomed.id, keep.id);
    store.insert(doomed);
    store.insert(keep);

    // 第一个tick推送失败: doomed 被补偿回 PENDING, keep 留在策略队列中
    transport.set_fail_push(true);
    assert!(engine.tick().await.is_err());
    assert_eq!(engine.queue_size(), 1);

    // keep 仍在队列中时被取消, 派发阶段的CAS会失败并被静默丢弃
    store.delete(keep_id).await.unwrap();
    transport.set_fail_push(false);
    engine.tick().await.unwrap();

    assert_eq!(drain_transport(&transport.inner).await, vec![doomed_id]);
    assert!(store.get(keep_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_push_failure_compensates_back_to_pending() {
    let store = Arc::new(MockJobStore::new());
    let transport = Arc::new(ToggleTransport::new());
    let mut engine = SchedulerEngine::new(
        store.clone() as Arc<dyn JobStore>,
        transport.clone() as Arc<dyn ReadyTransport>,
        EngineSettings::default(),
    );

    let job = JobBuilder::new().build();
    let job_id = job.id;
    store.insert(job);

    transport.set_fail_push(true);
    assert!(engine.tick().await.is_err());

    // 补偿回退: 任务回到 PENDING, 没有消息被推出去
    let job = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(transport.queue_depth().await.unwrap(), 0);

    // 传输恢复后, 下一个tick重新摄取并成功派发
    transport.set_fail_push(false);
    engine.tick().await.unwrap();

    let job = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Scheduled);
    assert_eq!(transport.queue_depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_recover_runs_before_first_tick() {
    let store = Arc::new(MockJobStore::new());
    let transport = Arc::new(InMemoryTransport::new());

    // 上次运行残留的 SCHEDULED 与 RUNNING 任务
    let stuck_scheduled = JobBuilder::new().with_status(JobStatus::Scheduled).build();
    let stuck_running = JobBuilder::new()
        .with_status(JobStatus::Running)
        .with_retry_count(1)
        .build();
    let (sid, rid) = (stuck_scheduled.id, stuck_running.id);
    store.insert(stuck_scheduled);
    store.insert(stuck_running);

    let report = store.recover().await.unwrap();
    assert_eq!(report.scheduled_reset, 1);
    assert_eq!(report.running_reset, 1);

    let scheduled = store.get(sid).await.unwrap().unwrap();
    let running = store.get(rid).await.unwrap().unwrap();
    assert_eq!(scheduled.status, JobStatus::Pending);
    assert_eq!(running.status, JobStatus::Pending);
    // Worker崩溃不计入重试次数
    assert_eq!(running.retry_count, 1);

    // 恢复后的任务走正常的调度路径
    let mut engine = engine_with(&store, &transport);
    engine.tick().await.unwrap();
    assert_eq!(drain_transport(&transport).await.len(), 2);
}

#[tokio::test]
async fn test_duplicate_ingest_is_idempotent() {
    let store = Arc::new(MockJobStore::new());
    let transport = Arc::new(ToggleTransport::new());
    let mut engine = SchedulerEngine::new(
        store.clone() as Arc<dyn JobStore>,
        transport.clone() as Arc<dyn ReadyTransport>,
        EngineSettings::default(),
    );

    let job = JobBuilder::new().build();
    let job_id = job.id;
    store.insert(job);

    // 推送失败使任务停留在 PENDING, 连续多个tick重复摄取同一任务
    transport.set_fail_push(true);
    let _ = engine.tick().await;
    let _ = engine.tick().await;
    assert_eq!(engine.queue_size(), 0, "失败补偿后队列不应堆积任务");

    transport.set_fail_push(false);
    engine.tick().await.unwrap();

    // 任务只被派发一次
    assert_eq!(transport.queue_depth().await.unwrap(), 1);
    let job = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Scheduled);
}
