//! 端到端生命周期测试
//!
//! 用内存存储与内存传输把引擎和Worker池接成完整系统，验证从提交到
//! 终态的全链路行为。

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;

use jobqueue_core::models::{JobStatus, SchedulingPolicy};
use jobqueue_core::traits::{JobStore, ReadyTransport};
use jobqueue_engine::{EngineSettings, SchedulerEngine};
use jobqueue_infrastructure::InMemoryTransport;
use jobqueue_testing_utils::{JobBuilder, MockJobStore};
use jobqueue_worker::WorkerPool;

struct TestSystem {
    store: Arc<MockJobStore>,
    transport: Arc<InMemoryTransport>,
    shutdown_tx: broadcast::Sender<()>,
    engine_handle: tokio::task::JoinHandle<jobqueue_core::Result<()>>,
    pool_handle: tokio::task::JoinHandle<jobqueue_core::Result<()>>,
}

/// 启动完整系统: 快速tick的引擎 + Worker池
fn start_system(pool_size: usize) -> TestSystem {
    start_system_with(
        Arc::new(MockJobStore::new()),
        Arc::new(InMemoryTransport::new()),
        pool_size,
    )
}

/// 用预置好状态的存储与传输启动系统
fn start_system_with(
    store: Arc<MockJobStore>,
    transport: Arc<InMemoryTransport>,
    pool_size: usize,
) -> TestSystem {
    let (shutdown_tx, _) = broadcast::channel(4);

    let engine = SchedulerEngine::new(
        store.clone() as Arc<dyn JobStore>,
        transport.clone() as Arc<dyn ReadyTransport>,
        EngineSettings {
            tick_interval: Duration::from_millis(10),
            ..Default::default()
        },
    );
    let engine_handle = tokio::spawn(engine.run(shutdown_tx.subscribe()));

    let pool = WorkerPool::builder(
        store.clone() as Arc<dyn JobStore>,
        transport.clone() as Arc<dyn ReadyTransport>,
    )
    .pool_size(pool_size)
    .pop_timeout(Duration::from_millis(50))
    .build();
    let pool_handle = tokio::spawn(pool.run(shutdown_tx.subscribe()));

    TestSystem {
        store,
        transport,
        shutdown_tx,
        engine_handle,
        pool_handle,
    }
}

impl TestSystem {
    /// 等待直到谓词满足或超时
    async fn wait_until<F>(&self, what: &str, mut predicate: F)
    where
        F: FnMut(&[jobqueue_core::models::Job]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let jobs = self.store.all_jobs();
            if predicate(&jobs) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "等待超时: {what}, 当前状态: {:?}",
                jobs.iter().map(|j| (j.id, j.status)).collect::<Vec<_>>()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        self.engine_handle.await.unwrap().unwrap();
        self.pool_handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_happy_path_three_sleep_jobs_complete() {
    let system = start_system(4);

    let mut ids = Vec::new();
    for i in 0..3 {
        let spec = JobBuilder::new()
            .with_name(&format!("sleep-{i}"))
            .with_payload(json!({"duration": 0.01}))
            .build_spec();
        ids.push(system.store.create(&spec).await.unwrap().id);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    system
        .wait_until("三个任务全部完成", |jobs| {
            jobs.iter().all(|j| j.status == JobStatus::Completed)
        })
        .await;

    for id in ids {
        let job = system.store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retry_count, 0);
        assert!(job.scheduled_at.is_some());
        assert!(job.finished_at.unwrap() >= job.started_at.unwrap());
        assert_eq!(job.result.as_ref().unwrap()["slept_for"], json!(0.01));
    }

    system.stop().await;
}

#[tokio::test]
async fn test_priority_policy_orders_execution() {
    let store = Arc::new(MockJobStore::new());
    let transport = Arc::new(InMemoryTransport::new());

    // 引擎启动前预置任务与策略, 第一个tick同时看到两个任务
    transport
        .set_active_policy(SchedulingPolicy::Priority)
        .await
        .unwrap();
    let base = chrono::Utc::now();
    let low = JobBuilder::new()
        .with_name("low")
        .with_priority(9)
        .with_payload(json!({"duration": 0.0}))
        .with_created_at(base)
        .build();
    let high = JobBuilder::new()
        .with_name("high")
        .with_priority(1)
        .with_payload(json!({"duration": 0.0}))
        .with_created_at(base + chrono::Duration::milliseconds(5))
        .build();
    let (low_id, high_id) = (low.id, high.id);
    store.insert(low);
    store.insert(high);

    // 单Worker下执行开始顺序即派发顺序
    let system = start_system_with(store, transport, 1);

    system
        .wait_until("两个任务全部完成", |jobs| {
            jobs.iter().all(|j| j.status == JobStatus::Completed)
        })
        .await;

    let low = system.store.get(low_id).await.unwrap().unwrap();
    let high = system.store.get(high_id).await.unwrap().unwrap();
    assert!(high.started_at.unwrap() <= low.started_at.unwrap());

    system.stop().await;
}

#[tokio::test]
async fn test_failing_job_retries_then_dead_letters() {
    let system = start_system(2);

    let spec = JobBuilder::new()
        .with_name("doomed")
        .with_payload(json!({"duration": 0.0, "fail_probability": 1.0}))
        .with_max_retries(2)
        .build_spec();
    let job = system.store.create(&spec).await.unwrap();

    system
        .wait_until("任务进入FAILED终态", |jobs| {
            jobs.iter().all(|j| j.status == JobStatus::Failed)
        })
        .await;

    let job = system.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.retry_count, 2);
    assert!(job.error_message.unwrap().contains("模拟失败"));
    assert!(job.finished_at.unwrap() >= job.started_at.unwrap());

    let entries = system.transport.dead_letters(0, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].job_id, job.id);
    assert_eq!(entries[0].retry_count, 2);

    system.stop().await;
}

#[tokio::test]
async fn test_cancel_pending_job_is_idempotent_not_found_after() {
    let store = Arc::new(MockJobStore::new());

    let job = store
        .create(&JobBuilder::new().with_name("to-cancel").build_spec())
        .await
        .unwrap();
    let other = store
        .create(&JobBuilder::new().with_name("untouched").build_spec())
        .await
        .unwrap();

    store.delete(job.id).await.unwrap();
    assert!(store.get(job.id).await.unwrap().is_none());

    // 第二次取消: NotFound, 且不影响其他任务
    let err = store.delete(job.id).await.unwrap_err();
    assert!(matches!(
        err,
        jobqueue_core::SchedulerError::JobNotFound { .. }
    ));
    assert!(store.get(other.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_submit_validation_round_trip() {
    let store = Arc::new(MockJobStore::new());

    let spec = JobBuilder::new()
        .with_name("roundtrip")
        .with_job_type("word_count")
        .with_payload(json!({"file_path": "/data/sample.txt"}))
        .with_priority(2)
        .with_estimated_duration(3.5)
        .with_max_retries(1)
        .build_spec();

    let created = store.create(&spec).await.unwrap();
    let fetched = store.get(created.id).await.unwrap().unwrap();

    assert_eq!(fetched.name, "roundtrip");
    assert_eq!(fetched.job_type, "word_count");
    assert_eq!(fetched.payload, json!({"file_path": "/data/sample.txt"}));
    assert_eq!(fetched.priority, 2);
    assert_eq!(fetched.estimated_duration, 3.5);
    assert_eq!(fetched.max_retries, 1);
    assert_eq!(fetched.status, JobStatus::Pending);
    assert_eq!(fetched.retry_count, 0);
}
