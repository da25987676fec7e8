use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use jobqueue_core::errors::Result;
use jobqueue_core::models::{DeadLetter, SchedulingPolicy};
use jobqueue_core::traits::ReadyTransport;

/// 内存就绪队列传输实现
///
/// 与Redis实现遵循同一契约，用于测试和无外部依赖的嵌入式运行。
/// 阻塞弹出基于 Notify 实现，多个消费者并发弹出时各取一个条目。
#[derive(Default)]
pub struct InMemoryTransport {
    ready: Mutex<VecDeque<Uuid>>,
    ready_notify: Notify,
    dead_letters: Mutex<Vec<DeadLetter>>,
    policy: Mutex<Option<SchedulingPolicy>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadyTransport for InMemoryTransport {
    async fn push_ready(&self, job_id: Uuid) -> Result<()> {
        self.ready.lock().await.push_back(job_id);
        self.ready_notify.notify_one();
        Ok(())
    }

    async fn pop_ready(&self, timeout: Duration) -> Result<Option<Uuid>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(id) = self.ready.lock().await.pop_front() {
                return Ok(Some(id));
            }

            let notified = self.ready_notify.notified();
            // 注册等待后再检查一次，避免错过注册前到达的通知
            if let Some(id) = self.ready.lock().await.pop_front() {
                return Ok(Some(id));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn queue_depth(&self) -> Result<u64> {
        Ok(self.ready.lock().await.len() as u64)
    }

    async fn push_dead_letter(&self, entry: &DeadLetter) -> Result<()> {
        self.dead_letters.lock().await.push(entry.clone());
        Ok(())
    }

    async fn dead_letters(&self, offset: i64, limit: i64) -> Result<Vec<DeadLetter>> {
        let entries = self.dead_letters.lock().await;
        Ok(entries
            .iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn dead_letter_count(&self) -> Result<u64> {
        Ok(self.dead_letters.lock().await.len() as u64)
    }

    async fn active_policy(&self) -> Result<Option<SchedulingPolicy>> {
        Ok(*self.policy.lock().await)
    }

    async fn set_active_policy(&self, policy: SchedulingPolicy) -> Result<()> {
        *self.policy.lock().await = Some(policy);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_push_pop_fifo_order() {
        let transport = InMemoryTransport::new();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

        for id in &ids {
            transport.push_ready(*id).await.unwrap();
        }
        assert_eq!(transport.queue_depth().await.unwrap(), 3);

        for id in &ids {
            let popped = transport
                .pop_ready(Duration::from_millis(100))
                .await
                .unwrap();
            assert_eq!(popped, Some(*id));
        }
        assert_eq!(transport.queue_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pop_times_out_on_empty_queue() {
        let transport = InMemoryTransport::new();
        let popped = transport
            .pop_ready(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let transport = std::sync::Arc::new(InMemoryTransport::new());
        let id = Uuid::new_v4();

        let consumer = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.pop_ready(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.push_ready(id).await.unwrap();

        let popped = consumer.await.unwrap().unwrap();
        assert_eq!(popped, Some(id));
    }

    #[tokio::test]
    async fn test_dead_letter_append_and_page() {
        let transport = InMemoryTransport::new();
        for i in 0..5 {
            transport
                .push_dead_letter(&DeadLetter {
                    job_id: Uuid::new_v4(),
                    error: format!("error {i}"),
                    retry_count: i,
                    enqueued_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        assert_eq!(transport.dead_letter_count().await.unwrap(), 5);
        let page = transport.dead_letters(2, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].error, "error 2");
        assert_eq!(page[1].error, "error 3");
    }

    #[tokio::test]
    async fn test_policy_key() {
        let transport = InMemoryTransport::new();
        assert!(transport.active_policy().await.unwrap().is_none());

        transport
            .set_active_policy(SchedulingPolicy::Priority)
            .await
            .unwrap();
        assert_eq!(
            transport.active_policy().await.unwrap(),
            Some(SchedulingPolicy::Priority)
        );
    }
}
