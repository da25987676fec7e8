use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, info};
use uuid::Uuid;

use jobqueue_core::errors::{Result, SchedulerError};
use jobqueue_core::models::{DeadLetter, SchedulingPolicy};
use jobqueue_core::traits::ReadyTransport;

/// 就绪队列的Redis键
const READY_QUEUE_KEY: &str = "jobqueue:ready";
/// 死信列表的Redis键
const DEAD_LETTER_KEY: &str = "jobqueue:dead_letter";
/// 活动策略的Redis键
const POLICY_KEY: &str = "jobqueue:policy";

/// Redis就绪队列传输实现
///
/// 就绪队列为Redis列表（RPUSH入队尾、BLPOP出队头），死信为追加写的
/// JSON条目列表，活动策略为单个字符串键。
pub struct RedisTransport {
    client: redis::Client,
}

impl RedisTransport {
    /// 创建客户端并验证连通性
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| SchedulerError::Transport(format!("创建Redis客户端失败: {e}")))?;

        let transport = Self { client };
        transport.health_check().await?;

        info!("传输层连接成功: {}", url);
        Ok(transport)
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SchedulerError::Transport(format!("获取Redis连接失败: {e}")))
    }
}

#[async_trait]
impl ReadyTransport for RedisTransport {
    async fn push_ready(&self, job_id: Uuid) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.rpush::<_, _, ()>(READY_QUEUE_KEY, job_id.to_string())
            .await
            .map_err(|e| SchedulerError::Transport(format!("推入就绪队列失败: {e}")))?;

        debug!("任务 {} 已推入就绪队列", job_id);
        Ok(())
    }

    async fn pop_ready(&self, timeout: Duration) -> Result<Option<Uuid>> {
        // BLPOP 会阻塞整条连接, 每次弹出使用独立连接
        let mut conn = self.conn().await?;
        let popped: Option<(String, String)> = conn
            .blpop(READY_QUEUE_KEY, timeout.as_secs_f64())
            .await
            .map_err(|e| SchedulerError::Transport(format!("弹出就绪队列失败: {e}")))?;

        match popped {
            Some((_, raw)) => Uuid::parse_str(&raw)
                .map(Some)
                .map_err(|e| SchedulerError::Transport(format!("非法的任务ID '{raw}': {e}"))),
            None => Ok(None),
        }
    }

    async fn queue_depth(&self) -> Result<u64> {
        let mut conn = self.conn().await?;
        conn.llen(READY_QUEUE_KEY)
            .await
            .map_err(|e| SchedulerError::Transport(format!("查询队列深度失败: {e}")))
    }

    async fn push_dead_letter(&self, entry: &DeadLetter) -> Result<()> {
        let payload = serde_json::to_string(entry)
            .map_err(|e| SchedulerError::Serialization(format!("序列化死信条目失败: {e}")))?;

        let mut conn = self.conn().await?;
        conn.rpush::<_, _, ()>(DEAD_LETTER_KEY, payload)
            .await
            .map_err(|e| SchedulerError::Transport(format!("追加死信条目失败: {e}")))?;

        debug!("任务 {} 已进入死信队列", entry.job_id);
        Ok(())
    }

    async fn dead_letters(&self, offset: i64, limit: i64) -> Result<Vec<DeadLetter>> {
        let mut conn = self.conn().await?;
        let raw: Vec<String> = conn
            .lrange(DEAD_LETTER_KEY, offset as isize, (offset + limit - 1) as isize)
            .await
            .map_err(|e| SchedulerError::Transport(format!("读取死信列表失败: {e}")))?;

        raw.iter()
            .map(|entry| {
                serde_json::from_str(entry).map_err(|e| {
                    SchedulerError::Serialization(format!("反序列化死信条目失败: {e}"))
                })
            })
            .collect()
    }

    async fn dead_letter_count(&self) -> Result<u64> {
        let mut conn = self.conn().await?;
        conn.llen(DEAD_LETTER_KEY)
            .await
            .map_err(|e| SchedulerError::Transport(format!("查询死信数量失败: {e}")))
    }

    async fn active_policy(&self) -> Result<Option<SchedulingPolicy>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn
            .get(POLICY_KEY)
            .await
            .map_err(|e| SchedulerError::Transport(format!("读取活动策略失败: {e}")))?;

        raw.map(|s| s.parse()).transpose()
    }

    async fn set_active_policy(&self, policy: SchedulingPolicy) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(POLICY_KEY, policy.as_str())
            .await
            .map_err(|e| SchedulerError::Transport(format!("写入活动策略失败: {e}")))?;

        info!("活动策略已设置为: {}", policy);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| SchedulerError::Transport(format!("Redis PING失败: {e}")))
    }
}
