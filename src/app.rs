use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

use jobqueue_api::{create_routes, AppState};
use jobqueue_core::traits::{JobStore, ReadyTransport};
use jobqueue_core::AppConfig;
use jobqueue_engine::{EngineSettings, SchedulerEngine};
use jobqueue_infrastructure::{PostgresJobStore, RedisTransport};
use jobqueue_worker::WorkerPool;

/// 启动宽限期内的连接尝试次数
const STARTUP_CONNECT_ATTEMPTS: u32 = 5;
/// 连接重试间隔
const STARTUP_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// 带启动宽限期的连接：宽限期内重试，耗尽后错误向上传播使进程
/// 以非零退出码结束
async fn connect_with_grace<T, F, Fut>(target: &str, mut connect: F) -> jobqueue_core::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = jobqueue_core::Result<T>>,
{
    for attempt in 1..STARTUP_CONNECT_ATTEMPTS {
        match connect().await {
            Ok(connected) => return Ok(connected),
            Err(e) => {
                warn!(
                    "连接{}失败 (尝试 {}/{}): {}",
                    target, attempt, STARTUP_CONNECT_ATTEMPTS, e
                );
                tokio::time::sleep(STARTUP_RETRY_INTERVAL).await;
            }
        }
    }
    // 最后一次尝试的错误原样向上传播
    connect().await
}

/// 应用运行模式
#[derive(Debug, Clone, Copy)]
pub enum AppMode {
    /// HTTP管理接口
    Api,
    /// 调度引擎
    Engine,
    /// Worker池
    Worker,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        Self { config, mode }
    }

    /// 建立外部连接并运行对应组件直到关闭信号
    ///
    /// 启动期的存储/传输连接失败是致命错误，向上传播后进程以
    /// 非零退出码结束；运行期的同类错误由各组件自行退避重试。
    pub async fn run(self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序, 模式: {:?}", self.mode);

        let store_url = self.config.store.url.clone();
        let max_connections = self.config.store.max_connections;
        let store: Arc<dyn JobStore> = Arc::new(
            connect_with_grace("任务存储", || {
                PostgresJobStore::connect(&store_url, max_connections)
            })
            .await
            .context("连接任务存储失败")?,
        );

        let transport_url = self.config.transport.url.clone();
        let transport: Arc<dyn ReadyTransport> = Arc::new(
            connect_with_grace("传输层", || RedisTransport::connect(&transport_url))
                .await
                .context("连接传输层失败")?,
        );

        match self.mode {
            AppMode::Api => self.run_api(store, transport, shutdown_rx).await,
            AppMode::Engine => self.run_engine(store, transport, shutdown_rx).await,
            AppMode::Worker => self.run_worker(store, transport, shutdown_rx).await,
        }
    }

    async fn run_api(
        &self,
        store: Arc<dyn JobStore>,
        transport: Arc<dyn ReadyTransport>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let state = AppState {
            store,
            transport,
            default_policy: self.config.default_policy(),
            worker_pool_size: self.config.worker.pool_size,
            default_max_retries: self.config.worker.default_max_retries,
        };
        let router = create_routes(state);

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
        info!("API服务监听于 {}", self.config.api.bind_address);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务收到停止信号");
            })
            .await
            .context("API服务运行失败")?;

        Ok(())
    }

    async fn run_engine(
        &self,
        store: Arc<dyn JobStore>,
        transport: Arc<dyn ReadyTransport>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let settings = EngineSettings {
            tick_interval: Duration::from_millis(self.config.engine.tick_ms),
            batch_size: self.config.engine.batch_size,
            default_policy: self.config.default_policy(),
        };

        let engine = SchedulerEngine::new(store, transport, settings);
        engine
            .run(shutdown_rx)
            .await
            .context("调度引擎运行失败")?;

        Ok(())
    }

    async fn run_worker(
        &self,
        store: Arc<dyn JobStore>,
        transport: Arc<dyn ReadyTransport>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let pool = WorkerPool::builder(store, transport)
            .pool_size(self.config.worker.pool_size)
            .pop_timeout(Duration::from_secs(self.config.worker.pop_timeout_s))
            .build();

        pool.run(shutdown_rx).await.context("Worker池运行失败")?;
        Ok(())
    }
}
