use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info};

/// 优雅关闭管理器
///
/// 广播通道的单一持有者，进程信号与组件退出共用同一个关闭信号。
pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self { shutdown_tx }
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// 触发关闭，忽略无订阅者的情况
    pub fn shutdown(&self) {
        info!("触发系统关闭");
        let _ = self.shutdown_tx.send(());
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 监听进程信号并触发关闭
///
/// Unix 下同时响应 Ctrl-C 与 SIGTERM（容器停止时收到的信号）。
pub fn listen_for_signals(manager: Arc<ShutdownManager>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("监听Ctrl-C失败: {}", e);
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => error!("监听SIGTERM失败: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("收到Ctrl-C信号"),
            _ = terminate => info!("收到SIGTERM信号"),
        }

        manager.shutdown();
    });
}
