use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobqueue_core::AppConfig;

use crate::app::{AppMode, Application};
use crate::shutdown::{listen_for_signals, ShutdownManager};

/// 初始化结构化日志
///
/// RUST_LOG 优先，其次是命令行指定的级别。
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("初始化日志失败: {e}"))
}

/// 统一的CLI入口：解析参数、初始化日志、加载配置、运行应用
pub async fn run_cli(name: &'static str, about: &'static str, mode: AppMode) -> Result<()> {
    let matches = Command::new(name)
        .version(env!("CARGO_PKG_VERSION"))
        .about(about)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .map(|s| s.as_str())
        .unwrap_or("info");
    init_logging(log_level)?;

    let config_path = matches.get_one::<String>("config").map(|s| s.as_str());
    let config = AppConfig::load(config_path).context("加载配置失败")?;

    let shutdown = Arc::new(ShutdownManager::new());
    listen_for_signals(Arc::clone(&shutdown));

    let app = Application::new(config, mode);
    app.run(shutdown.subscribe()).await
}
