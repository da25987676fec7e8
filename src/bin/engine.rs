use anyhow::Result;
use jobqueue::app::AppMode;
use jobqueue::common::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    run_cli(
        "jobqueue-engine",
        "任务队列系统 - 调度引擎",
        AppMode::Engine,
    )
    .await
}
