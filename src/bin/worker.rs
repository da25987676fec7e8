use anyhow::Result;
use jobqueue::app::AppMode;
use jobqueue::common::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    run_cli(
        "jobqueue-worker",
        "任务队列系统 - Worker池",
        AppMode::Worker,
    )
    .await
}
