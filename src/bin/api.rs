use anyhow::Result;
use jobqueue::app::AppMode;
use jobqueue::common::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    run_cli(
        "jobqueue-api",
        "任务队列系统 - HTTP管理接口",
        AppMode::Api,
    )
    .await
}
