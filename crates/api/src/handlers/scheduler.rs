use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobqueue_core::models::SchedulingPolicy;

use crate::{
    error::{ApiError, ApiResult},
    response::{success, PaginatedResponse},
    routes::AppState,
};

/// 策略切换请求
#[derive(Debug, Deserialize)]
pub struct SetPolicyRequest {
    pub policy: String,
}

/// 策略切换响应
#[derive(Debug, Serialize)]
pub struct PolicyResponse {
    pub policy: SchedulingPolicy,
    pub effective_at: DateTime<Utc>,
}

/// 调度器状态响应
#[derive(Debug, Serialize)]
pub struct SchedulerStatusResponse {
    pub policy: SchedulingPolicy,
    pub queue_depth: u64,
    pub pool_size: usize,
}

/// 死信查询参数
#[derive(Debug, Deserialize)]
pub struct DeadLetterQueryParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// 运行时切换调度策略
///
/// 只写传输层的活动策略键；引擎在下一个tick读取到变化后重建
/// 内存队列并按新策略重排待派发任务，无需重启任何进程。
pub async fn set_policy(
    State(state): State<AppState>,
    Json(request): Json<SetPolicyRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let policy: SchedulingPolicy = request
        .policy
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("未知的调度策略: {}", request.policy)))?;

    state.transport.set_active_policy(policy).await?;

    Ok(success(PolicyResponse {
        policy,
        effective_at: Utc::now(),
    }))
}

/// 查看当前调度器状态
pub async fn scheduler_status(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let policy = state
        .transport
        .active_policy()
        .await?
        .unwrap_or(state.default_policy);
    let queue_depth = state.transport.queue_depth().await?;

    Ok(success(SchedulerStatusResponse {
        policy,
        queue_depth,
        pool_size: state.worker_pool_size,
    }))
}

/// 分页查看死信队列
pub async fn list_dead_letters(
    State(state): State<AppState>,
    Query(params): Query<DeadLetterQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * page_size;

    let total = state.transport.dead_letter_count().await? as i64;
    let items = state.transport.dead_letters(offset, page_size).await?;

    Ok(success(PaginatedResponse::new(items, total, page, page_size)))
}
