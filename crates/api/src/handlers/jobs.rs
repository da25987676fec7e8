use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jobqueue_core::errors::SchedulerError;
use jobqueue_core::models::{JobFilter, JobSpec, JobStats, JobStatus};

use crate::{
    error::{ApiError, ApiResult},
    response::{created, no_content, success, PaginatedResponse},
    routes::AppState,
};

/// 任务提交请求
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    pub job_type: String,
    pub payload: Option<serde_json::Value>,
    pub priority: Option<i32>,
    pub estimated_duration: Option<f64>,
    pub max_retries: Option<i32>,
}

/// 任务查询参数
#[derive(Debug, Deserialize)]
pub struct JobQueryParams {
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// 统计响应：各状态计数加上队列与死信深度
#[derive(Debug, Serialize)]
pub struct JobStatsResponse {
    #[serde(flatten)]
    pub jobs: JobStats,
    pub queue_depth: u64,
    pub dead_letter_count: u64,
}

/// 提交新任务
///
/// 任务以 PENDING 状态持久化即告受理，这里不触碰就绪队列，
/// 派发是引擎的职责。要么持久化成功，要么调用方收到 4xx/5xx。
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let spec = JobSpec {
        name: request.name,
        job_type: request.job_type,
        payload: request
            .payload
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
        priority: request.priority.unwrap_or(5),
        estimated_duration: request.estimated_duration.unwrap_or(1.0),
        max_retries: request.max_retries.unwrap_or(state.default_max_retries),
    };

    let job = state.store.create(&spec).await?;
    Ok(created(job))
}

/// 分页查询任务列表
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let status = params
        .status
        .as_deref()
        .map(|s| {
            s.parse::<JobStatus>()
                .map_err(|_| ApiError::BadRequest(format!("未知的任务状态: {s}")))
        })
        .transpose()?;

    let filter = JobFilter {
        status,
        job_type: params.job_type.clone(),
    };
    let page = params.page.unwrap_or(1);
    let page_size = params.page_size.unwrap_or(20);

    let (items, total) = state.store.list(&filter, page, page_size).await?;
    Ok(success(PaginatedResponse::new(items, total, page, page_size)))
}

/// 聚合统计
pub async fn job_stats(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let jobs = state.store.stats().await?;
    let queue_depth = state.transport.queue_depth().await?;
    let dead_letter_count = state.transport.dead_letter_count().await?;

    Ok(success(JobStatsResponse {
        jobs,
        queue_depth,
        dead_letter_count,
    }))
}

/// 获取单个任务
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let job = state
        .store
        .get(id)
        .await?
        .ok_or(ApiError::Scheduler(SchedulerError::JobNotFound { id }))?;
    Ok(success(job))
}

/// 取消任务
///
/// 仅 PENDING 与 SCHEDULED 可取消；已在就绪队列上的ID会被Worker
/// 在认领转移失败时自然丢弃。
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl axum::response::IntoResponse> {
    state.store.delete(id).await?;
    Ok(no_content())
}
