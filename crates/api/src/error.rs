use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use jobqueue_core::errors::SchedulerError;

/// API错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            ApiError::Scheduler(SchedulerError::JobNotFound { .. }) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Scheduler(SchedulerError::InvalidJob(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Scheduler(SchedulerError::NotCancellable { .. }) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            ApiError::Scheduler(SchedulerError::Conflict { .. }) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            ApiError::Scheduler(SchedulerError::Database(_))
            | ApiError::Scheduler(SchedulerError::Transport(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "存储或传输层暂时不可用".to_string(),
            ),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Scheduler(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "内部服务器错误".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "code": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

/// API结果类型
pub type ApiResult<T> = Result<T, ApiError>;
