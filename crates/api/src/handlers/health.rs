use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::routes::AppState;

/// 健康检查
///
/// 分别探测存储与传输层，任一不可达时整体降级但仍返回 200，
/// 由调用方根据字段判断。
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.store.health_check().await.is_ok();
    let transport_ok = state.transport.health_check().await.is_ok();

    let status = if store_ok && transport_ok {
        "healthy"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "store": if store_ok { "ok" } else { "down" },
        "transport": if transport_ok { "ok" } else { "down" },
    }))
}
