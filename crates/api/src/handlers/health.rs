use axum::response::IntoResponse;

use crate::response::success;

/// 控制平面健康检查
pub async fn health_check() -> impl IntoResponse {
    success(serde_json::json!({
        "status": "ok",
        "service": "orchestrator",
    }))
}
