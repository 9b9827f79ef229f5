use axum::extract::{Path, State};
use axum::response::IntoResponse;

use orchestrator_domain::models::HandoffRequest;

use crate::error::ApiResult;
use crate::response::{created, success};
use crate::routes::AppState;

/// 触发任务迁移
///
/// 未指定目标时由协调器按评分自动选择；同一任务的并发迁移
/// 请求返回409。
pub async fn trigger_handoff(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    axum::Json(request): axum::Json<HandoffRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = state
        .coordinator
        .handoff(&task_id, &request.source_node_id, request.target_node_id)
        .await?;
    Ok(created(session))
}

/// 查询迁移会话
///
/// 已结束的会话在保留期内可查，之后被后台清理。
pub async fn get_handoff(
    State(state): State<AppState>,
    Path(handoff_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session = state.handoff_repo.get(&handoff_id).await?;
    Ok(success(session))
}
