use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use orchestrator_domain::models::{TaskStatus, TaskStatusReport, TaskSubmission};

use crate::error::{ApiError, ApiResult};
use crate::response::{created, success};
use crate::routes::AppState;

/// 任务查询参数
#[derive(Debug, Default, Deserialize)]
pub struct TaskQueryParams {
    pub status: Option<String>,
}

/// 提交任务
///
/// 校验失败返回400；没有任何节点能满足硬性约束时返回422，
/// 任务不会进入队列。
pub async fn submit_task(
    State(state): State<AppState>,
    axum::Json(submission): axum::Json<TaskSubmission>,
) -> ApiResult<impl IntoResponse> {
    let task = state.scheduler.submit(submission).await?;
    Ok(created(task))
}

/// 获取任务列表
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let tasks = match params.status.as_deref() {
        Some(status) => {
            let status = parse_status(status)?;
            state.task_repo.get_by_status(status).await?
        }
        None => state.task_repo.list().await?,
    };
    Ok(success(tasks))
}

/// 获取单个任务
///
/// 调用方通过任务状态和error字段获知终止原因。
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task = state.task_repo.get(&task_id).await?;
    Ok(success(task))
}

/// 节点上报任务执行结果
pub async fn report_task_outcome(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    axum::Json(report): axum::Json<TaskStatusReport>,
) -> ApiResult<impl IntoResponse> {
    let task = state.scheduler.report_outcome(&task_id, report).await?;
    Ok(success(task))
}

/// 取消任务
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task = state.scheduler.cancel(&task_id).await?;
    Ok(success(task))
}

fn parse_status(status: &str) -> ApiResult<TaskStatus> {
    match status {
        "pending" => Ok(TaskStatus::Pending),
        "queued" => Ok(TaskStatus::Queued),
        "running" => Ok(TaskStatus::Running),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        other => Err(ApiError::BadRequest(format!("无效的任务状态: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("queued").unwrap(), TaskStatus::Queued);
        assert_eq!(parse_status("cancelled").unwrap(), TaskStatus::Cancelled);
        assert!(parse_status("unknown").is_err());
    }
}
