use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use orchestrator_core::OrchestratorError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("编排器错误: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, error_type) = match &self {
            ApiError::Orchestrator(OrchestratorError::NodeNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("节点 {id} 不存在"),
                "NODE_NOT_FOUND",
            ),
            ApiError::Orchestrator(OrchestratorError::TaskNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("任务 {id} 不存在"),
                "TASK_NOT_FOUND",
            ),
            ApiError::Orchestrator(OrchestratorError::HandoffNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("迁移会话 {id} 不存在"),
                "HANDOFF_NOT_FOUND",
            ),
            ApiError::Orchestrator(OrchestratorError::InvalidTaskParams(msg)) => (
                StatusCode::BAD_REQUEST,
                format!("参数无效: {msg}"),
                "INVALID_PARAMS",
            ),
            ApiError::Orchestrator(OrchestratorError::InvalidStateTransition { from, to }) => (
                StatusCode::CONFLICT,
                format!("非法的状态转换: {from} -> {to}"),
                "INVALID_STATE_TRANSITION",
            ),
            ApiError::Orchestrator(OrchestratorError::NoSuitableNode(msg)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("没有满足条件的节点: {msg}"),
                "NO_SUITABLE_NODE",
            ),
            ApiError::Orchestrator(OrchestratorError::NodeFull { id }) => (
                StatusCode::CONFLICT,
                format!("节点 {id} 已满载"),
                "NODE_FULL",
            ),
            ApiError::Orchestrator(OrchestratorError::HandoffInProgress { task_id }) => (
                StatusCode::CONFLICT,
                format!("任务 {task_id} 已有进行中的迁移"),
                "HANDOFF_IN_PROGRESS",
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数错误: {msg}"),
                "BAD_REQUEST",
            ),
            ApiError::Orchestrator(_) | ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "系统内部错误".to_string(),
                "INTERNAL_ERROR",
            ),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let error = ApiError::Orchestrator(OrchestratorError::TaskNotFound {
            id: "t-1".to_string(),
        });
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);

        let error = ApiError::Orchestrator(OrchestratorError::NodeNotFound {
            id: "n-1".to_string(),
        });
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_maps_to_400() {
        let error =
            ApiError::Orchestrator(OrchestratorError::InvalidTaskParams("bad".to_string()));
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_no_suitable_node_maps_to_422() {
        let error =
            ApiError::Orchestrator(OrchestratorError::NoSuitableNode("无GPU节点".to_string()));
        assert_eq!(
            error.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_conflicts_map_to_409() {
        let error = ApiError::Orchestrator(OrchestratorError::HandoffInProgress {
            task_id: "t-1".to_string(),
        });
        assert_eq!(error.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_internal_errors_map_to_500() {
        let error = ApiError::Orchestrator(OrchestratorError::Internal("boom".to_string()));
        assert_eq!(
            error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let error = ApiError::Internal("boom".to_string());
        assert_eq!(
            error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
