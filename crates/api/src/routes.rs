use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use orchestrator_dispatcher::{HandoffCoordinator, TaskScheduler};
use orchestrator_domain::repositories::{HandoffRepository, NodeRegistry, TaskRepository};

use crate::handlers::{
    handoffs::{get_handoff, trigger_handoff},
    health::health_check,
    nodes::{deregister_node, get_node, heartbeat, list_nodes, register_node},
    system::get_system_stats,
    tasks::{cancel_task, get_task, list_tasks, report_task_outcome, submit_task},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn NodeRegistry>,
    pub task_repo: Arc<dyn TaskRepository>,
    pub handoff_repo: Arc<dyn HandoffRepository>,
    pub scheduler: Arc<TaskScheduler>,
    pub coordinator: Arc<HandoffCoordinator>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 节点管理API
        .route("/api/nodes/register", post(register_node))
        .route("/api/nodes", get(list_nodes))
        .route("/api/nodes/{id}", get(get_node).delete(deregister_node))
        .route("/api/nodes/{id}/heartbeat", post(heartbeat))
        // 任务管理API
        .route("/api/tasks", get(list_tasks).post(submit_task))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/report", post(report_task_outcome))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .route("/api/tasks/{id}/handoff", post(trigger_handoff))
        // 迁移会话API
        .route("/api/handoffs/{id}", get(get_handoff))
        // 系统监控API
        .route("/api/system/stats", get(get_system_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
