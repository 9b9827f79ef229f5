use axum::extract::State;
use axum::response::IntoResponse;
use serde::Serialize;

use orchestrator_domain::models::{NodeStatus, TaskStatus};

use crate::error::ApiResult;
use crate::response::success;
use crate::routes::AppState;

/// 系统统计信息
#[derive(Debug, Default, Serialize)]
pub struct SystemStats {
    pub nodes: NodeStats,
    pub tasks: TaskStats,
    pub handoffs: HandoffStats,
}

#[derive(Debug, Default, Serialize)]
pub struct NodeStats {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct TaskStats {
    pub pending: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct HandoffStats {
    pub active: u64,
    pub total: u64,
}

/// 获取系统统计
pub async fn get_system_stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let mut stats = SystemStats::default();

    let nodes = state.registry.list().await?;
    stats.nodes.total = nodes.len();
    for node in &nodes {
        // 注册表返回的快照已应用惰性存活判定
        if node.status == NodeStatus::Online {
            stats.nodes.online += 1;
        } else {
            stats.nodes.offline += 1;
        }
    }

    for task in state.task_repo.list().await? {
        match task.status {
            TaskStatus::Pending => stats.tasks.pending += 1,
            TaskStatus::Queued => stats.tasks.queued += 1,
            TaskStatus::Running => stats.tasks.running += 1,
            TaskStatus::Completed => stats.tasks.completed += 1,
            TaskStatus::Failed => stats.tasks.failed += 1,
            TaskStatus::Cancelled => stats.tasks.cancelled += 1,
        }
    }

    stats.handoffs.active = state.handoff_repo.count_active().await?;
    stats.handoffs.total = state.handoff_repo.count_total().await?;

    Ok(success(stats))
}
