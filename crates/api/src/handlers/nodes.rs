use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::info;

use orchestrator_domain::models::{NodeFilter, NodeHeartbeat, NodeRegistration};

use crate::error::ApiResult;
use crate::response::{created, success};
use crate::routes::AppState;
use crate::validation::validate_registration;

/// 节点查询参数
#[derive(Debug, Default, Deserialize)]
pub struct NodeQueryParams {
    /// true时仅返回有效状态为在线的节点
    pub active: Option<bool>,
    pub requires_gpu: Option<bool>,
    pub min_ram_gb: Option<f64>,
    pub model: Option<String>,
}

/// 注册节点
///
/// 重复注册视为能力刷新，幂等。
pub async fn register_node(
    State(state): State<AppState>,
    axum::Json(registration): axum::Json<NodeRegistration>,
) -> ApiResult<impl IntoResponse> {
    validate_registration(&registration)?;
    let node = state.registry.register(registration).await?;
    info!("节点 {} 注册成功", node.node_id);
    Ok(created(node))
}

/// 节点心跳
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    heartbeat: Option<axum::Json<NodeHeartbeat>>,
) -> ApiResult<impl IntoResponse> {
    let payload = heartbeat.map(|json| json.0).unwrap_or_default();
    state.registry.heartbeat(&node_id, payload).await?;
    Ok(success(serde_json::json!({ "node_id": node_id })))
}

/// 获取节点列表
pub async fn list_nodes(
    State(state): State<AppState>,
    Query(params): Query<NodeQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let nodes = if params.active.unwrap_or(false) {
        let filter = NodeFilter {
            requires_gpu: params.requires_gpu,
            min_available_ram_gb: params.min_ram_gb,
            supports_model: params.model,
        };
        state.registry.list_active(&filter).await?
    } else {
        state.registry.list().await?
    };
    Ok(success(nodes))
}

/// 获取单个节点快照
pub async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let node = state.registry.get(&node_id).await?;
    Ok(success(node))
}

/// 注销节点
pub async fn deregister_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.registry.remove(&node_id).await?;
    info!("节点 {} 已注销", node_id);
    Ok(success(serde_json::json!({ "node_id": node_id })))
}
