use async_trait::async_trait;

use super::executor::{NodeEndpoint, TaskPayload};
use crate::OrchestratorResult;

/// 节点间迁移通信接口
///
/// 迁移协调器通过它与工作节点交互：可达性握手、任务转发、
/// 健康探测和取消通知。所有实现必须带显式超时，保证单个
/// 无响应节点不会拖住控制平面。
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// 双向可达性握手，任一方向失败即视为不可达
    async fn establish_link(
        &self,
        source: &NodeEndpoint,
        target: &NodeEndpoint,
    ) -> OrchestratorResult<()>;

    /// 转发任务到迁移目标节点，目标确认接管即为成功
    async fn forward_handoff(
        &self,
        target: &NodeEndpoint,
        payload: &TaskPayload,
        source_node_id: &str,
    ) -> OrchestratorResult<()>;

    /// 节点健康探测
    async fn probe(&self, node: &NodeEndpoint) -> bool;

    /// 尽力通知节点取消任务，错误只做日志记录
    async fn cancel(&self, node: &NodeEndpoint, task_id: &str);
}
