use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use orchestrator_core::{
    traits::{NodeEndpoint, PeerTransport, TaskPayload},
    OrchestratorError, OrchestratorResult,
};

/// 节点通信客户端配置
#[derive(Debug, Clone)]
pub struct AgentClientConfig {
    /// 普通请求超时（秒）
    pub request_timeout_seconds: u64,
    /// 建立连接超时（秒）
    pub connect_timeout_seconds: u64,
    /// 迁移转发超时（秒），转发需要等待目标节点确认接管
    pub forward_timeout_seconds: u64,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 10,
            connect_timeout_seconds: 5,
            forward_timeout_seconds: 15,
        }
    }
}

/// 面向工作节点的HTTP客户端
///
/// 控制平面对节点的所有出站调用都经过这里，每类请求都带显式超时，
/// 单个无响应节点不会拖住调度循环。
pub struct AgentClient {
    http_client: reqwest::Client,
    config: AgentClientConfig,
}

impl AgentClient {
    pub fn new(config: AgentClientConfig) -> OrchestratorResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()
            .map_err(|e| OrchestratorError::Internal(format!("构建HTTP客户端失败: {e}")))?;
        Ok(Self {
            http_client,
            config,
        })
    }

    /// 投递任务到节点执行
    ///
    /// 节点同步返回执行结果。执行超时由任务自身的 `max_duration_seconds`
    /// 控制，因此这里允许超过默认请求超时。
    pub async fn dispatch(
        &self,
        node: &NodeEndpoint,
        payload: &TaskPayload,
    ) -> OrchestratorResult<serde_json::Value> {
        let url = format!("{}/execute", node.base_url());
        let timeout = Duration::from_secs(payload.max_duration_seconds);

        let response = self
            .http_client
            .post(&url)
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                OrchestratorError::Network(format!("投递任务到节点 {} 失败: {e}", node.node_id))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::ExecutionFailed(format!(
                "节点 {} 返回 HTTP {status}: {body}",
                node.node_id
            )));
        }

        response.json().await.map_err(|e| {
            OrchestratorError::ExecutionFailed(format!(
                "解析节点 {} 的执行结果失败: {e}",
                node.node_id
            ))
        })
    }

    async fn connect_peer(
        &self,
        node: &NodeEndpoint,
        peer_node_id: &str,
    ) -> OrchestratorResult<()> {
        let url = format!("{}/connect", node.base_url());
        let response = self
            .http_client
            .post(&url)
            .json(&json!({ "peer_node": peer_node_id }))
            .send()
            .await
            .map_err(|e| {
                OrchestratorError::Network(format!(
                    "节点 {} 连接握手请求失败: {e}",
                    node.node_id
                ))
            })?;

        if !response.status().is_success() {
            return Err(OrchestratorError::Network(format!(
                "节点 {} 拒绝连接握手: HTTP {}",
                node.node_id,
                response.status()
            )));
        }
        Ok(())
    }

    /// 尽力通知节点取消任务
    ///
    /// 本地取消状态不依赖远端确认，这里只做日志记录。
    pub async fn cancel_task(&self, node: &NodeEndpoint, task_id: &str) {
        let url = format!("{}/tasks/{}/cancel", node.base_url(), task_id);
        match self.http_client.post(&url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("节点 {} 已确认取消任务 {}", node.node_id, task_id);
            }
            Ok(response) => {
                warn!(
                    "节点 {} 取消任务 {} 返回 HTTP {}",
                    node.node_id,
                    task_id,
                    response.status()
                );
            }
            Err(e) => {
                warn!("通知节点 {} 取消任务 {} 失败: {}", node.node_id, task_id, e);
            }
        }
    }
}

#[async_trait]
impl PeerTransport for AgentClient {
    /// 双向可达性握手
    ///
    /// 先让源节点连向目标，再让目标连回源。任一方向失败则认为两节点
    /// 之间不可达。
    async fn establish_link(
        &self,
        source: &NodeEndpoint,
        target: &NodeEndpoint,
    ) -> OrchestratorResult<()> {
        self.connect_peer(source, &target.node_id).await?;
        self.connect_peer(target, &source.node_id).await?;
        debug!(
            "节点 {} 与 {} 可达性握手完成",
            source.node_id, target.node_id
        );
        Ok(())
    }

    /// 转发任务到迁移目标节点
    ///
    /// 目标节点确认接管即视为转发成功，后续执行结果由节点经由
    /// 结果上报接口回传。
    async fn forward_handoff(
        &self,
        target: &NodeEndpoint,
        payload: &TaskPayload,
        source_node_id: &str,
    ) -> OrchestratorResult<()> {
        let url = format!("{}/handoff", target.base_url());
        let body = json!({
            "task": payload,
            "source_node_id": source_node_id,
        });

        let response = self
            .http_client
            .post(&url)
            .timeout(Duration::from_secs(self.config.forward_timeout_seconds))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                OrchestratorError::Network(format!(
                    "转发任务到节点 {} 失败: {e}",
                    target.node_id
                ))
            })?;

        if !response.status().is_success() {
            return Err(OrchestratorError::Network(format!(
                "节点 {} 拒绝接管任务: HTTP {}",
                target.node_id,
                response.status()
            )));
        }
        Ok(())
    }

    /// 节点健康探测
    async fn probe(&self, node: &NodeEndpoint) -> bool {
        let url = format!("{}/health", node.base_url());
        match self.http_client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("节点 {} 健康探测失败: {}", node.node_id, e);
                false
            }
        }
    }

    async fn cancel(&self, node: &NodeEndpoint, task_id: &str) {
        self.cancel_task(node, task_id).await;
    }
}
