use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use orchestrator_core::{traits::PeerTransport, OrchestratorError, OrchestratorResult};
use orchestrator_domain::models::{Node, NodeStatus};
use orchestrator_domain::repositories::{NodeRegistry, TaskRepository};

use crate::handoff::HandoffCoordinator;
use crate::scheduler::TaskScheduler;

/// 节点存活巡检配置
#[derive(Debug, Clone)]
pub struct NodeLivenessSweeperConfig {
    /// 心跳存活阈值（秒）
    pub liveness_threshold_seconds: i64,
    /// 节点过期清理阈值（秒）
    pub stale_node_seconds: i64,
    /// 巡检间隔（秒）
    pub sweep_interval_seconds: u64,
}

impl Default for NodeLivenessSweeperConfig {
    fn default() -> Self {
        Self {
            liveness_threshold_seconds: 30, // 30秒心跳超时
            stale_node_seconds: 86400,      // 24小时后移除
            sweep_interval_seconds: 60,     // 每分钟巡检一次
        }
    }
}

/// 节点存活巡检
///
/// 周期性做两件事：
/// 1. 失联节点（心跳超过存活阈值）上的运行任务迁移到其他节点，
///    无处可迁时回到调度队列走重试
/// 2. 长期无心跳（超过过期窗口）的节点从注册表移除
///
/// 两个阈值互相独立：前者决定调度可见性，后者决定注册记录的去留。
pub struct NodeLivenessSweeper {
    registry: Arc<dyn NodeRegistry>,
    task_repo: Arc<dyn TaskRepository>,
    scheduler: Arc<TaskScheduler>,
    coordinator: Arc<HandoffCoordinator>,
    transport: Arc<dyn PeerTransport>,
    config: NodeLivenessSweeperConfig,
    running: Arc<RwLock<bool>>,
}

impl NodeLivenessSweeper {
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        task_repo: Arc<dyn TaskRepository>,
        scheduler: Arc<TaskScheduler>,
        coordinator: Arc<HandoffCoordinator>,
        transport: Arc<dyn PeerTransport>,
        config: NodeLivenessSweeperConfig,
    ) -> Self {
        Self {
            registry,
            task_repo,
            scheduler,
            coordinator,
            transport,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 运行巡检循环，直到收到停止信号
    pub async fn run(self: Arc<Self>) {
        info!(
            "启动节点存活巡检 (间隔: {}秒, 存活阈值: {}秒, 过期窗口: {}秒)",
            self.config.sweep_interval_seconds,
            self.config.liveness_threshold_seconds,
            self.config.stale_node_seconds
        );
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let interval = Duration::from_secs(self.config.sweep_interval_seconds);
        loop {
            if !*self.running.read().await {
                info!("收到停止信号，退出节点存活巡检");
                break;
            }
            if let Err(e) = self.sweep_once().await {
                error!("节点存活巡检出错: {}", e);
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// 执行一轮巡检
    pub async fn sweep_once(&self) -> OrchestratorResult<()> {
        let unresponsive = self.detect_unresponsive().await?;
        for node in unresponsive {
            if let Err(e) = self.recover_node_tasks(&node).await {
                error!("处理失联节点 {} 的任务时出错: {}", node.node_id, e);
            }
        }

        let removed = self
            .registry
            .remove_stale(self.config.stale_node_seconds)
            .await?;
        if !removed.is_empty() {
            info!("移除了 {} 个过期节点: {:?}", removed.len(), removed);
        }
        Ok(())
    }

    /// 找出心跳过期且探测不可达、但仍有运行任务的节点
    ///
    /// 心跳过期可能只是上报链路延迟，迁移之前再做一次直连探测，
    /// 探测通过的节点本轮跳过。
    async fn detect_unresponsive(&self) -> OrchestratorResult<Vec<Node>> {
        let now = Utc::now();
        let nodes = self.registry.list().await?;
        let mut unresponsive = Vec::new();

        for node in nodes {
            if node.effective_status(self.config.liveness_threshold_seconds, now)
                != NodeStatus::Offline
            {
                continue;
            }
            let stranded = self.task_repo.get_running_on_node(&node.node_id).await?;
            if stranded.is_empty() {
                continue;
            }
            if self.transport.probe(&node.endpoint()).await {
                debug!("节点 {} 心跳延迟但探测可达，本轮跳过", node.node_id);
                continue;
            }
            warn!(
                "节点 {} 心跳过期 (上次: {})，其上有 {} 个运行中任务",
                node.node_id,
                node.last_heartbeat.format("%Y-%m-%d %H:%M:%S UTC"),
                stranded.len()
            );
            unresponsive.push(node);
        }
        Ok(unresponsive)
    }

    /// 迁移失联节点上的运行任务，无法迁移时回到调度队列
    async fn recover_node_tasks(&self, node: &Node) -> OrchestratorResult<()> {
        let stranded = self.task_repo.get_running_on_node(&node.node_id).await?;

        for task in stranded {
            match self
                .coordinator
                .handoff(&task.task_id, &node.node_id, None)
                .await
            {
                Ok(session) => {
                    info!(
                        "失联节点 {} 上的任务 {} 迁移结果: {:?}",
                        node.node_id, task.task_id, session.status
                    );
                }
                Err(OrchestratorError::HandoffInProgress { .. }) => {
                    debug!("任务 {} 已有进行中的迁移，本轮跳过", task.task_id);
                }
                Err(e) => {
                    debug!(
                        "任务 {} 无法迁移 ({})，转入重试路径",
                        task.task_id, e
                    );
                    if let Err(recover_err) = self
                        .scheduler
                        .handle_node_failure(&task.task_id, &node.node_id)
                        .await
                    {
                        error!(
                            "恢复失联节点任务 {} 失败: {}",
                            task.task_id, recover_err
                        );
                    }
                }
            }
        }
        Ok(())
    }
}
