use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::models::{Node, NodeFilter, NodeHeartbeat, NodeRegistration};
use orchestrator_domain::repositories::NodeRegistry;

/// 内存节点注册表
///
/// `try_reserve` / `release` 在写锁内完成检查与增减，
/// 满足每节点线性化的并发契约。
pub struct MemoryNodeRegistry {
    nodes: RwLock<HashMap<String, Node>>,
    /// 心跳存活阈值（秒），用于读取时的惰性存活判定
    liveness_threshold_seconds: i64,
}

impl MemoryNodeRegistry {
    pub fn new(liveness_threshold_seconds: i64) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            liveness_threshold_seconds,
        }
    }

    /// 应用惰性存活判定后的快照
    fn snapshot(&self, node: &Node) -> Node {
        let mut snapshot = node.clone();
        snapshot.status =
            node.effective_status(self.liveness_threshold_seconds, Utc::now());
        snapshot
    }
}

#[async_trait]
impl NodeRegistry for MemoryNodeRegistry {
    async fn register(&self, registration: NodeRegistration) -> OrchestratorResult<Node> {
        if registration.node_id.is_empty() {
            return Err(OrchestratorError::InvalidTaskParams(
                "node_id 不能为空".to_string(),
            ));
        }

        let mut nodes = self.nodes.write().await;
        let node = match nodes.get_mut(&registration.node_id) {
            Some(existing) => {
                debug!("节点 {} 重复注册，刷新能力快照", registration.node_id);
                existing.refresh_capabilities(registration);
                existing.clone()
            }
            None => {
                info!("注册新节点: {}", registration.node_id);
                let node = Node::new(registration);
                nodes.insert(node.node_id.clone(), node.clone());
                node
            }
        };
        Ok(node)
    }

    async fn heartbeat(
        &self,
        node_id: &str,
        heartbeat: NodeHeartbeat,
    ) -> OrchestratorResult<()> {
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(node_id).ok_or_else(|| {
            warn!("收到未注册节点 {} 的心跳", node_id);
            OrchestratorError::NodeNotFound {
                id: node_id.to_string(),
            }
        })?;
        node.apply_heartbeat(heartbeat);
        debug!("节点 {} 心跳已刷新", node_id);
        Ok(())
    }

    async fn get(&self, node_id: &str) -> OrchestratorResult<Node> {
        let nodes = self.nodes.read().await;
        let node = nodes
            .get(node_id)
            .ok_or_else(|| OrchestratorError::NodeNotFound {
                id: node_id.to_string(),
            })?;
        Ok(self.snapshot(node))
    }

    async fn list(&self) -> OrchestratorResult<Vec<Node>> {
        let nodes = self.nodes.read().await;
        Ok(nodes.values().map(|n| self.snapshot(n)).collect())
    }

    async fn list_active(&self, filter: &NodeFilter) -> OrchestratorResult<Vec<Node>> {
        let now = Utc::now();
        let nodes = self.nodes.read().await;
        Ok(nodes
            .values()
            .filter(|n| n.is_schedulable(self.liveness_threshold_seconds, now))
            .filter(|n| filter.matches(n))
            .map(|n| self.snapshot(n))
            .collect())
    }

    async fn try_reserve(&self, node_id: &str) -> OrchestratorResult<()> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| OrchestratorError::NodeNotFound {
                id: node_id.to_string(),
            })?;

        // 检查与自增在同一把写锁内，并发预留不会越过容量上限
        if node.current_tasks >= node.max_concurrent_tasks {
            return Err(OrchestratorError::NodeFull {
                id: node_id.to_string(),
            });
        }
        node.current_tasks += 1;
        debug!(
            "节点 {} 预留槽位成功 ({}/{})",
            node_id, node.current_tasks, node.max_concurrent_tasks
        );
        Ok(())
    }

    async fn release(&self, node_id: &str) -> OrchestratorResult<()> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| OrchestratorError::NodeNotFound {
                id: node_id.to_string(),
            })?;
        node.current_tasks = node.current_tasks.saturating_sub(1);
        debug!(
            "节点 {} 释放槽位 ({}/{})",
            node_id, node.current_tasks, node.max_concurrent_tasks
        );
        Ok(())
    }

    async fn record_outcome(&self, node_id: &str, success: bool) -> OrchestratorResult<()> {
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get_mut(node_id) {
            if success {
                node.tasks_completed += 1;
            } else {
                node.tasks_failed += 1;
            }
        }
        // 节点可能已被清理，统计计数丢失不影响正确性
        Ok(())
    }

    async fn remove(&self, node_id: &str) -> OrchestratorResult<()> {
        let mut nodes = self.nodes.write().await;
        nodes
            .remove(node_id)
            .ok_or_else(|| OrchestratorError::NodeNotFound {
                id: node_id.to_string(),
            })?;
        info!("节点 {} 已注销", node_id);
        Ok(())
    }

    async fn remove_stale(&self, stale_after_seconds: i64) -> OrchestratorResult<Vec<String>> {
        let now = Utc::now();
        let mut nodes = self.nodes.write().await;
        let stale_ids: Vec<String> = nodes
            .values()
            .filter(|n| n.is_heartbeat_expired(stale_after_seconds, now))
            .map(|n| n.node_id.clone())
            .collect();

        for node_id in &stale_ids {
            nodes.remove(node_id);
            info!("清理过期节点: {}", node_id);
        }
        Ok(stale_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_domain::models::{NodeCapabilities, NodeStatus};
    use std::sync::Arc;

    fn registration(node_id: &str, max_concurrent: u32) -> NodeRegistration {
        NodeRegistration {
            node_id: node_id.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8900,
            capabilities: NodeCapabilities {
                cpu_cores: 8,
                total_ram_gb: 16.0,
                available_ram_gb: 12.0,
                has_gpu: false,
                gpu_devices: vec![],
                supported_models: vec!["llama-7b".to_string()],
                max_concurrent_tasks: max_concurrent,
            },
        }
    }

    #[tokio::test]
    async fn test_register_and_get_roundtrip() {
        let registry = MemoryNodeRegistry::new(30);
        let created = registry.register(registration("node-1", 2)).await.unwrap();

        let fetched = registry.get("node-1").await.unwrap();
        assert_eq!(fetched.node_id, created.node_id);
        assert_eq!(fetched.cpu_cores, 8);
        assert_eq!(fetched.max_concurrent_tasks, 2);
        assert_eq!(fetched.status, NodeStatus::Online);
        assert_eq!(fetched.current_tasks, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_node() {
        let registry = MemoryNodeRegistry::new(30);
        let result = registry
            .heartbeat("ghost", NodeHeartbeat::default())
            .await;
        assert!(matches!(
            result,
            Err(OrchestratorError::NodeNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_heartbeat_excluded_from_active() {
        let registry = MemoryNodeRegistry::new(30);
        registry.register(registration("node-1", 2)).await.unwrap();

        // 手动回拨心跳时间，模拟31秒无心跳
        {
            let mut nodes = registry.nodes.write().await;
            let node = nodes.get_mut("node-1").unwrap();
            node.last_heartbeat = Utc::now() - chrono::Duration::seconds(31);
        }

        let active = registry.list_active(&NodeFilter::default()).await.unwrap();
        assert!(active.is_empty());

        // get 仍能拿到快照，但有效状态为离线
        let node = registry.get("node-1").await.unwrap();
        assert_eq!(node.status, NodeStatus::Offline);

        // 心跳恢复后重新可见
        registry
            .heartbeat("node-1", NodeHeartbeat::default())
            .await
            .unwrap();
        let active = registry.list_active(&NodeFilter::default()).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_updates_load_snapshot() {
        let registry = MemoryNodeRegistry::new(30);
        registry.register(registration("node-1", 4)).await.unwrap();

        registry
            .heartbeat(
                "node-1",
                NodeHeartbeat {
                    current_tasks: Some(3),
                    available_ram_gb: Some(6.5),
                    gpu_devices: None,
                },
            )
            .await
            .unwrap();

        let node = registry.get("node-1").await.unwrap();
        assert_eq!(node.current_tasks, 3);
        assert_eq!(node.available_ram_gb, 6.5);

        // 上报值超过容量时按容量截断
        registry
            .heartbeat(
                "node-1",
                NodeHeartbeat {
                    current_tasks: Some(99),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let node = registry.get("node-1").await.unwrap();
        assert_eq!(node.current_tasks, 4);
    }

    #[tokio::test]
    async fn test_try_reserve_respects_capacity() {
        let registry = MemoryNodeRegistry::new(30);
        registry.register(registration("node-1", 2)).await.unwrap();

        registry.try_reserve("node-1").await.unwrap();
        registry.try_reserve("node-1").await.unwrap();
        let result = registry.try_reserve("node-1").await;
        assert!(matches!(result, Err(OrchestratorError::NodeFull { .. })));

        registry.release("node-1").await.unwrap();
        registry.try_reserve("node-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_reserve_never_overcommits() {
        let registry = Arc::new(MemoryNodeRegistry::new(30));
        registry.register(registration("node-1", 3)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.try_reserve("node-1").await.is_ok()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 3);
        let node = registry.get("node-1").await.unwrap();
        assert_eq!(node.current_tasks, 3);
        assert!(node.current_tasks <= node.max_concurrent_tasks);
    }

    #[tokio::test]
    async fn test_release_floors_at_zero() {
        let registry = MemoryNodeRegistry::new(30);
        registry.register(registration("node-1", 2)).await.unwrap();
        registry.release("node-1").await.unwrap();
        let node = registry.get("node-1").await.unwrap();
        assert_eq!(node.current_tasks, 0);
    }

    #[tokio::test]
    async fn test_remove_stale_nodes() {
        let registry = MemoryNodeRegistry::new(30);
        registry.register(registration("old", 1)).await.unwrap();
        registry.register(registration("fresh", 1)).await.unwrap();

        {
            let mut nodes = registry.nodes.write().await;
            nodes.get_mut("old").unwrap().last_heartbeat =
                Utc::now() - chrono::Duration::seconds(86401);
        }

        let removed = registry.remove_stale(86400).await.unwrap();
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(matches!(
            registry.get("old").await,
            Err(OrchestratorError::NodeNotFound { .. })
        ));
        assert!(registry.get("fresh").await.is_ok());
    }

    #[tokio::test]
    async fn test_list_active_filter_by_model() {
        let registry = MemoryNodeRegistry::new(30);
        registry.register(registration("node-1", 2)).await.unwrap();

        let filter = NodeFilter {
            supports_model: Some("llama-7b".to_string()),
            ..Default::default()
        };
        assert_eq!(registry.list_active(&filter).await.unwrap().len(), 1);

        let filter = NodeFilter {
            supports_model: Some("qwen-72b".to_string()),
            ..Default::default()
        };
        assert!(registry.list_active(&filter).await.unwrap().is_empty());
    }
}
