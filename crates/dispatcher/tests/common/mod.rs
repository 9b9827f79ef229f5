//! 集成测试共用的桩实现和测试数据构造
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use orchestrator_core::{
    traits::{ExecutionOutcome, InferenceExecutor, NodeEndpoint, PeerTransport, TaskPayload},
    OrchestratorError, OrchestratorResult,
};
use orchestrator_domain::models::{
    GpuDevice, NodeCapabilities, NodeRegistration, TaskRequirements, TaskSubmission,
};

/// 桩执行器行为
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExecutorBehavior {
    /// 立即成功
    Succeed,
    /// 立即失败
    Fail,
    /// 永不返回，用于验证独立的超时计时
    Hang,
}

/// 可编程的桩执行器
pub struct StubExecutor {
    behavior: Mutex<ExecutorBehavior>,
    pub executions: AtomicU32,
    pub cancels: AtomicU32,
}

impl StubExecutor {
    pub fn new(behavior: ExecutorBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            executions: AtomicU32::new(0),
            cancels: AtomicU32::new(0),
        }
    }

    pub async fn set_behavior(&self, behavior: ExecutorBehavior) {
        *self.behavior.lock().await = behavior;
    }
}

#[async_trait]
impl InferenceExecutor for StubExecutor {
    async fn execute(
        &self,
        _node: &NodeEndpoint,
        payload: &TaskPayload,
    ) -> OrchestratorResult<ExecutionOutcome> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.behavior.lock().await;
        match behavior {
            ExecutorBehavior::Succeed => Ok(ExecutionOutcome {
                output: serde_json::json!({"echo": payload.input}),
                processing_time_ms: Some(5),
                model_used: Some(payload.model.clone()),
                tokens_per_second: Some(12.0),
            }),
            ExecutorBehavior::Fail => Err(OrchestratorError::ExecutionFailed(
                "桩执行器配置为失败".to_string(),
            )),
            ExecutorBehavior::Hang => {
                // 比任何测试任务的时限都长
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                unreachable!()
            }
        }
    }

    async fn cancel(&self, _node: &NodeEndpoint, _task_id: &str) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// 可编程的桩迁移通道
///
/// `unreachable_nodes` 中的节点握手失败；`rejecting_nodes` 中的节点
/// 握手成功但拒绝接管任务。
pub struct StubTransport {
    pub unreachable_nodes: Mutex<HashSet<String>>,
    pub rejecting_nodes: Mutex<HashSet<String>>,
    pub forwards: Mutex<Vec<String>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self {
            unreachable_nodes: Mutex::new(HashSet::new()),
            rejecting_nodes: Mutex::new(HashSet::new()),
            forwards: Mutex::new(Vec::new()),
        }
    }

    pub async fn make_unreachable(&self, node_id: &str) {
        self.unreachable_nodes
            .lock()
            .await
            .insert(node_id.to_string());
    }

    pub async fn make_rejecting(&self, node_id: &str) {
        self.rejecting_nodes
            .lock()
            .await
            .insert(node_id.to_string());
    }
}

#[async_trait]
impl PeerTransport for StubTransport {
    async fn establish_link(
        &self,
        source: &NodeEndpoint,
        target: &NodeEndpoint,
    ) -> OrchestratorResult<()> {
        let unreachable = self.unreachable_nodes.lock().await;
        if unreachable.contains(&source.node_id) || unreachable.contains(&target.node_id) {
            return Err(OrchestratorError::Network(format!(
                "节点 {} 与 {} 握手失败",
                source.node_id, target.node_id
            )));
        }
        Ok(())
    }

    async fn forward_handoff(
        &self,
        target: &NodeEndpoint,
        payload: &TaskPayload,
        _source_node_id: &str,
    ) -> OrchestratorResult<()> {
        if self.rejecting_nodes.lock().await.contains(&target.node_id) {
            return Err(OrchestratorError::Network(format!(
                "节点 {} 拒绝接管任务",
                target.node_id
            )));
        }
        self.forwards.lock().await.push(target.node_id.clone());
        let _ = payload;
        Ok(())
    }

    async fn probe(&self, node: &NodeEndpoint) -> bool {
        !self.unreachable_nodes.lock().await.contains(&node.node_id)
    }

    async fn cancel(&self, _node: &NodeEndpoint, _task_id: &str) {}
}

pub fn cpu_node(node_id: &str, max_concurrent: u32) -> NodeRegistration {
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

pub fn gpu_node(node_id: &str, max_concurrent: u32, gpu_memory_gb: f64) -> NodeRegistration {
    NodeRegistration {
        node_id: node_id.to_string(),
        host: "127.0.0.1".to_string(),
        port: 8901,
        capabilities: NodeCapabilities {
            cpu_cores: 16,
            total_ram_gb: 64.0,
            available_ram_gb: 48.0,
            has_gpu: true,
            gpu_devices: vec![GpuDevice {
                total_memory_gb: gpu_memory_gb,
                allocated_memory_gb: 0.0,
                compute_capability: "8.6".to_string(),
            }],
            supported_models: vec!["llama-7b".to_string(), "llama-70b".to_string()],
            max_concurrent_tasks: max_concurrent,
        },
    }
}

pub fn cpu_submission(min_ram_gb: f64) -> TaskSubmission {
    TaskSubmission {
        model: "llama-7b".to_string(),
        input: serde_json::json!({"prompt": "你好"}),
        requirements: TaskRequirements {
            requires_gpu: false,
            min_ram_gb,
            ..Default::default()
        },
        priority: 5,
        max_retries: 3,
    }
}

pub fn gpu_submission() -> TaskSubmission {
    TaskSubmission {
        model: "llama-70b".to_string(),
        input: serde_json::json!({"prompt": "你好"}),
        requirements: TaskRequirements {
            requires_gpu: true,
            min_ram_gb: 8.0,
            min_gpu_memory_gb: 16.0,
            ..Default::default()
        },
        priority: 5,
        max_retries: 3,
    }
}

/// 等待后台执行任务落定
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}
