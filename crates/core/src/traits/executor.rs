//! 外部执行组件接口定义
//!
//! 控制平面本身不加载模型、不执行推理。实际执行由外部组件完成：
//! - `InferenceExecutor` - 将任务投递到指定节点执行推理
//! - `WorkerPool` - 在受限沙箱中执行任务（可选）
//!
//! 两者的契约一致：接收任务载荷，返回结果或执行错误。
//! 任何执行错误都由调度器捕获并转换为任务状态变更（重试或终止），
//! 不会抛回给任务提交方。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::OrchestratorResult;

/// 节点访问端点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

impl NodeEndpoint {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// 任务执行载荷
///
/// 投递给执行组件的最小任务信息。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_id: String,
    /// 模型标识，"auto" 表示由节点自行选择
    pub model: String,
    pub input: serde_json::Value,
    pub max_duration_seconds: u64,
    pub retry_count: u32,
}

/// 执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub output: serde_json::Value,
    /// 执行耗时（毫秒），由执行方上报
    pub processing_time_ms: Option<u64>,
    /// 实际使用的模型
    pub model_used: Option<String>,
    /// 吞吐量（tokens/秒），用于调度器的性能历史评分
    pub tokens_per_second: Option<f64>,
}

/// 沙箱资源限制
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourceLimits {
    /// 最大内存使用量（MB）
    pub max_memory_mb: Option<u64>,
    /// 最大CPU使用率（百分比）
    pub max_cpu_percent: Option<f64>,
    /// 最长执行时间（秒）
    pub max_duration_seconds: Option<u64>,
}

/// 推理执行器接口
///
/// 每次任务分配调用一次。实现方负责把任务载荷送达节点并等待结果；
/// 所有网络交互必须带有显式超时。
#[async_trait]
pub trait InferenceExecutor: Send + Sync {
    /// 在指定节点上执行任务
    async fn execute(
        &self,
        node: &NodeEndpoint,
        payload: &TaskPayload,
    ) -> OrchestratorResult<ExecutionOutcome>;

    /// 尽力通知节点取消任务
    ///
    /// 取消在本地状态中立即生效，不等待远端确认，因此实现方
    /// 应当吞掉网络错误，仅做日志记录。
    async fn cancel(&self, node: &NodeEndpoint, task_id: &str);
}

/// 沙箱执行池接口（可选协作方）
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// 在资源受限的沙箱中执行任务
    async fn run(
        &self,
        payload: &TaskPayload,
        limits: &ResourceLimits,
    ) -> OrchestratorResult<ExecutionOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_endpoint_base_url() {
        let endpoint = NodeEndpoint {
            node_id: "node-1".to_string(),
            host: "10.0.0.5".to_string(),
            port: 8900,
        };
        assert_eq!(endpoint.base_url(), "http://10.0.0.5:8900");
    }

    #[test]
    fn test_task_payload_roundtrip() {
        let payload = TaskPayload {
            task_id: "t-1".to_string(),
            model: "auto".to_string(),
            input: serde_json::json!({"prompt": "hello"}),
            max_duration_seconds: 300,
            retry_count: 0,
        };
        let json = serde_json::to_string(&payload).unwrap();
        let parsed: TaskPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.task_id, "t-1");
        assert_eq!(parsed.input["prompt"], "hello");
    }

    struct EchoPool;

    #[async_trait]
    impl WorkerPool for EchoPool {
        async fn run(
            &self,
            payload: &TaskPayload,
            limits: &ResourceLimits,
        ) -> OrchestratorResult<ExecutionOutcome> {
            Ok(ExecutionOutcome {
                output: serde_json::json!({
                    "echo": payload.input,
                    "memory_limit_mb": limits.max_memory_mb,
                }),
                processing_time_ms: Some(1),
                model_used: Some(payload.model.clone()),
                tokens_per_second: None,
            })
        }
    }

    #[tokio::test]
    async fn test_worker_pool_contract() {
        let pool = EchoPool;
        let payload = TaskPayload {
            task_id: "t-1".to_string(),
            model: "llama-7b".to_string(),
            input: serde_json::json!({"prompt": "hi"}),
            max_duration_seconds: 60,
            retry_count: 0,
        };
        let limits = ResourceLimits {
            max_memory_mb: Some(1024),
            max_cpu_percent: None,
            max_duration_seconds: Some(60),
        };

        let outcome = pool.run(&payload, &limits).await.unwrap();
        assert_eq!(outcome.output["memory_limit_mb"], 1024);
        assert_eq!(outcome.model_used.as_deref(), Some("llama-7b"));
    }
}
