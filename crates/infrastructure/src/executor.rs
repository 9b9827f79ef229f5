use std::sync::Arc;

use async_trait::async_trait;

use orchestrator_core::{
    traits::{ExecutionOutcome, InferenceExecutor, NodeEndpoint, TaskPayload},
    OrchestratorResult,
};

use crate::agent_client::AgentClient;

/// 基于HTTP的推理执行器
///
/// 把任务载荷投递到节点的执行端点，并把节点返回的JSON解析为统一的
/// 执行结果。节点返回错误或网络失败都会转换为执行错误，由调度器
/// 决定重试或终止。
pub struct HttpInferenceExecutor {
    client: Arc<AgentClient>,
}

impl HttpInferenceExecutor {
    pub fn new(client: Arc<AgentClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InferenceExecutor for HttpInferenceExecutor {
    async fn execute(
        &self,
        node: &NodeEndpoint,
        payload: &TaskPayload,
    ) -> OrchestratorResult<ExecutionOutcome> {
        let raw = self.client.dispatch(node, payload).await?;

        let processing_time_ms = raw
            .get("processing_time_ms")
            .and_then(|v| v.as_u64());
        let model_used = raw
            .get("model_used")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let tokens_per_second = raw
            .get("tokens_per_second")
            .and_then(|v| v.as_f64());
        let output = raw.get("output").cloned().unwrap_or(raw);

        Ok(ExecutionOutcome {
            output,
            processing_time_ms,
            model_used,
            tokens_per_second,
        })
    }

    async fn cancel(&self, node: &NodeEndpoint, task_id: &str) {
        self.client.cancel_task(node, task_id).await;
    }
}
