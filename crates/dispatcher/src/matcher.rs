use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use tracing::debug;

use orchestrator_domain::models::{Node, Task};

use crate::strategies::SchedulingStrategy;

/// 吞吐量归一化基准（tokens/秒），达到该值记满分
const THROUGHPUT_BASELINE: f64 = 10.0;

/// 亲和度归一化基准，近期服务同一模型达到该次数记满分
const AFFINITY_BASELINE: f64 = 10.0;

/// 候选节点的评分明细
#[derive(Debug, Clone)]
pub struct NodeScore {
    pub node_id: String,
    pub total: f64,
    pub model_compatibility: f64,
    pub resource_availability: f64,
    pub performance_history: f64,
    pub load_balance: f64,
    pub model_affinity: f64,
}

impl std::fmt::Display for NodeScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "节点 {}: {:.3} (兼容={:.2}, 资源={:.2}, 性能={:.2}, 负载={:.2}, 亲和={:.2})",
            self.node_id,
            self.total,
            self.model_compatibility,
            self.resource_availability,
            self.performance_history,
            self.load_balance,
            self.model_affinity
        )
    }
}

/// 节点匹配器
///
/// 先用硬性约束过滤候选，再按策略权重做软性评分。
/// 同时维护两份调度记忆：
/// - 性能历史：各节点对各模型的近期吞吐量
/// - 模型亲和：各节点近期服务各模型的次数（预估缓存收益）
pub struct NodeMatcher {
    strategy: SchedulingStrategy,
    /// model -> node -> tokens/秒
    performance: RwLock<HashMap<String, HashMap<String, f64>>>,
    /// node -> model -> 近期分配次数
    affinity: RwLock<HashMap<String, HashMap<String, u32>>>,
}

impl NodeMatcher {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self {
            strategy,
            performance: RwLock::new(HashMap::new()),
            affinity: RwLock::new(HashMap::new()),
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// 过滤并评分候选节点，返回按分数降序的排名
    ///
    /// 分数完全相同时按node_id字典序升序，保证结果确定。
    /// `exclude` 中的节点直接跳过（迁移时排除源节点和已尝试过的目标）。
    pub async fn rank(
        &self,
        task: &Task,
        nodes: &[Node],
        exclude: &HashSet<String>,
    ) -> Vec<NodeScore> {
        let mut scores = Vec::new();
        for node in nodes {
            if exclude.contains(&node.node_id) {
                continue;
            }
            if !node.meets_requirements(&task.requirements) {
                continue;
            }
            scores.push(self.score_node(node, task).await);
        }

        scores.sort_by(|a, b| {
            b.total
                .partial_cmp(&a.total)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });

        if let Some(best) = scores.first() {
            debug!("任务 {} 的最佳候选: {}", task.task_id, best);
        }
        scores
    }

    async fn score_node(&self, node: &Node, task: &Task) -> NodeScore {
        let model_compatibility = self.score_model_compatibility(node, task);
        let resource_availability = self.score_resource_availability(node);
        let performance_history = self.score_performance_history(node, &task.model).await;
        let load_balance = 1.0 - node.load_ratio();
        let model_affinity = self.score_model_affinity(node, &task.model).await;

        let weights = self.strategy.weights();
        let total = model_compatibility * weights.model_compatibility
            + resource_availability * weights.resource_availability
            + performance_history * weights.performance_history
            + load_balance * weights.load_balance
            + model_affinity * weights.model_affinity;

        NodeScore {
            node_id: node.node_id.clone(),
            total,
            model_compatibility,
            resource_availability,
            performance_history,
            load_balance,
            model_affinity,
        }
    }

    /// 模型兼容性评分
    ///
    /// 明确支持的模型记满分；"auto" 按GPU/CPU匹配度和内存余量折算；
    /// 其他未知模型记中性分0.5。偏好模型的命中提供少量加分。
    fn score_model_compatibility(&self, node: &Node, task: &Task) -> f64 {
        let base = if node.supports_model(&task.model) {
            1.0
        } else if task.model == "auto" {
            let mut blended: f64 = 0.0;
            if task.requirements.requires_gpu && node.has_gpu {
                blended += 0.4;
            } else if !task.requirements.requires_gpu {
                blended += 0.3;
            }
            if node.available_ram_gb >= task.requirements.min_ram_gb * 2.0 {
                blended += 0.3;
            }
            if task.requirements.min_gpu_memory_gb > 0.0
                && node.gpu_devices.iter().any(|d| {
                    d.available_memory_gb() >= task.requirements.min_gpu_memory_gb
                })
            {
                blended += 0.3;
            }
            blended.min(1.0)
        } else {
            0.5
        };

        let preferred_hits = task
            .requirements
            .preferred_models
            .iter()
            .filter(|m| node.supports_model(m))
            .count() as f64;

        (base + preferred_hits * 0.1).min(1.0)
    }

    /// 资源余量评分：内存余量、GPU显存余量与空闲度的加权混合
    fn score_resource_availability(&self, node: &Node) -> f64 {
        let ram_score = if node.total_ram_gb > 0.0 {
            (node.available_ram_gb / node.total_ram_gb).min(1.0)
        } else {
            0.0
        };

        // CPU-only节点取中性分
        let gpu_score = if node.has_gpu {
            let total: f64 = node.gpu_devices.iter().map(|d| d.total_memory_gb).sum();
            let allocated: f64 = node
                .gpu_devices
                .iter()
                .map(|d| d.allocated_memory_gb)
                .sum();
            if total > 0.0 {
                ((total - allocated) / total).clamp(0.0, 1.0)
            } else {
                0.0
            }
        } else {
            0.5
        };

        let idle_score = 1.0 - node.load_ratio();

        ram_score * 0.4 + gpu_score * 0.4 + idle_score * 0.2
    }

    /// 性能历史评分：无历史时记中性分0.5
    async fn score_performance_history(&self, node: &Node, model: &str) -> f64 {
        let performance = self.performance.read().await;
        match performance
            .get(model)
            .and_then(|by_node| by_node.get(&node.node_id))
        {
            Some(tokens_per_second) => (tokens_per_second / THROUGHPUT_BASELINE).min(1.0),
            None => 0.5,
        }
    }

    /// 模型亲和评分：近期服务次数越多，模型在该节点缓存的可能性越高
    async fn score_model_affinity(&self, node: &Node, model: &str) -> f64 {
        let affinity = self.affinity.read().await;
        let count = affinity
            .get(&node.node_id)
            .and_then(|by_model| by_model.get(model))
            .copied()
            .unwrap_or(0);
        (count as f64 / AFFINITY_BASELINE).min(1.0)
    }

    /// 记录一次分配，更新亲和度
    pub async fn record_assignment(&self, node_id: &str, model: &str) {
        let mut affinity = self.affinity.write().await;
        let counter = affinity
            .entry(node_id.to_string())
            .or_default()
            .entry(model.to_string())
            .or_insert(0);
        *counter += 1;
    }

    /// 记录执行方上报的吞吐量，供性能历史评分使用
    pub async fn record_throughput(&self, node_id: &str, model: &str, tokens_per_second: f64) {
        let mut performance = self.performance.write().await;
        performance
            .entry(model.to_string())
            .or_default()
            .insert(node_id.to_string(), tokens_per_second);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_domain::models::{
        GpuDevice, NodeCapabilities, NodeRegistration, TaskRequirements, TaskSubmission,
    };

    fn make_node(node_id: &str, has_gpu: bool, max_concurrent: u32) -> Node {
        Node::new(NodeRegistration {
            node_id: node_id.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8900,
            capabilities: NodeCapabilities {
                cpu_cores: 8,
                total_ram_gb: 32.0,
                available_ram_gb: 24.0,
                has_gpu,
                gpu_devices: if has_gpu {
                    vec![GpuDevice {
                        total_memory_gb: 24.0,
                        allocated_memory_gb: 4.0,
                        compute_capability: "8.6".to_string(),
                    }]
                } else {
                    vec![]
                },
                supported_models: vec!["llama-7b".to_string()],
                max_concurrent_tasks: max_concurrent,
            },
        })
    }

    fn make_task(model: &str, requires_gpu: bool) -> Task {
        Task::new(TaskSubmission {
            model: model.to_string(),
            input: serde_json::json!({}),
            requirements: TaskRequirements {
                requires_gpu,
                min_ram_gb: 4.0,
                ..Default::default()
            },
            priority: 5,
            max_retries: 3,
        })
    }

    #[tokio::test]
    async fn test_hard_filter_excludes_non_gpu_nodes() {
        let matcher = NodeMatcher::new(SchedulingStrategy::Balanced);
        let nodes = vec![make_node("cpu-1", false, 2), make_node("gpu-1", true, 2)];
        let task = make_task("llama-7b", true);

        let ranked = matcher.rank(&task, &nodes, &HashSet::new()).await;
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].node_id, "gpu-1");
    }

    #[tokio::test]
    async fn test_supported_model_scores_full_compatibility() {
        let matcher = NodeMatcher::new(SchedulingStrategy::Balanced);
        let node = make_node("node-1", true, 2);

        let supported = make_task("llama-7b", false);
        let unknown = make_task("mystery-model", false);

        let ranked = matcher.rank(&supported, &[node.clone()], &HashSet::new()).await;
        assert_eq!(ranked[0].model_compatibility, 1.0);

        let ranked = matcher.rank(&unknown, &[node], &HashSet::new()).await;
        assert_eq!(ranked[0].model_compatibility, 0.5);
    }

    #[tokio::test]
    async fn test_load_balance_prefers_idle_node() {
        let matcher = NodeMatcher::new(SchedulingStrategy::LeastLoaded);
        let idle = make_node("idle", false, 4);
        let mut busy = make_node("busy", false, 4);
        busy.current_tasks = 3;

        let task = make_task("llama-7b", false);
        let ranked = matcher.rank(&task, &[busy, idle], &HashSet::new()).await;
        assert_eq!(ranked[0].node_id, "idle");
        assert!(ranked[0].total > ranked[1].total);
    }

    #[tokio::test]
    async fn test_exact_tie_breaks_lexicographically() {
        let matcher = NodeMatcher::new(SchedulingStrategy::Balanced);
        // 两个完全相同的节点，得分必然相同
        let node_b = make_node("node-b", false, 2);
        let node_a = make_node("node-a", false, 2);

        let task = make_task("llama-7b", false);
        let ranked = matcher.rank(&task, &[node_b, node_a], &HashSet::new()).await;
        assert_eq!(ranked[0].node_id, "node-a");
        assert_eq!(ranked[1].node_id, "node-b");
    }

    #[tokio::test]
    async fn test_exclude_set_skips_nodes() {
        let matcher = NodeMatcher::new(SchedulingStrategy::Balanced);
        let nodes = vec![make_node("node-a", false, 2), make_node("node-b", false, 2)];
        let task = make_task("llama-7b", false);

        let mut exclude = HashSet::new();
        exclude.insert("node-a".to_string());
        let ranked = matcher.rank(&task, &nodes, &exclude).await;
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].node_id, "node-b");
    }

    #[tokio::test]
    async fn test_affinity_grows_with_assignments() {
        let matcher = NodeMatcher::new(SchedulingStrategy::ModelAffinity);
        let node = make_node("node-1", false, 8);
        let task = make_task("llama-7b", false);

        let before = matcher.rank(&task, &[node.clone()], &HashSet::new()).await;
        assert_eq!(before[0].model_affinity, 0.0);

        for _ in 0..5 {
            matcher.record_assignment("node-1", "llama-7b").await;
        }
        let after = matcher.rank(&task, &[node], &HashSet::new()).await;
        assert!((after[0].model_affinity - 0.5).abs() < 1e-9);
        assert!(after[0].total > before[0].total);
    }

    #[tokio::test]
    async fn test_performance_history_influences_score() {
        let matcher = NodeMatcher::new(SchedulingStrategy::PerformanceBiased);
        let fast = make_node("fast", false, 2);
        let slow = make_node("slow", false, 2);
        let task = make_task("llama-7b", false);

        matcher.record_throughput("fast", "llama-7b", 20.0).await;
        matcher.record_throughput("slow", "llama-7b", 1.0).await;

        let ranked = matcher
            .rank(&task, &[slow, fast], &HashSet::new())
            .await;
        assert_eq!(ranked[0].node_id, "fast");
        // 吞吐量按基准值封顶
        assert_eq!(ranked[0].performance_history, 1.0);
        assert!((ranked[1].performance_history - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_full_node_filtered_out() {
        let matcher = NodeMatcher::new(SchedulingStrategy::Balanced);
        let mut node = make_node("node-1", false, 2);
        node.current_tasks = 2;
        let task = make_task("llama-7b", false);

        let ranked = matcher.rank(&task, &[node], &HashSet::new()).await;
        assert!(ranked.is_empty());
    }
}
