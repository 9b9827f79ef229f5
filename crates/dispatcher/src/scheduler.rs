use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use orchestrator_core::{
    config::SchedulerConfig,
    traits::InferenceExecutor,
    OrchestratorError, OrchestratorResult,
};
use orchestrator_domain::models::{
    FailureKind, Node, NodeFilter, Task, TaskError, TaskStatus, TaskStatusReport,
    TaskSubmission,
};
use orchestrator_domain::repositories::{NodeRegistry, TaskRepository};

use crate::matcher::NodeMatcher;

/// 任务调度器
///
/// 驱动任务从提交到终止的完整生命周期：
/// - 提交时做参数校验和乐观可行性预检
/// - 匹配循环按 (优先级降序, 创建时间升序) 逐个尝试分配
/// - 分配采用两阶段模式：基于快照过滤评分，再原子预留；
///   预留失败说明快照已过期，顺延到下一个候选
/// - 执行投递在独立任务中进行，不在匹配循环内同步等待
/// - 超时计时独立于节点上报，按 `started_at` 判定
///
/// 内部字段全部为共享句柄，克隆成本低，投递执行时克隆自身
/// 进入后台任务。
#[derive(Clone)]
pub struct TaskScheduler {
    registry: Arc<dyn NodeRegistry>,
    task_repo: Arc<dyn TaskRepository>,
    matcher: Arc<NodeMatcher>,
    executor: Arc<dyn InferenceExecutor>,
    config: SchedulerConfig,
    running: Arc<RwLock<bool>>,
}

impl TaskScheduler {
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        task_repo: Arc<dyn TaskRepository>,
        matcher: Arc<NodeMatcher>,
        executor: Arc<dyn InferenceExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            task_repo,
            matcher,
            executor,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 提交任务
    ///
    /// 校验失败的提交被同步拒绝，不会进入任务存储。通过校验后做
    /// 乐观可行性预检：如果当前注册的节点（无论负载和在线状态）
    /// 都永远无法满足硬性约束，同步返回 `NoSuitableNode`。
    pub async fn submit(&self, submission: TaskSubmission) -> OrchestratorResult<Task> {
        Self::validate_submission(&submission)?;

        let nodes = self.registry.list().await?;
        let feasible = nodes
            .iter()
            .any(|n| n.could_ever_satisfy(&submission.requirements));
        if !feasible {
            info!("任务提交被拒绝：没有节点能够满足资源需求");
            return Err(OrchestratorError::NoSuitableNode(
                "当前注册的节点均无法满足任务的资源需求".to_string(),
            ));
        }

        let mut task = Task::new(submission);
        task.transition_to(TaskStatus::Queued)?;
        self.task_repo.create(&task).await?;

        info!(
            "任务 {} 已入队 (模型: {}, 优先级: {})",
            task.task_id, task.model, task.priority
        );
        Ok(task)
    }

    fn validate_submission(submission: &TaskSubmission) -> OrchestratorResult<()> {
        if submission.model.is_empty() {
            return Err(OrchestratorError::InvalidTaskParams(
                "model 不能为空".to_string(),
            ));
        }
        if !(1..=10).contains(&submission.priority) {
            return Err(OrchestratorError::InvalidTaskParams(format!(
                "priority 必须在 1-10 之间，当前值: {}",
                submission.priority
            )));
        }
        if submission.max_retries > 10 {
            return Err(OrchestratorError::InvalidTaskParams(format!(
                "max_retries 必须在 0-10 之间，当前值: {}",
                submission.max_retries
            )));
        }
        let duration = submission.requirements.max_duration_seconds;
        if !(30..=3600).contains(&duration) {
            return Err(OrchestratorError::InvalidTaskParams(format!(
                "max_duration_seconds 必须在 30-3600 之间，当前值: {duration}"
            )));
        }
        if submission.requirements.min_ram_gb < 0.0
            || submission.requirements.min_gpu_memory_gb < 0.0
        {
            return Err(OrchestratorError::InvalidTaskParams(
                "资源需求不能为负数".to_string(),
            ));
        }
        Ok(())
    }

    /// 运行匹配循环，直到收到停止信号
    pub async fn run(self: Arc<Self>) {
        info!(
            "启动调度循环 (间隔: {}秒, 策略: {})",
            self.config.tick_interval_seconds,
            self.matcher.strategy().name()
        );
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let interval = Duration::from_secs(self.config.tick_interval_seconds);
        loop {
            if !*self.running.read().await {
                info!("收到停止信号，退出调度循环");
                break;
            }
            // 瞬时错误只记录日志，循环继续
            if let Err(e) = self.tick().await {
                error!("调度循环出错: {}", e);
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// 执行一轮调度：处理排队任务 + 超时检测
    pub async fn tick(&self) -> OrchestratorResult<()> {
        let assigned = self.process_queued().await?;
        let timed_out = self.check_timeouts().await?;
        if assigned > 0 || timed_out > 0 {
            debug!("本轮调度分配 {} 个任务，超时 {} 个", assigned, timed_out);
        }
        Ok(())
    }

    /// 扫描排队任务并逐个尝试分配，返回成功分配的数量
    async fn process_queued(&self) -> OrchestratorResult<usize> {
        let queued = self.task_repo.get_queued().await?;
        if queued.is_empty() {
            return Ok(0);
        }

        let active_nodes = self.registry.list_active(&NodeFilter::default()).await?;
        let now = Utc::now();
        let mut assigned = 0;

        for task in queued {
            // 超过最大排队时长的任务以NoSuitableNode终止，不走重试
            if task.queued_seconds(now) > self.config.max_queued_seconds {
                warn!(
                    "任务 {} 排队超过 {} 秒，未找到可用节点",
                    task.task_id, self.config.max_queued_seconds
                );
                if let Err(e) = self
                    .task_repo
                    .fail(
                        &task.task_id,
                        TaskError::new(FailureKind::NoSuitableNode, "排队超时，无可用节点"),
                    )
                    .await
                {
                    error!("终止排队超时任务 {} 失败: {}", task.task_id, e);
                }
                continue;
            }

            match self.try_assign(&task, &active_nodes).await {
                Ok(Some(node)) => {
                    assigned += 1;
                    info!("任务 {} 已分配到节点 {}", task.task_id, node.node_id);
                }
                Ok(None) => {
                    debug!("任务 {} 本轮未找到可用节点，保持排队", task.task_id);
                }
                Err(e) => {
                    error!("分配任务 {} 时出错: {}", task.task_id, e);
                }
            }
        }
        Ok(assigned)
    }

    /// 对单个任务执行过滤、评分和原子预留
    ///
    /// 评分基于注册表快照，预留时快照可能已经过期；预留失败
    /// （节点已满）则顺延到下一个候选，同一轮内完成。
    async fn try_assign(
        &self,
        task: &Task,
        active_nodes: &[Node],
    ) -> OrchestratorResult<Option<Node>> {
        let ranked = self
            .matcher
            .rank(task, active_nodes, &HashSet::new())
            .await;

        for candidate in ranked {
            match self.registry.try_reserve(&candidate.node_id).await {
                Ok(()) => {
                    let node = match self.registry.get(&candidate.node_id).await {
                        Ok(node) => node,
                        Err(e) => {
                            // 节点在预留后被移除，撤销占用并尝试下一个
                            warn!("节点 {} 在预留后不可用: {}", candidate.node_id, e);
                            let _ = self.registry.release(&candidate.node_id).await;
                            continue;
                        }
                    };

                    self.task_repo.assign(&task.task_id, &node.node_id).await?;
                    self.matcher
                        .record_assignment(&node.node_id, &task.model)
                        .await;
                    self.spawn_execution(task.clone(), node.clone());
                    return Ok(Some(node));
                }
                Err(OrchestratorError::NodeFull { .. }) => {
                    // 快照过期，其他调度方抢先占用，尝试次优候选
                    debug!(
                        "节点 {} 已满（快照过期），任务 {} 尝试下一候选",
                        candidate.node_id, task.task_id
                    );
                    continue;
                }
                Err(OrchestratorError::NodeNotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// 在独立任务中投递执行，不阻塞匹配循环
    fn spawn_execution(&self, task: Task, node: Node) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let payload = task.to_payload();
            let endpoint = node.endpoint();
            let timeout = Duration::from_secs(payload.max_duration_seconds);

            let result =
                tokio::time::timeout(timeout, scheduler.executor.execute(&endpoint, &payload))
                    .await;

            let outcome = match result {
                Ok(Ok(outcome)) => {
                    scheduler
                        .finish_success(
                            &task.task_id,
                            &node.node_id,
                            outcome.output,
                            outcome.tokens_per_second,
                        )
                        .await
                }
                Ok(Err(e)) => {
                    warn!("任务 {} 在节点 {} 执行失败: {}", task.task_id, node.node_id, e);
                    scheduler
                        .finish_failure(
                            &task.task_id,
                            &node.node_id,
                            FailureKind::ExecutionError,
                            e.to_string(),
                        )
                        .await
                }
                Err(_) => {
                    warn!(
                        "任务 {} 在节点 {} 上执行超过 {} 秒",
                        task.task_id, node.node_id, payload.max_duration_seconds
                    );
                    scheduler.executor.cancel(&endpoint, &task.task_id).await;
                    scheduler
                        .finish_failure(
                            &task.task_id,
                            &node.node_id,
                            FailureKind::TaskTimeout,
                            "任务执行超时",
                        )
                        .await
                }
            };

            if let Err(e) = outcome {
                error!("处理任务 {} 的执行结果失败: {}", task.task_id, e);
            }
        });
    }

    /// 独立的超时扫描，不依赖节点回报
    async fn check_timeouts(&self) -> OrchestratorResult<usize> {
        let running = self.task_repo.get_by_status(TaskStatus::Running).await?;
        let now = Utc::now();
        let mut timed_out = 0;

        for task in running {
            if !task.is_execution_expired(now) {
                continue;
            }
            let Some(node_id) = task.assigned_node_id.clone() else {
                continue;
            };
            warn!(
                "任务 {} 超过时限 {} 秒，强制终止",
                task.task_id, task.requirements.max_duration_seconds
            );

            // 尽力通知节点取消，不等待结果
            if let Ok(node) = self.registry.get(&node_id).await {
                let executor = Arc::clone(&self.executor);
                let endpoint = node.endpoint();
                let task_id = task.task_id.clone();
                tokio::spawn(async move {
                    executor.cancel(&endpoint, &task_id).await;
                });
            }

            match self
                .finish_failure(
                    &task.task_id,
                    &node_id,
                    FailureKind::TaskTimeout,
                    "任务执行超时",
                )
                .await
            {
                Ok(_) => timed_out += 1,
                Err(e) => error!("终止超时任务 {} 失败: {}", task.task_id, e),
            }
        }
        Ok(timed_out)
    }

    /// 节点上报执行结果的入口
    pub async fn report_outcome(
        &self,
        task_id: &str,
        report: TaskStatusReport,
    ) -> OrchestratorResult<Task> {
        let task = self.task_repo.get(task_id).await?;
        let Some(node_id) = task.assigned_node_id.clone() else {
            return Err(OrchestratorError::InvalidTaskParams(format!(
                "任务 {task_id} 当前没有节点分配，无法上报结果"
            )));
        };

        match report.status.as_str() {
            "completed" => {
                self.finish_success(
                    task_id,
                    &node_id,
                    report.result.unwrap_or(serde_json::Value::Null),
                    report.tokens_per_second,
                )
                .await
            }
            "failed" => {
                self.finish_failure(
                    task_id,
                    &node_id,
                    FailureKind::ExecutionError,
                    report
                        .error
                        .unwrap_or_else(|| "节点上报执行失败".to_string()),
                )
                .await
            }
            other => Err(OrchestratorError::InvalidTaskParams(format!(
                "无效的上报状态: {other}"
            ))),
        }
    }

    /// 取消任务
    ///
    /// 排队中的任务直接取消；运行中的任务本地状态立即生效，
    /// 对执行节点的取消通知只是尽力而为。
    pub async fn cancel(&self, task_id: &str) -> OrchestratorResult<Task> {
        let task = self.task_repo.get(task_id).await?;
        let node_id = task.assigned_node_id.clone();

        let cancelled = self.task_repo.cancel(task_id).await?;
        info!("任务 {} 已取消 (原状态: {:?})", task_id, task.status);

        if task.status == TaskStatus::Running {
            if let Some(node_id) = node_id {
                if let Err(e) = self.registry.release(&node_id).await {
                    warn!("释放节点 {} 负载失败: {}", node_id, e);
                }
                if let Ok(node) = self.registry.get(&node_id).await {
                    let executor = Arc::clone(&self.executor);
                    let endpoint = node.endpoint();
                    let task_id = task_id.to_string();
                    tokio::spawn(async move {
                        executor.cancel(&endpoint, &task_id).await;
                    });
                }
            }
        }
        Ok(cancelled)
    }

    /// 成功终止：落结果、释放节点、累计统计、记录吞吐
    async fn finish_success(
        &self,
        task_id: &str,
        node_id: &str,
        result: serde_json::Value,
        tokens_per_second: Option<f64>,
    ) -> OrchestratorResult<Task> {
        let task = self.task_repo.get(task_id).await?;
        if !self.still_assigned(&task, node_id) {
            debug!(
                "忽略节点 {} 对任务 {} 的过期结果 (当前状态: {:?})",
                node_id, task_id, task.status
            );
            return Ok(task);
        }

        let completed = self.task_repo.complete(task_id, result).await?;
        self.release_node(node_id, true).await;
        if let Some(tps) = tokens_per_second {
            self.matcher
                .record_throughput(node_id, &completed.model, tps)
                .await;
        }
        info!("任务 {} 在节点 {} 上执行完成", task_id, node_id);
        Ok(completed)
    }

    /// 失败终止：落错误、释放节点，重试预算未耗尽时重新入队
    async fn finish_failure(
        &self,
        task_id: &str,
        node_id: &str,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> OrchestratorResult<Task> {
        let task = self.task_repo.get(task_id).await?;
        if !self.still_assigned(&task, node_id) {
            debug!(
                "忽略节点 {} 对任务 {} 的过期失败 (当前状态: {:?})",
                node_id, task_id, task.status
            );
            return Ok(task);
        }

        let failed = self
            .task_repo
            .fail(task_id, TaskError::new(kind, message))
            .await?;
        self.release_node(node_id, false).await;

        // 迁移耗尽的任务不再走执行重试，回退链本身就是它的重试预算
        let retryable = !matches!(kind, FailureKind::Cancelled | FailureKind::HandoffExhausted);
        if retryable && failed.can_retry() {
            let requeued = self.task_repo.requeue_for_retry(task_id).await?;
            info!(
                "任务 {} 重新入队重试 ({}/{})",
                task_id, requeued.retry_count, requeued.max_retries
            );
            return Ok(requeued);
        }
        Ok(failed)
    }

    /// 节点失联后的任务恢复入口：按执行失败处理，重试预算未耗尽时重新入队
    pub async fn handle_node_failure(
        &self,
        task_id: &str,
        node_id: &str,
    ) -> OrchestratorResult<Task> {
        self.finish_failure(
            task_id,
            node_id,
            FailureKind::ExecutionError,
            "执行节点心跳失联",
        )
        .await
    }

    /// 执行结果必须来自任务当前分配的节点，迁移后旧节点的
    /// 迟到结果一律丢弃，保证同一时刻只有一个分配生效。
    fn still_assigned(&self, task: &Task, node_id: &str) -> bool {
        task.is_running() && task.assigned_node_id.as_deref() == Some(node_id)
    }

    async fn release_node(&self, node_id: &str, success: bool) {
        if let Err(e) = self.registry.release(node_id).await {
            // 节点可能已被清理
            debug!("释放节点 {} 负载失败: {}", node_id, e);
        }
        if let Err(e) = self.registry.record_outcome(node_id, success).await {
            debug!("更新节点 {} 统计失败: {}", node_id, e);
        }
    }
}
