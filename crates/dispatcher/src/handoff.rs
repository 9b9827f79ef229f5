use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use orchestrator_core::{
    config::HandoffConfig,
    traits::PeerTransport,
    OrchestratorError, OrchestratorResult,
};
use orchestrator_domain::models::{
    HandoffSession, Node, NodeFilter, NodeStatus, Task,
};
use orchestrator_domain::repositories::{HandoffRepository, NodeRegistry, TaskRepository};

use crate::matcher::NodeMatcher;

/// 迁移协调器
///
/// 把一个运行中的任务从源节点迁移到目标节点：
/// - 每个任务同一时刻至多一个活跃会话，并发请求被拒绝
/// - 目标选择复用调度器的过滤评分逻辑，排除源节点和已尝试目标
/// - 迁移前做双向可达性握手，维护节点间的可达图
/// - 转发失败沿评分降序的回退链尝试，次数受 max_retries 约束
pub struct HandoffCoordinator {
    registry: Arc<dyn NodeRegistry>,
    task_repo: Arc<dyn TaskRepository>,
    handoff_repo: Arc<dyn HandoffRepository>,
    matcher: Arc<NodeMatcher>,
    transport: Arc<dyn PeerTransport>,
    config: HandoffConfig,
    /// 节点间可达图，握手成功后双向记录
    links: RwLock<HashMap<String, HashSet<String>>>,
    /// 进行中迁移的任务ID集合，作为每任务的迁移锁
    in_flight: Mutex<HashSet<String>>,
    running: Arc<RwLock<bool>>,
}

impl HandoffCoordinator {
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        task_repo: Arc<dyn TaskRepository>,
        handoff_repo: Arc<dyn HandoffRepository>,
        matcher: Arc<NodeMatcher>,
        transport: Arc<dyn PeerTransport>,
        config: HandoffConfig,
    ) -> Self {
        Self {
            registry,
            task_repo,
            handoff_repo,
            matcher,
            transport,
            config,
            links: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 发起一次任务迁移
    ///
    /// `target_node_id` 省略时自动选择评分最高的可行目标。
    /// 同一任务的并发迁移请求返回 `HandoffInProgress`。
    pub async fn handoff(
        &self,
        task_id: &str,
        source_node_id: &str,
        target_node_id: Option<String>,
    ) -> OrchestratorResult<HandoffSession> {
        // 每任务迁移锁：串行化，不交错
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.contains(task_id) {
                return Err(OrchestratorError::HandoffInProgress {
                    task_id: task_id.to_string(),
                });
            }
            if self.handoff_repo.active_for_task(task_id).await?.is_some() {
                return Err(OrchestratorError::HandoffInProgress {
                    task_id: task_id.to_string(),
                });
            }
            in_flight.insert(task_id.to_string());
        }

        let result = self
            .run_handoff(task_id, source_node_id, target_node_id)
            .await;

        {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.remove(task_id);
        }
        result
    }

    async fn run_handoff(
        &self,
        task_id: &str,
        source_node_id: &str,
        target_node_id: Option<String>,
    ) -> OrchestratorResult<HandoffSession> {
        let task = self.task_repo.get(task_id).await?;
        if !task.is_running() || task.assigned_node_id.as_deref() != Some(source_node_id) {
            return Err(OrchestratorError::InvalidTaskParams(format!(
                "任务 {task_id} 未运行在节点 {source_node_id} 上，无法迁移"
            )));
        }

        // 源节点可能已被清理（长期失联后由巡检移除）
        let source = self.registry.get(source_node_id).await.ok();

        let mut session = HandoffSession::new(
            task_id.to_string(),
            source_node_id.to_string(),
            self.config.max_retries,
        );
        self.handoff_repo.create(&session).await?;

        info!(
            "开始迁移任务 {} (源节点: {}, 指定目标: {:?})",
            task_id, source_node_id, target_node_id
        );

        self.run_fallback_chain(&mut session, &task, source, target_node_id)
            .await
    }

    /// 沿评分降序的回退链逐个尝试目标，直到成功或重试耗尽
    async fn run_fallback_chain(
        &self,
        session: &mut HandoffSession,
        task: &Task,
        source: Option<Node>,
        explicit_target: Option<String>,
    ) -> OrchestratorResult<HandoffSession> {
        let mut tried: HashSet<String> = HashSet::new();
        tried.insert(session.source_node_id.clone());

        // 显式指定的目标优先，此后回退到自动选择
        let mut pending_explicit = explicit_target;
        let mut attempted_any = false;

        while session.can_retry() {
            let candidate = match pending_explicit.take() {
                Some(node_id) => {
                    let node = match self.registry.get(&node_id).await {
                        Ok(node) => node,
                        Err(e) => {
                            // 会话必须落到终止态，否则会一直挡住后续迁移
                            session.mark_failed(format!("指定目标 {node_id} 不存在"));
                            self.handoff_repo.update(session).await?;
                            return Err(e);
                        }
                    };
                    if !node.meets_requirements(&task.requirements) {
                        session.mark_failed(format!("指定目标 {node_id} 不满足任务需求"));
                        self.handoff_repo.update(session).await?;
                        return Err(OrchestratorError::NoSuitableNode(format!(
                            "指定的迁移目标 {node_id} 不满足任务的资源需求"
                        )));
                    }
                    Some((node, true))
                }
                None => self
                    .next_candidate(task, &tried)
                    .await?
                    .map(|node| (node, false)),
            };

            let Some((target, is_explicit)) = candidate else {
                break;
            };
            tried.insert(target.node_id.clone());

            // 可达性检查：自动候选握手失败只跳过不消耗重试，
            // 显式目标的握手失败计为一次尝试
            if !self.ensure_reachable(source.as_ref(), &target).await {
                warn!(
                    "节点 {} 与 {} 不可达，跳过该候选",
                    session.source_node_id, target.node_id
                );
                if is_explicit {
                    session.retries += 1;
                    session.error = Some(format!("目标 {} 不可达", target.node_id));
                    self.handoff_repo.update(session).await?;
                }
                attempted_any = true;
                continue;
            }

            // 与正常调度同一条原子预留路径，防止迁移造成超卖
            match self.registry.try_reserve(&target.node_id).await {
                Ok(()) => {}
                Err(OrchestratorError::NodeFull { .. })
                | Err(OrchestratorError::NodeNotFound { .. }) => {
                    debug!("目标 {} 已满或不可用，尝试下一候选", target.node_id);
                    attempted_any = true;
                    continue;
                }
                Err(e) => return Err(e),
            }

            session.mark_in_progress(&target.node_id);
            self.handoff_repo.update(session).await?;
            attempted_any = true;

            match self
                .transport
                .forward_handoff(
                    &target.endpoint(),
                    &task.to_payload(),
                    &session.source_node_id,
                )
                .await
            {
                Ok(()) => {
                    return self.finish_migration(session, task, &target).await;
                }
                Err(e) => {
                    warn!(
                        "转发任务 {} 到节点 {} 失败: {}",
                        task.task_id, target.node_id, e
                    );
                    if let Err(release_err) = self.registry.release(&target.node_id).await {
                        debug!("撤销目标 {} 预留失败: {}", target.node_id, release_err);
                    }
                    session.retries += 1;
                    session.error = Some(e.to_string());
                    self.handoff_repo.update(session).await?;
                }
            }
        }

        if !attempted_any {
            // 一个候选都没有：不动任务状态，交由调用方决定重新排队
            session.mark_failed("没有可用的迁移目标");
            self.handoff_repo.update(session).await?;
            return Err(OrchestratorError::NoSuitableNode(
                "没有满足任务需求的迁移目标".to_string(),
            ));
        }

        self.exhaust(session, task).await
    }

    /// 迁移成功：更新任务分配，释放源节点负载
    async fn finish_migration(
        &self,
        session: &mut HandoffSession,
        task: &Task,
        target: &Node,
    ) -> OrchestratorResult<HandoffSession> {
        match self.task_repo.reassign(&task.task_id, &target.node_id).await {
            Ok(_) => {}
            Err(e) => {
                // 任务在迁移过程中已终止（取消或完成），撤销目标预留
                warn!("迁移中任务 {} 状态已变化: {}", task.task_id, e);
                let _ = self.registry.release(&target.node_id).await;
                session.mark_cancelled();
                self.handoff_repo.update(session).await?;
                return Ok(session.clone());
            }
        }

        if let Err(e) = self.registry.release(&session.source_node_id).await {
            debug!(
                "释放源节点 {} 负载失败: {}",
                session.source_node_id, e
            );
        }

        session.mark_completed();
        self.handoff_repo.update(session).await?;

        info!(
            "任务 {} 已从节点 {} 迁移到 {} (重试 {} 次)",
            task.task_id, session.source_node_id, target.node_id, session.retries
        );
        Ok(session.clone())
    }

    /// 重试耗尽：任务终止为HandoffExhausted，释放源节点负载
    async fn exhaust(
        &self,
        session: &mut HandoffSession,
        task: &Task,
    ) -> OrchestratorResult<HandoffSession> {
        session.mark_failed("迁移重试次数已耗尽");
        self.handoff_repo.update(session).await?;

        error!(
            "任务 {} 迁移失败，已尝试 {} 次",
            task.task_id, session.retries
        );

        match self
            .task_repo
            .fail(
                &task.task_id,
                orchestrator_domain::models::TaskError::new(
                    orchestrator_domain::models::FailureKind::HandoffExhausted,
                    "迁移重试次数已耗尽",
                ),
            )
            .await
        {
            Ok(_) => {
                if let Err(e) = self.registry.release(&session.source_node_id).await {
                    debug!("释放源节点 {} 负载失败: {}", session.source_node_id, e);
                }
                let _ = self
                    .registry
                    .record_outcome(&session.source_node_id, false)
                    .await;
            }
            Err(e) => {
                // 任务已在别处终止，负载也已释放
                debug!("任务 {} 终止失败: {}", task.task_id, e);
            }
        }
        Ok(session.clone())
    }

    /// 选择下一个未尝试过的最佳目标
    async fn next_candidate(
        &self,
        task: &Task,
        tried: &HashSet<String>,
    ) -> OrchestratorResult<Option<Node>> {
        let active = self.registry.list_active(&NodeFilter::default()).await?;
        let ranked = self.matcher.rank(task, &active, tried).await;
        let Some(best) = ranked.first() else {
            return Ok(None);
        };
        Ok(active.into_iter().find(|n| n.node_id == best.node_id))
    }

    /// 确认源与目标可达，必要时做双向握手
    ///
    /// 源节点已失联或已被清理时跳过握手：任务状态由控制平面
    /// 转发，迁移不依赖源节点在线。
    async fn ensure_reachable(&self, source: Option<&Node>, target: &Node) -> bool {
        let Some(source) = source else {
            return true;
        };
        if source.status != NodeStatus::Online {
            debug!(
                "源节点 {} 已离线，跳过可达性握手",
                source.node_id
            );
            return true;
        }

        {
            let links = self.links.read().await;
            if links
                .get(&source.node_id)
                .map(|peers| peers.contains(&target.node_id))
                .unwrap_or(false)
            {
                return true;
            }
        }

        match self
            .transport
            .establish_link(&source.endpoint(), &target.endpoint())
            .await
        {
            Ok(()) => {
                let mut links = self.links.write().await;
                links
                    .entry(source.node_id.clone())
                    .or_default()
                    .insert(target.node_id.clone());
                links
                    .entry(target.node_id.clone())
                    .or_default()
                    .insert(source.node_id.clone());
                true
            }
            Err(e) => {
                debug!(
                    "节点 {} 与 {} 握手失败: {}",
                    source.node_id, target.node_id, e
                );
                false
            }
        }
    }

    /// 运行会话清理循环，直到收到停止信号
    ///
    /// 与节点存活巡检相互独立。
    pub async fn run_sweep(self: Arc<Self>) {
        info!(
            "启动迁移会话清理循环 (间隔: {}秒, 保留: {}秒)",
            self.config.sweep_interval_seconds, self.config.session_retention_seconds
        );
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let interval = Duration::from_secs(self.config.sweep_interval_seconds);
        loop {
            if !*self.running.read().await {
                info!("收到停止信号，退出会话清理循环");
                break;
            }
            match self
                .handoff_repo
                .purge_expired(self.config.session_retention_seconds, Utc::now())
                .await
            {
                Ok(0) => {}
                Ok(purged) => info!("清理了 {} 个过期迁移会话", purged),
                Err(e) => error!("清理迁移会话时出错: {}", e),
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }
}
