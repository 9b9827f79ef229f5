//! 数据仓储层接口定义
//!
//! 此模块定义了控制平面的三个核心仓储抽象：
//! - 节点注册表 (NodeRegistry) - 节点存在性、能力、存活和负载的唯一事实来源
//! - 任务仓储 (TaskRepository) - 任务存在性与生命周期状态的唯一事实来源
//! - 迁移会话仓储 (HandoffRepository) - 迁移会话记录
//!
//! ## 所有权约定
//!
//! 节点的负载与状态字段由注册表独占：调度器和迁移协调器只能通过
//! `try_reserve` / `release` 等原子操作间接修改，绝不直接改写。
//! 任务状态由任务仓储独占，调度器与迁移协调器通过它请求状态转换。
//!
//! ## 并发契约
//!
//! `try_reserve` / `release` 必须对单个节点线性化：两个并发的分配尝试
//! 不允许同时越过容量上限。实现方需保证检查与自增在一个原子步骤内完成。
//!
//! 所有接口实现 `Send + Sync`，返回 `OrchestratorResult<T>` 统一错误处理。
//! 后端可以是内存表、KV存储或数据库，核心逻辑不依赖具体引擎。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use orchestrator_core::OrchestratorResult;

use crate::models::{
    HandoffSession, Node, NodeFilter, NodeHeartbeat, NodeRegistration, Task, TaskError,
    TaskStatus,
};

/// 节点注册表接口
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// 注册节点
    ///
    /// 同一节点重复注册视为能力刷新：更新能力快照并重置心跳，
    /// 保留当前负载与统计计数。
    async fn register(&self, registration: NodeRegistration) -> OrchestratorResult<Node>;

    /// 刷新节点心跳
    ///
    /// 刷新心跳时间并置为在线，可选地更新负载和资源用量。
    /// 节点不存在时返回 `NodeNotFound`。
    async fn heartbeat(
        &self,
        node_id: &str,
        heartbeat: NodeHeartbeat,
    ) -> OrchestratorResult<()>;

    /// 获取节点快照
    ///
    /// 返回的状态已应用惰性存活判定：心跳超过存活阈值的节点
    /// 无论存储状态如何都显示为离线。
    async fn get(&self, node_id: &str) -> OrchestratorResult<Node>;

    /// 获取所有节点快照（惰性存活判定后）
    async fn list(&self) -> OrchestratorResult<Vec<Node>>;

    /// 获取有效状态为在线的节点
    ///
    /// 过滤条件可按GPU、可用内存下限、模型支持缩小候选范围，
    /// 供调度器在评分前收窄候选集。
    async fn list_active(&self, filter: &NodeFilter) -> OrchestratorResult<Vec<Node>>;

    /// 原子预留一个任务槽位
    ///
    /// 在一个原子步骤内检查 `current_tasks < max_concurrent_tasks` 并自增。
    /// 这是负载唯一的增加路径，用于阻止并发调度造成的超卖。
    /// 已满时返回 `NodeFull`。
    async fn try_reserve(&self, node_id: &str) -> OrchestratorResult<()>;

    /// 释放一个任务槽位（下限为0）
    async fn release(&self, node_id: &str) -> OrchestratorResult<()>;

    /// 累计任务完成/失败计数（仅用于统计上报）
    async fn record_outcome(&self, node_id: &str, success: bool) -> OrchestratorResult<()>;

    /// 显式注销节点
    async fn remove(&self, node_id: &str) -> OrchestratorResult<()>;

    /// 移除心跳超过过期窗口的节点，返回被移除的节点ID
    ///
    /// 过期窗口（默认24小时）与调度可见性使用的存活阈值（默认30秒）
    /// 是两个独立的策略参数。
    async fn remove_stale(&self, stale_after_seconds: i64) -> OrchestratorResult<Vec<String>>;
}

/// 任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 持久化新任务
    async fn create(&self, task: &Task) -> OrchestratorResult<()>;

    /// 根据ID获取任务，不存在时返回 `TaskNotFound`
    async fn get(&self, task_id: &str) -> OrchestratorResult<Task>;

    /// 获取指定状态的任务
    async fn get_by_status(&self, status: TaskStatus) -> OrchestratorResult<Vec<Task>>;

    /// 获取排队中的任务，按 (优先级降序, 创建时间升序) 排列
    ///
    /// 这是匹配循环每个tick的扫描顺序，tick内严格按此顺序处理。
    async fn get_queued(&self) -> OrchestratorResult<Vec<Task>>;

    /// 获取分配到指定节点且仍在运行的任务
    async fn get_running_on_node(&self, node_id: &str) -> OrchestratorResult<Vec<Task>>;

    /// 请求状态转换
    ///
    /// 按状态机规则校验，非法转换返回 `InvalidStateTransition`。
    async fn transition(&self, task_id: &str, next: TaskStatus) -> OrchestratorResult<Task>;

    /// 设置任务分配：置为Running并记录节点与开始时间
    async fn assign(&self, task_id: &str, node_id: &str) -> OrchestratorResult<Task>;

    /// 迁移时更新分配的节点，任务保持Running
    async fn reassign(&self, task_id: &str, node_id: &str) -> OrchestratorResult<Task>;

    /// 以结果终止任务（Completed）
    async fn complete(
        &self,
        task_id: &str,
        result: serde_json::Value,
    ) -> OrchestratorResult<Task>;

    /// 以结构化错误终止任务（Failed）
    async fn fail(&self, task_id: &str, error: TaskError) -> OrchestratorResult<Task>;

    /// 取消任务（Cancelled），本地状态立即生效
    async fn cancel(&self, task_id: &str) -> OrchestratorResult<Task>;

    /// 重试重新入队：retry_count自增，清空分配
    async fn requeue_for_retry(&self, task_id: &str) -> OrchestratorResult<Task>;

    /// 列出全部任务（诊断与统计用）
    async fn list(&self) -> OrchestratorResult<Vec<Task>>;
}

/// 迁移会话仓储接口
#[async_trait]
pub trait HandoffRepository: Send + Sync {
    /// 持久化会话
    async fn create(&self, session: &HandoffSession) -> OrchestratorResult<()>;

    /// 根据ID获取会话，不存在时返回 `HandoffNotFound`
    async fn get(&self, handoff_id: &str) -> OrchestratorResult<HandoffSession>;

    /// 覆盖更新会话
    async fn update(&self, session: &HandoffSession) -> OrchestratorResult<()>;

    /// 获取指定任务的未结束会话
    ///
    /// 每个任务同一时刻至多一个活跃会话，由迁移协调器负责串行化。
    async fn active_for_task(&self, task_id: &str) -> OrchestratorResult<Option<HandoffSession>>;

    /// 清理结束时间早于保留期的会话，返回清理数量
    async fn purge_expired(
        &self,
        retention_seconds: i64,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<u64>;

    /// 统计未结束的会话数量
    async fn count_active(&self) -> OrchestratorResult<u64>;

    /// 会话总数（含已结束未清理的）
    async fn count_total(&self) -> OrchestratorResult<u64>;
}
