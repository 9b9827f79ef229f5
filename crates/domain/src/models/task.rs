use chrono::{DateTime, Utc};
use orchestrator_core::{errors::OrchestratorError, traits::TaskPayload, OrchestratorResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务状态
///
/// 生命周期: Pending -> Queued -> Running -> {Completed | Failed | Cancelled}，
/// 另有重试路径 Failed -> Queued 和 Running -> Queued（节点迁移失败后重新排队）。
/// 终止状态不再发生任何转换。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// 状态机合法转换检查
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Queued) | (Pending, Cancelled) => true,
            (Queued, Running) | (Queued, Failed) | (Queued, Cancelled) => true,
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) => true,
            // 重试重新入队
            (Failed, Queued) | (Running, Queued) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// 任务终止失败的原因分类
///
/// 调用方通过查询任务状态获知失败原因，而不是在提交时阻塞等待。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NoSuitableNode,
    TaskTimeout,
    ExecutionError,
    HandoffExhausted,
    Cancelled,
}

/// 结构化的任务错误
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// 任务资源需求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRequirements {
    pub requires_gpu: bool,
    pub min_ram_gb: f64,
    pub min_gpu_memory_gb: f64,
    /// GPU计算能力下限，形如 "7.5"，按数值比较
    pub min_compute_capability: Option<String>,
    /// 仅参与评分的偏好模型列表，不构成硬性约束
    pub preferred_models: Vec<String>,
    pub max_duration_seconds: u64,
}

impl Default for TaskRequirements {
    fn default() -> Self {
        Self {
            requires_gpu: false,
            min_ram_gb: 1.0,
            min_gpu_memory_gb: 0.0,
            min_compute_capability: None,
            preferred_models: Vec::new(),
            max_duration_seconds: 300,
        }
    }
}

/// 任务提交请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub model: String,
    pub input: serde_json::Value,
    #[serde(default)]
    pub requirements: TaskRequirements,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_priority() -> u8 {
    1
}

fn default_max_retries() -> u32 {
    3
}

/// 推理任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    /// 模型标识，"auto" 表示由节点自行选择
    pub model: String,
    pub input: serde_json::Value,
    /// 优先级 1-10，10最高
    pub priority: u8,
    pub requirements: TaskRequirements,
    pub status: TaskStatus,
    pub assigned_node_id: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,
}

impl Task {
    pub fn new(submission: TaskSubmission) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            model: submission.model,
            input: submission.input,
            priority: submission.priority,
            requirements: submission.requirements,
            status: TaskStatus::Pending,
            assigned_node_id: None,
            retry_count: 0,
            max_retries: submission.max_retries,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    /// 校验并执行状态转换，维护时间戳与分配字段的一致性
    pub fn transition_to(&mut self, next: TaskStatus) -> OrchestratorResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        match next {
            TaskStatus::Running => {
                self.started_at = Some(Utc::now());
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                if self.completed_at.is_none() {
                    self.completed_at = Some(Utc::now());
                }
                self.assigned_node_id = None;
            }
            TaskStatus::Queued => {
                // 重新排队时清空上一轮的分配信息
                self.assigned_node_id = None;
                self.started_at = None;
                self.completed_at = None;
            }
            TaskStatus::Pending => {}
        }
        Ok(())
    }

    pub fn mark_completed(&mut self, result: serde_json::Value) -> OrchestratorResult<()> {
        self.transition_to(TaskStatus::Completed)?;
        self.result = Some(result);
        self.error = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, error: TaskError) -> OrchestratorResult<()> {
        self.transition_to(TaskStatus::Failed)?;
        self.error = Some(error);
        self.result = None;
        Ok(())
    }

    /// 取消在本地立即生效，终止原因记入error字段
    pub fn mark_cancelled(&mut self) -> OrchestratorResult<()> {
        self.transition_to(TaskStatus::Cancelled)?;
        self.error = Some(TaskError::new(FailureKind::Cancelled, "任务已被取消"));
        self.result = None;
        Ok(())
    }

    /// 是否还有重试预算
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// 任务排队时长（秒）
    pub fn queued_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }

    /// 执行是否已超过任务自身的时限
    pub fn is_execution_expired(&self, now: DateTime<Utc>) -> bool {
        match self.started_at {
            Some(started_at) => {
                (now - started_at).num_seconds() > self.requirements.max_duration_seconds as i64
            }
            None => false,
        }
    }

    pub fn to_payload(&self) -> TaskPayload {
        TaskPayload {
            task_id: self.task_id.clone(),
            model: self.model.clone(),
            input: self.input.clone(),
            max_duration_seconds: self.requirements.max_duration_seconds,
            retry_count: self.retry_count,
        }
    }
}

/// 节点上报的任务执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusReport {
    /// "completed" 或 "failed"
    pub status: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// 吞吐量（tokens/秒），用于性能历史评分
    pub tokens_per_second: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> TaskSubmission {
        TaskSubmission {
            model: "llama-7b".to_string(),
            input: serde_json::json!({"prompt": "hi"}),
            requirements: TaskRequirements::default(),
            priority: 5,
            max_retries: 2,
        }
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut task = Task::new(submission());
        assert_eq!(task.status, TaskStatus::Pending);

        task.transition_to(TaskStatus::Queued).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        assert!(task.started_at.is_some());

        task.mark_completed(serde_json::json!({"output": "ok"})).unwrap();
        assert!(task.is_terminal());
        assert!(task.completed_at.is_some());
        assert!(task.assigned_node_id.is_none());
        assert!(task.error.is_none());
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        let mut task = Task::new(submission());
        task.transition_to(TaskStatus::Queued).unwrap();
        task.transition_to(TaskStatus::Cancelled).unwrap();

        for next in [
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert!(task.transition_to(next).is_err());
        }
    }

    #[test]
    fn test_retry_requeue_clears_assignment() {
        let mut task = Task::new(submission());
        task.transition_to(TaskStatus::Queued).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        task.assigned_node_id = Some("node-1".to_string());

        task.transition_to(TaskStatus::Queued).unwrap();
        assert!(task.assigned_node_id.is_none());
        assert!(task.started_at.is_none());
    }

    #[test]
    fn test_failed_then_requeue_when_budget_remains() {
        let mut task = Task::new(submission());
        task.transition_to(TaskStatus::Queued).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        task.mark_failed(TaskError::new(FailureKind::ExecutionError, "节点执行失败"))
            .unwrap();

        assert!(task.can_retry());
        task.transition_to(TaskStatus::Queued).unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
    }

    #[test]
    fn test_execution_expiry() {
        let mut task = Task::new(submission());
        task.requirements.max_duration_seconds = 60;
        task.transition_to(TaskStatus::Queued).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();

        let now = Utc::now();
        assert!(!task.is_execution_expired(now));
        assert!(task.is_execution_expired(now + chrono::Duration::seconds(61)));
    }

    #[test]
    fn test_invalid_transition_error() {
        let mut task = Task::new(submission());
        let err = task.transition_to(TaskStatus::Completed).unwrap_err();
        assert!(err.to_string().contains("pending"));
    }
}
