use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::models::{Task, TaskError, TaskStatus};
use orchestrator_domain::repositories::TaskRepository;

/// 内存任务仓储
pub struct MemoryTaskRepository {
    tasks: RwLock<HashMap<String, Task>>,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    async fn with_task<F, T>(&self, task_id: &str, mutate: F) -> OrchestratorResult<T>
    where
        F: FnOnce(&mut Task) -> OrchestratorResult<T>,
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound {
                id: task_id.to_string(),
            })?;
        mutate(task)
    }
}

impl Default for MemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn create(&self, task: &Task) -> OrchestratorResult<()> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.task_id.clone(), task.clone());
        debug!("任务 {} 已持久化，状态: {:?}", task.task_id, task.status);
        Ok(())
    }

    async fn get(&self, task_id: &str) -> OrchestratorResult<Task> {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    async fn get_by_status(&self, status: TaskStatus) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn get_queued(&self) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut queued: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued)
            .cloned()
            .collect();
        // 优先级降序，同优先级按创建时间升序
        queued.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(queued)
    }

    async fn get_running_on_node(&self, node_id: &str) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Running
                    && t.assigned_node_id.as_deref() == Some(node_id)
            })
            .cloned()
            .collect())
    }

    async fn transition(&self, task_id: &str, next: TaskStatus) -> OrchestratorResult<Task> {
        self.with_task(task_id, |task| {
            task.transition_to(next)?;
            Ok(task.clone())
        })
        .await
    }

    async fn assign(&self, task_id: &str, node_id: &str) -> OrchestratorResult<Task> {
        self.with_task(task_id, |task| {
            task.transition_to(TaskStatus::Running)?;
            task.assigned_node_id = Some(node_id.to_string());
            Ok(task.clone())
        })
        .await
    }

    async fn reassign(&self, task_id: &str, node_id: &str) -> OrchestratorResult<Task> {
        self.with_task(task_id, |task| {
            if task.status != TaskStatus::Running {
                return Err(OrchestratorError::InvalidStateTransition {
                    from: task.status.as_str().to_string(),
                    to: TaskStatus::Running.as_str().to_string(),
                });
            }
            task.assigned_node_id = Some(node_id.to_string());
            Ok(task.clone())
        })
        .await
    }

    async fn complete(
        &self,
        task_id: &str,
        result: serde_json::Value,
    ) -> OrchestratorResult<Task> {
        self.with_task(task_id, |task| {
            task.mark_completed(result)?;
            Ok(task.clone())
        })
        .await
    }

    async fn fail(&self, task_id: &str, error: TaskError) -> OrchestratorResult<Task> {
        self.with_task(task_id, |task| {
            task.mark_failed(error)?;
            Ok(task.clone())
        })
        .await
    }

    async fn cancel(&self, task_id: &str) -> OrchestratorResult<Task> {
        self.with_task(task_id, |task| {
            task.mark_cancelled()?;
            Ok(task.clone())
        })
        .await
    }

    async fn requeue_for_retry(&self, task_id: &str) -> OrchestratorResult<Task> {
        self.with_task(task_id, |task| {
            task.transition_to(TaskStatus::Queued)?;
            task.retry_count += 1;
            task.result = None;
            task.error = None;
            Ok(task.clone())
        })
        .await
    }

    async fn list(&self) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut all: Vec<Task> = tasks.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}
