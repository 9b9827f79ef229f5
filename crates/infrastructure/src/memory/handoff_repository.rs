use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::models::HandoffSession;
use orchestrator_domain::repositories::HandoffRepository;

/// 内存迁移会话仓储
pub struct MemoryHandoffRepository {
    sessions: RwLock<HashMap<String, HandoffSession>>,
}

impl MemoryHandoffRepository {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryHandoffRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HandoffRepository for MemoryHandoffRepository {
    async fn create(&self, session: &HandoffSession) -> OrchestratorResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.handoff_id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, handoff_id: &str) -> OrchestratorResult<HandoffSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(handoff_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::HandoffNotFound {
                id: handoff_id.to_string(),
            })
    }

    async fn update(&self, session: &HandoffSession) -> OrchestratorResult<()> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.handoff_id) {
            return Err(OrchestratorError::HandoffNotFound {
                id: session.handoff_id.clone(),
            });
        }
        sessions.insert(session.handoff_id.clone(), session.clone());
        Ok(())
    }

    async fn active_for_task(
        &self,
        task_id: &str,
    ) -> OrchestratorResult<Option<HandoffSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .find(|s| s.task_id == task_id && !s.status.is_terminal())
            .cloned())
    }

    async fn purge_expired(
        &self,
        retention_seconds: i64,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<u64> {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| s.is_expired(retention_seconds, now))
            .map(|s| s.handoff_id.clone())
            .collect();

        for handoff_id in &expired {
            sessions.remove(handoff_id);
            debug!("清理过期迁移会话: {}", handoff_id);
        }
        Ok(expired.len() as u64)
    }

    async fn count_active(&self) -> OrchestratorResult<u64> {
        let sessions = self.sessions.read().await;
        Ok(sessions.values().filter(|s| !s.status.is_terminal()).count() as u64)
    }

    async fn count_total(&self) -> OrchestratorResult<u64> {
        let sessions = self.sessions.read().await;
        Ok(sessions.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_active_for_task() {
        let repo = MemoryHandoffRepository::new();
        let mut session = HandoffSession::new("task-1".to_string(), "node-a".to_string(), 3);
        repo.create(&session).await.unwrap();

        assert!(repo.active_for_task("task-1").await.unwrap().is_some());
        assert!(repo.active_for_task("task-2").await.unwrap().is_none());

        session.mark_completed();
        repo.update(&session).await.unwrap();
        assert!(repo.active_for_task("task-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_recent_and_active() {
        let repo = MemoryHandoffRepository::new();

        let active = HandoffSession::new("task-1".to_string(), "node-a".to_string(), 3);
        repo.create(&active).await.unwrap();

        let mut finished = HandoffSession::new("task-2".to_string(), "node-a".to_string(), 3);
        finished.mark_completed();
        repo.create(&finished).await.unwrap();

        let now = finished.end_time.unwrap() + Duration::seconds(3601);
        let purged = repo.purge_expired(3600, now).await.unwrap();

        assert_eq!(purged, 1);
        assert!(repo.get(&active.handoff_id).await.is_ok());
        assert!(repo.get(&finished.handoff_id).await.is_err());
        assert_eq!(repo.count_active().await.unwrap(), 1);
    }
}
