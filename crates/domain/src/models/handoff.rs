use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 迁移会话状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl HandoffStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandoffStatus::Completed | HandoffStatus::Failed | HandoffStatus::Cancelled
        )
    }
}

/// 一次任务迁移的会话记录
///
/// 记录从触发到结束的完整迁移过程，包括回退链消耗的重试次数。
/// 结束后保留一段时间供查询，随后由后台清理。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffSession {
    pub handoff_id: String,
    pub task_id: String,
    pub source_node_id: String,
    /// 最终（或当前尝试中）的目标节点
    pub target_node_id: Option<String>,
    pub status: HandoffStatus,
    pub retries: u32,
    pub max_retries: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl HandoffSession {
    pub fn new(task_id: String, source_node_id: String, max_retries: u32) -> Self {
        Self {
            handoff_id: format!("handoff-{}", Uuid::new_v4()),
            task_id,
            source_node_id,
            target_node_id: None,
            status: HandoffStatus::Pending,
            retries: 0,
            max_retries,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        }
    }

    pub fn mark_in_progress(&mut self, target_node_id: &str) {
        self.status = HandoffStatus::InProgress;
        self.target_node_id = Some(target_node_id.to_string());
    }

    pub fn mark_completed(&mut self) {
        self.status = HandoffStatus::Completed;
        self.end_time = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = HandoffStatus::Failed;
        self.error = Some(error.into());
        self.end_time = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = HandoffStatus::Cancelled;
        self.end_time = Some(Utc::now());
    }

    /// 是否还能尝试下一个候选目标
    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }

    /// 结束后是否已超过保留期
    pub fn is_expired(&self, retention_seconds: i64, now: DateTime<Utc>) -> bool {
        match self.end_time {
            Some(end_time) if self.status.is_terminal() => {
                (now - end_time).num_seconds() > retention_seconds
            }
            _ => false,
        }
    }
}

/// 迁移触发请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub source_node_id: String,
    /// 省略时由协调器复用调度评分逻辑自动选择目标
    pub target_node_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_session_lifecycle() {
        let mut session = HandoffSession::new("task-1".to_string(), "node-a".to_string(), 3);
        assert_eq!(session.status, HandoffStatus::Pending);
        assert!(session.can_retry());

        session.mark_in_progress("node-b");
        assert_eq!(session.target_node_id.as_deref(), Some("node-b"));

        session.mark_completed();
        assert!(session.status.is_terminal());
        assert!(session.end_time.is_some());
    }

    #[test]
    fn test_retry_budget() {
        let mut session = HandoffSession::new("task-1".to_string(), "node-a".to_string(), 2);
        session.retries = 2;
        assert!(!session.can_retry());
    }

    #[test]
    fn test_retention_expiry() {
        let mut session = HandoffSession::new("task-1".to_string(), "node-a".to_string(), 3);
        let now = Utc::now();

        // 未结束的会话永不过期
        assert!(!session.is_expired(3600, now + Duration::seconds(7200)));

        session.mark_failed("不可达");
        let end = session.end_time.unwrap();
        assert!(!session.is_expired(3600, end + Duration::seconds(3599)));
        assert!(session.is_expired(3600, end + Duration::seconds(3601)));
    }
}
