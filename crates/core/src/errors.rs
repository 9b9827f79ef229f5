use thiserror::Error;

/// 编排器错误类型定义
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("节点未找到: {id}")]
    NodeNotFound { id: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("迁移会话未找到: {id}")]
    HandoffNotFound { id: String },

    #[error("节点 {id} 已达到最大并发任务数")]
    NodeFull { id: String },

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("没有满足条件的节点: {0}")]
    NoSuitableNode(String),

    #[error("任务 {task_id} 已有进行中的迁移会话")]
    HandoffInProgress { task_id: String },

    #[error("任务 {id} 执行超时")]
    TaskTimeout { id: String },

    #[error("任务 {task_id} 迁移重试次数已耗尽")]
    HandoffExhausted { task_id: String },

    #[error("无效的状态转换: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("任务执行错误: {0}")]
    ExecutionFailed(String),

    #[error("存储不可用: {0}")]
    StoreUnavailable(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, OrchestratorError>;
