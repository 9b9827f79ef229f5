//! 内存仓储实现
//!
//! 核心逻辑不依赖具体存储引擎，这里提供进程内的参考实现，
//! 用于单机部署与测试。所有修改都在 `tokio::sync::RwLock` 的
//! 写锁内完成，保证单节点上的检查与自增是一个原子步骤。

pub mod handoff_repository;
pub mod node_registry;
pub mod task_repository;

pub use handoff_repository::MemoryHandoffRepository;
pub use node_registry::MemoryNodeRegistry;
pub use task_repository::MemoryTaskRepository;
