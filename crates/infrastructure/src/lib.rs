pub mod agent_client;
pub mod executor;
pub mod memory;

pub use agent_client::{AgentClient, AgentClientConfig};
pub use executor::HttpInferenceExecutor;
pub use memory::{MemoryHandoffRepository, MemoryNodeRegistry, MemoryTaskRepository};
