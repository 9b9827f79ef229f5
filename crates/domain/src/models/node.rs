use chrono::{DateTime, Utc};
use orchestrator_core::traits::NodeEndpoint;
use serde::{Deserialize, Serialize};

use super::task::TaskRequirements;

/// 节点状态
///
/// 存储的状态仅作参考，调度可见性始终以心跳时间为准：
/// 读取时会根据心跳年龄把过期节点降级为 Offline（惰性存活判定）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Maintenance,
    Error,
}

/// GPU设备信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuDevice {
    pub total_memory_gb: f64,
    pub allocated_memory_gb: f64,
    /// 计算能力版本号，如 "8.6"，按数值比较
    pub compute_capability: String,
}

impl GpuDevice {
    pub fn available_memory_gb(&self) -> f64 {
        (self.total_memory_gb - self.allocated_memory_gb).max(0.0)
    }

    /// 按数值比较计算能力，无法解析的版本号不满足任何下限
    pub fn meets_compute_capability(&self, min: &str) -> bool {
        match (
            self.compute_capability.parse::<f64>(),
            min.parse::<f64>(),
        ) {
            (Ok(actual), Ok(required)) => actual >= required,
            _ => false,
        }
    }
}

/// 节点能力快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCapabilities {
    pub cpu_cores: u32,
    pub total_ram_gb: f64,
    pub available_ram_gb: f64,
    #[serde(default)]
    pub has_gpu: bool,
    #[serde(default)]
    pub gpu_devices: Vec<GpuDevice>,
    #[serde(default)]
    pub supported_models: Vec<String>,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,
}

fn default_max_concurrent_tasks() -> u32 {
    1
}

/// 节点注册请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub capabilities: NodeCapabilities,
}

/// 节点心跳请求
///
/// 负载相关字段均为可选，缺省时仅刷新心跳时间。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeHeartbeat {
    pub current_tasks: Option<u32>,
    pub available_ram_gb: Option<f64>,
    pub gpu_devices: Option<Vec<GpuDevice>>,
}

/// 注册的工作节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub cpu_cores: u32,
    pub total_ram_gb: f64,
    pub available_ram_gb: f64,
    pub has_gpu: bool,
    pub gpu_devices: Vec<GpuDevice>,
    pub supported_models: Vec<String>,
    pub current_tasks: u32,
    pub max_concurrent_tasks: u32,
    pub status: NodeStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

impl Node {
    pub fn new(registration: NodeRegistration) -> Self {
        let now = Utc::now();
        let caps = registration.capabilities;
        Self {
            node_id: registration.node_id,
            host: registration.host,
            port: registration.port,
            cpu_cores: caps.cpu_cores,
            total_ram_gb: caps.total_ram_gb,
            available_ram_gb: caps.available_ram_gb,
            has_gpu: caps.has_gpu,
            gpu_devices: caps.gpu_devices,
            supported_models: caps.supported_models,
            current_tasks: 0,
            max_concurrent_tasks: caps.max_concurrent_tasks.max(1),
            status: NodeStatus::Online,
            last_heartbeat: now,
            registered_at: now,
            tasks_completed: 0,
            tasks_failed: 0,
        }
    }

    /// 重复注册视为能力刷新，保留负载和统计计数
    pub fn refresh_capabilities(&mut self, registration: NodeRegistration) {
        let caps = registration.capabilities;
        self.host = registration.host;
        self.port = registration.port;
        self.cpu_cores = caps.cpu_cores;
        self.total_ram_gb = caps.total_ram_gb;
        self.available_ram_gb = caps.available_ram_gb;
        self.has_gpu = caps.has_gpu;
        self.gpu_devices = caps.gpu_devices;
        self.supported_models = caps.supported_models;
        self.max_concurrent_tasks = caps.max_concurrent_tasks.max(1);
        self.status = NodeStatus::Online;
        self.last_heartbeat = Utc::now();
    }

    pub fn apply_heartbeat(&mut self, heartbeat: NodeHeartbeat) {
        if let Some(current_tasks) = heartbeat.current_tasks {
            self.current_tasks = current_tasks.min(self.max_concurrent_tasks);
        }
        if let Some(available_ram_gb) = heartbeat.available_ram_gb {
            self.available_ram_gb = available_ram_gb;
        }
        if let Some(gpu_devices) = heartbeat.gpu_devices {
            self.gpu_devices = gpu_devices;
        }
        self.status = NodeStatus::Online;
        self.last_heartbeat = Utc::now();
    }

    /// 心跳是否已超过存活阈值
    pub fn is_heartbeat_expired(&self, threshold_seconds: i64, now: DateTime<Utc>) -> bool {
        (now - self.last_heartbeat).num_seconds() > threshold_seconds
    }

    /// 惰性存活判定后的有效状态
    pub fn effective_status(&self, threshold_seconds: i64, now: DateTime<Utc>) -> NodeStatus {
        if self.is_heartbeat_expired(threshold_seconds, now) {
            NodeStatus::Offline
        } else {
            self.status
        }
    }

    pub fn is_schedulable(&self, threshold_seconds: i64, now: DateTime<Utc>) -> bool {
        self.effective_status(threshold_seconds, now) == NodeStatus::Online
    }

    pub fn load_ratio(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            return 0.0;
        }
        self.current_tasks as f64 / self.max_concurrent_tasks as f64
    }

    pub fn has_capacity(&self) -> bool {
        self.current_tasks < self.max_concurrent_tasks
    }

    pub fn supports_model(&self, model: &str) -> bool {
        self.supported_models.iter().any(|m| m == model)
    }

    /// 硬性资源约束检查
    ///
    /// 通过检查的节点才有资格进入软性评分阶段。负载检查基于快照，
    /// 真正的占用在注册表的原子预留中再次校验。
    pub fn meets_requirements(&self, requirements: &TaskRequirements) -> bool {
        if requirements.requires_gpu && !self.has_gpu {
            return false;
        }
        if self.available_ram_gb < requirements.min_ram_gb {
            return false;
        }
        if requirements.min_gpu_memory_gb > 0.0 {
            if !self.has_gpu {
                return false;
            }
            let sufficient = self
                .gpu_devices
                .iter()
                .any(|d| d.available_memory_gb() >= requirements.min_gpu_memory_gb);
            if !sufficient {
                return false;
            }
        }
        if let Some(min_capability) = &requirements.min_compute_capability {
            if !self.has_gpu {
                return false;
            }
            let sufficient = self
                .gpu_devices
                .iter()
                .any(|d| d.meets_compute_capability(min_capability));
            if !sufficient {
                return false;
            }
        }
        self.has_capacity()
    }

    /// 忽略当前负载和占用的可行性检查，用于提交时的乐观预检：
    /// 只要注册的节点在满载清空后也无法满足约束，任务就永远不可调度。
    pub fn could_ever_satisfy(&self, requirements: &TaskRequirements) -> bool {
        if requirements.requires_gpu && !self.has_gpu {
            return false;
        }
        if self.total_ram_gb < requirements.min_ram_gb {
            return false;
        }
        if requirements.min_gpu_memory_gb > 0.0 {
            if !self.has_gpu {
                return false;
            }
            let sufficient = self
                .gpu_devices
                .iter()
                .any(|d| d.total_memory_gb >= requirements.min_gpu_memory_gb);
            if !sufficient {
                return false;
            }
        }
        if let Some(min_capability) = &requirements.min_compute_capability {
            if !self.has_gpu {
                return false;
            }
            let sufficient = self
                .gpu_devices
                .iter()
                .any(|d| d.meets_compute_capability(min_capability));
            if !sufficient {
                return false;
            }
        }
        true
    }

    pub fn endpoint(&self) -> NodeEndpoint {
        NodeEndpoint {
            node_id: self.node_id.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }
}

/// 活跃节点查询过滤条件
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub requires_gpu: Option<bool>,
    pub min_available_ram_gb: Option<f64>,
    pub supports_model: Option<String>,
}

impl NodeFilter {
    pub fn matches(&self, node: &Node) -> bool {
        if let Some(true) = self.requires_gpu {
            if !node.has_gpu {
                return false;
            }
        }
        if let Some(min_ram) = self.min_available_ram_gb {
            if node.available_ram_gb < min_ram {
                return false;
            }
        }
        if let Some(model) = &self.supports_model {
            if !node.supports_model(model) {
                return false;
            }
        }
        true
    }
}
