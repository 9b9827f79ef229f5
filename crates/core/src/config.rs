use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::OrchestratorResult;

/// 应用配置
///
/// 配置来源优先级: 默认值 < TOML配置文件 < `ORCHESTRATOR__*` 环境变量。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub registry: RegistryConfig,
    pub scheduler: SchedulerConfig,
    pub handoff: HandoffConfig,
    pub agent: AgentConfig,
    pub log: LogConfig,
}

/// API服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// 监听地址
    pub bind_address: String,
}

/// 节点注册表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 心跳存活阈值（秒），超过该时间未上报心跳的节点视为离线
    pub liveness_threshold_seconds: i64,
    /// 节点过期清理阈值（秒），长期无心跳的节点将被移除
    pub stale_node_seconds: i64,
    /// 存活检测扫描间隔（秒）
    pub sweep_interval_seconds: u64,
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 匹配循环扫描间隔（秒）
    pub tick_interval_seconds: u64,
    /// 调度策略名称
    pub strategy: String,
    /// 任务最大排队时长（秒），超时后以NoSuitableNode终止
    pub max_queued_seconds: i64,
}

/// 任务迁移配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// 单次迁移的最大重试次数
    pub max_retries: u32,
    /// 已结束会话的保留时长（秒）
    pub session_retention_seconds: i64,
    /// 会话清理扫描间隔（秒）
    pub sweep_interval_seconds: u64,
    /// 转发任务到目标节点的超时（秒）
    pub forward_timeout_seconds: u64,
}

/// 节点通信配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// 普通请求超时（秒）
    pub request_timeout_seconds: u64,
    /// 建立连接超时（秒）
    pub connect_timeout_seconds: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 日志级别: trace/debug/info/warn/error
    pub level: String,
    /// 日志格式: json/pretty
    pub format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            registry: RegistryConfig::default(),
            scheduler: SchedulerConfig::default(),
            handoff: HandoffConfig::default(),
            agent: AgentConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            liveness_threshold_seconds: 30, // 30秒心跳存活阈值
            stale_node_seconds: 86400,      // 24小时后清理无心跳节点
            sweep_interval_seconds: 60,     // 每分钟扫描一次
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 1,
            strategy: "balanced".to_string(),
            max_queued_seconds: 300, // 排队5分钟仍无节点则终止
        }
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            session_retention_seconds: 3600, // 已结束会话保留1小时
            sweep_interval_seconds: 300,     // 每5分钟清理一次
            forward_timeout_seconds: 15,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 10,
            connect_timeout_seconds: 5,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// 加载配置
    ///
    /// `config_path` 为None时仅使用默认值和环境变量。
    pub fn load(config_path: Option<&str>) -> OrchestratorResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("ORCHESTRATOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| OrchestratorError::Configuration(format!("构建配置失败: {e}")))?;

        let app_config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| OrchestratorError::Configuration(format!("解析配置失败: {e}")))?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// 校验配置的合法性
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.api.bind_address.is_empty() {
            return Err(OrchestratorError::Configuration(
                "api.bind_address 不能为空".to_string(),
            ));
        }
        if self.registry.liveness_threshold_seconds <= 0 {
            return Err(OrchestratorError::Configuration(
                "registry.liveness_threshold_seconds 必须大于0".to_string(),
            ));
        }
        if self.registry.stale_node_seconds <= self.registry.liveness_threshold_seconds {
            return Err(OrchestratorError::Configuration(
                "registry.stale_node_seconds 必须大于存活阈值".to_string(),
            ));
        }
        if self.scheduler.tick_interval_seconds == 0 {
            return Err(OrchestratorError::Configuration(
                "scheduler.tick_interval_seconds 必须大于0".to_string(),
            ));
        }
        if self.scheduler.max_queued_seconds <= 0 {
            return Err(OrchestratorError::Configuration(
                "scheduler.max_queued_seconds 必须大于0".to_string(),
            ));
        }
        if self.handoff.session_retention_seconds <= 0 {
            return Err(OrchestratorError::Configuration(
                "handoff.session_retention_seconds 必须大于0".to_string(),
            ));
        }
        match self.log.format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(OrchestratorError::Configuration(format!(
                    "不支持的日志格式: {other}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.liveness_threshold_seconds, 30);
        assert_eq!(config.registry.stale_node_seconds, 86400);
        assert_eq!(config.scheduler.tick_interval_seconds, 1);
        assert_eq!(config.handoff.max_retries, 3);
        assert_eq!(config.handoff.session_retention_seconds, 3600);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[api]
bind_address = "127.0.0.1:9000"

[scheduler]
strategy = "least-loaded"
max_queued_seconds = 120
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.api.bind_address, "127.0.0.1:9000");
        assert_eq!(config.scheduler.strategy, "least-loaded");
        assert_eq!(config.scheduler.max_queued_seconds, 120);
        // 未覆盖的配置保持默认值
        assert_eq!(config.handoff.max_retries, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = AppConfig::default();
        config.registry.liveness_threshold_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.log.format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.registry.stale_node_seconds = 10;
        assert!(config.validate().is_err());
    }
}
