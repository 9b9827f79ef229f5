use serde::{Deserialize, Serialize};

/// 五个评分因子的权重向量
///
/// 每个因子归一化到 [0,1]，总分为加权和。权重之和恒为1，
/// 策略之间只是重新分配权重，评分公式本身不变。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub model_compatibility: f64,
    pub resource_availability: f64,
    pub performance_history: f64,
    pub load_balance: f64,
    pub model_affinity: f64,
}

/// 调度策略
///
/// 每个策略是一组固定的命名权重向量，不是运行时注入的行为。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingStrategy {
    /// 均衡策略（默认）
    #[default]
    Balanced,
    /// 偏向模型亲和性，利用节点上已加载模型的缓存收益
    ModelAffinity,
    /// 偏向历史性能表现
    PerformanceBiased,
    /// 偏向资源余量
    ResourceBiased,
    /// 偏向最低负载
    LeastLoaded,
}

impl SchedulingStrategy {
    pub fn weights(&self) -> ScoreWeights {
        match self {
            SchedulingStrategy::Balanced => ScoreWeights {
                model_compatibility: 0.25,
                resource_availability: 0.25,
                performance_history: 0.20,
                load_balance: 0.20,
                model_affinity: 0.10,
            },
            SchedulingStrategy::ModelAffinity => ScoreWeights {
                model_compatibility: 0.30,
                resource_availability: 0.20,
                performance_history: 0.20,
                load_balance: 0.10,
                model_affinity: 0.20,
            },
            SchedulingStrategy::PerformanceBiased => ScoreWeights {
                model_compatibility: 0.20,
                resource_availability: 0.20,
                performance_history: 0.40,
                load_balance: 0.10,
                model_affinity: 0.10,
            },
            SchedulingStrategy::ResourceBiased => ScoreWeights {
                model_compatibility: 0.20,
                resource_availability: 0.40,
                performance_history: 0.10,
                load_balance: 0.20,
                model_affinity: 0.10,
            },
            SchedulingStrategy::LeastLoaded => ScoreWeights {
                model_compatibility: 0.20,
                resource_availability: 0.20,
                performance_history: 0.10,
                load_balance: 0.40,
                model_affinity: 0.10,
            },
        }
    }

    /// 按配置中的策略名解析，未知名称回退到默认策略
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "balanced" => Some(SchedulingStrategy::Balanced),
            "model-affinity" => Some(SchedulingStrategy::ModelAffinity),
            "performance-biased" => Some(SchedulingStrategy::PerformanceBiased),
            "resource-biased" => Some(SchedulingStrategy::ResourceBiased),
            "least-loaded" => Some(SchedulingStrategy::LeastLoaded),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SchedulingStrategy::Balanced => "balanced",
            SchedulingStrategy::ModelAffinity => "model-affinity",
            SchedulingStrategy::PerformanceBiased => "performance-biased",
            SchedulingStrategy::ResourceBiased => "resource-biased",
            SchedulingStrategy::LeastLoaded => "least-loaded",
        }
    }
}
