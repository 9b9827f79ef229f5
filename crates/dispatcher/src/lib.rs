//! 调度与迁移核心
//!
//! 本crate承载控制平面的业务核心：
//! - 任务调度器（匹配循环、硬过滤、加权评分、超时与重试）
//! - 节点存活巡检（失联节点的任务迁移与过期节点清理）
//! - 迁移协调器（可达性握手、按评分排序的回退链）

pub mod handoff;
pub mod liveness;
pub mod matcher;
pub mod scheduler;
pub mod strategies;

pub use handoff::HandoffCoordinator;
pub use liveness::{NodeLivenessSweeper, NodeLivenessSweeperConfig};
pub use matcher::{NodeMatcher, NodeScore};
pub use scheduler::TaskScheduler;
pub use strategies::{SchedulingStrategy, ScoreWeights};
