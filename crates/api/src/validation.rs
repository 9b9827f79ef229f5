//! 请求参数校验
//!
//! 任务提交的范围校验（优先级、时限、重试次数）由调度器在
//! `submit` 入口统一执行；这里只校验节点侧的契约。

use orchestrator_domain::models::NodeRegistration;

use crate::error::{ApiError, ApiResult};

pub fn validate_registration(registration: &NodeRegistration) -> ApiResult<()> {
    if registration.node_id.is_empty() {
        return Err(ApiError::BadRequest("node_id 不能为空".to_string()));
    }
    if registration.host.is_empty() {
        return Err(ApiError::BadRequest("host 不能为空".to_string()));
    }
    if registration.port == 0 {
        return Err(ApiError::BadRequest("port 不能为0".to_string()));
    }
    let caps = &registration.capabilities;
    if caps.cpu_cores == 0 {
        return Err(ApiError::BadRequest("cpu_cores 必须大于0".to_string()));
    }
    if caps.total_ram_gb <= 0.0 || caps.available_ram_gb < 0.0 {
        return Err(ApiError::BadRequest("内存容量无效".to_string()));
    }
    if caps.available_ram_gb > caps.total_ram_gb {
        return Err(ApiError::BadRequest(
            "available_ram_gb 不能超过 total_ram_gb".to_string(),
        ));
    }
    if caps.max_concurrent_tasks == 0 {
        return Err(ApiError::BadRequest(
            "max_concurrent_tasks 必须大于0".to_string(),
        ));
    }
    if caps.has_gpu && caps.gpu_devices.is_empty() {
        return Err(ApiError::BadRequest(
            "声明有GPU的节点必须提供 gpu_devices".to_string(),
        ));
    }
    Ok(())
}
