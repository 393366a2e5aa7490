use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

// 实例健康状态，仅由健康评估器修改
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Passing,
    Critical,
}

// 注册的服务实例信息
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub service_name: String,
    pub address: String,
    pub port: u16,
    pub health_status: HealthStatus,
    pub registered_at: SystemTime,
    // 连续 CRITICAL 的起点，驱动 TTL 驱逐
    pub(crate) critical_since: Option<Instant>,
}

impl InstanceRecord {
    pub fn new(instance_id: String, service_name: String, address: String, port: u16) -> Self {
        Self {
            instance_id,
            service_name,
            address,
            port,
            health_status: HealthStatus::Unknown,
            registered_at: SystemTime::now(),
            critical_since: None,
        }
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

// 健康检查参数，由实例在注册时提供
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckSpec {
    /// 存活探测路径
    pub path: String,
    /// 探测间隔
    pub interval: Duration,
    /// 单次探测超时
    pub timeout: Duration,
    /// 连续 CRITICAL 超过该时长后自动驱逐
    pub deregister_after: Duration,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            deregister_after: Duration::from_secs(60),
        }
    }
}

pub type ServiceInstances = Arc<DashMap<String, InstanceRecord>>;

// 定义服务注册表（服务名 -> 服务实例集合）
pub type ServiceTable = Arc<DashMap<String, ServiceInstances>>;
