use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use http_body::Body;
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};

use super::error::RegistryError;
use super::evaluator::HealthEvaluator;
use super::store::Registry;
use super::types::{HealthCheckSpec, HealthStatus, InstanceRecord};
use crate::services::router::response::{BoxedBody, json_response};

// 控制面保留前缀，其余路径交给动态路由
pub const CONTROL_PATH_PREFIX: &str = "/v1/registry";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSpecPayload {
    #[serde(default = "default_check_path")]
    pub path: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_deregister_after_secs")]
    pub deregister_after_secs: u64,
}

fn default_check_path() -> String {
    "/health".to_string()
}

fn default_interval_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_deregister_after_secs() -> u64 {
    60
}

impl Default for CheckSpecPayload {
    fn default() -> Self {
        Self::from(&HealthCheckSpec::default())
    }
}

impl From<&HealthCheckSpec> for CheckSpecPayload {
    fn from(spec: &HealthCheckSpec) -> Self {
        Self {
            path: spec.path.clone(),
            interval_secs: spec.interval.as_secs(),
            timeout_secs: spec.timeout.as_secs(),
            deregister_after_secs: spec.deregister_after.as_secs(),
        }
    }
}

impl CheckSpecPayload {
    pub fn to_spec(&self) -> HealthCheckSpec {
        HealthCheckSpec {
            path: self.path.clone(),
            interval: Duration::from_secs(self.interval_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            deregister_after: Duration::from_secs(self.deregister_after_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub service_name: String,
    pub instance_id: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub check: CheckSpecPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

// 健康查询接口返回的实例视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceView {
    pub instance_id: String,
    pub service_name: String,
    pub address: String,
    pub port: u16,
    pub status: HealthStatus,
    pub registered_at_secs: u64,
}

impl From<&InstanceRecord> for InstanceView {
    fn from(record: &InstanceRecord) -> Self {
        Self {
            instance_id: record.instance_id.clone(),
            service_name: record.service_name.clone(),
            address: record.address.clone(),
            port: record.port,
            status: record.health_status,
            registered_at_secs: record
                .registered_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }
}

// 注册表的 HTTP 控制面：注册、注销、健康查询
#[derive(Debug)]
pub struct RegistryApi {
    registry: Registry,
    evaluator: Arc<HealthEvaluator>,
}

impl RegistryApi {
    pub fn new(registry: Registry, evaluator: Arc<HealthEvaluator>) -> Self {
        Self {
            registry,
            evaluator,
        }
    }

    pub async fn handle<B>(&self, req: http::Request<B>) -> http::Response<BoxedBody>
    where
        B: Body,
        B::Error: std::fmt::Debug,
    {
        let path = req.uri().path().to_string();
        let method = req.method().clone();
        let rest = path.strip_prefix(CONTROL_PATH_PREFIX).unwrap_or("");
        let segments: Vec<&str> = rest.trim_start_matches('/').split('/').collect();

        match segments.as_slice() {
            ["register"] if method == http::Method::PUT => self.register(req).await,
            ["deregister", instance_id] if method == http::Method::PUT => {
                self.deregister(instance_id)
            }
            ["health", service_name] if method == http::Method::GET => {
                self.query_health(service_name)
            }
            _ => json_response(
                http::StatusCode::NOT_FOUND,
                &ApiResponse {
                    success: false,
                    message: format!("Unknown registry endpoint: {method} {path}"),
                },
            ),
        }
    }

    async fn register<B>(&self, req: http::Request<B>) -> http::Response<BoxedBody>
    where
        B: Body,
        B::Error: std::fmt::Debug,
    {
        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return json_response(
                    http::StatusCode::BAD_REQUEST,
                    &ApiResponse {
                        success: false,
                        message: format!("Failed to read request body: {e:?}"),
                    },
                );
            }
        };

        let payload: RegisterRequest = match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(e) => {
                return json_response(
                    http::StatusCode::BAD_REQUEST,
                    &ApiResponse {
                        success: false,
                        message: format!("Invalid registration payload: {e}"),
                    },
                );
            }
        };

        let record = InstanceRecord::new(
            payload.instance_id,
            payload.service_name,
            payload.address,
            payload.port,
        );
        let spec = payload.check.to_spec();

        match self.registry.register(record.clone()) {
            Ok(()) => {
                // 注册成功后立刻开始探测
                self.evaluator.watch(&record, spec);
                json_response(
                    http::StatusCode::OK,
                    &ApiResponse {
                        success: true,
                        message: "Registration successful".to_string(),
                    },
                )
            }
            Err(e) => {
                let status = match &e {
                    RegistryError::AlreadyRegistered { .. } => http::StatusCode::CONFLICT,
                    RegistryError::NotFound(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
                };
                json_response(
                    status,
                    &ApiResponse {
                        success: false,
                        message: e.to_string(),
                    },
                )
            }
        }
    }

    fn deregister(&self, instance_id: &str) -> http::Response<BoxedBody> {
        match self.registry.deregister(instance_id) {
            Ok(()) => json_response(
                http::StatusCode::OK,
                &ApiResponse {
                    success: true,
                    message: "Deregistration successful".to_string(),
                },
            ),
            Err(e) => {
                // 未知 ID 按无操作处理，仅记录
                tracing::warn!(
                    instance_id = %instance_id,
                    error = %e,
                    "Deregister requested for unknown instance"
                );
                json_response(
                    http::StatusCode::NOT_FOUND,
                    &ApiResponse {
                        success: false,
                        message: e.to_string(),
                    },
                )
            }
        }
    }

    fn query_health(&self, service_name: &str) -> http::Response<BoxedBody> {
        let views: Vec<InstanceView> = self
            .registry
            .query_healthy(service_name)
            .iter()
            .map(InstanceView::from)
            .collect();
        json_response(http::StatusCode::OK, &views)
    }
}
