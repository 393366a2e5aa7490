//! Instance agent
//!
//! Owns one worker's presence in the registry across its process lifetime:
//! - `Unregistered → Registered → Deregistered`, with `Deregistered` terminal.
//! - Registration retries with exponential backoff before failing fatally;
//!   a worker must not serve traffic it cannot be discovered for.
//! - Deregistration is best-effort and bounded by a timeout so shutdown can
//!   never hang on it. A crashed worker performs no cleanup at all — the
//!   registry's TTL eviction is the backstop in both cases.

pub mod config;
pub mod error;

pub use config::AgentConfig;
pub use error::AgentError;

use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use uuid::Uuid;

use crate::services::registry::HealthCheckSpec;
use crate::services::registry::http_impl::{CheckSpecPayload, RegisterRequest};

// 代理生命周期状态机，DEREGISTERED 为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Unregistered,
    Registered,
    Deregistered,
}

pub struct RegistryAgent {
    config: AgentConfig,
    service_name: String,
    instance_id: String,
    address: String,
    port: u16,
    check: HealthCheckSpec,
    state: AgentState,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl std::fmt::Debug for RegistryAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAgent")
            .field("service_name", &self.service_name)
            .field("instance_id", &self.instance_id)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl RegistryAgent {
    // instance_id 在进程启动时生成一次，进程生命周期内不变
    pub fn new(
        service_name: String,
        address: String,
        port: u16,
        check: HealthCheckSpec,
        config: AgentConfig,
    ) -> Self {
        Self {
            config,
            service_name,
            instance_id: Uuid::new_v4().to_string(),
            address,
            port,
            check,
            state: AgentState::Unregistered,
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    // 向网关注册本实例，失败时指数退避重试，全部失败返回错误（调用方按致命处理）
    pub async fn register(&mut self) -> Result<(), AgentError> {
        if self.state != AgentState::Unregistered {
            return Err(AgentError::InvalidState(
                "register requires the unregistered state",
            ));
        }

        let mut backoff = self.config.register_backoff;
        for attempt in 1..=self.config.max_register_attempts {
            match self.try_register().await {
                Ok(()) => {
                    self.state = AgentState::Registered;
                    tracing::info!(
                        service_name = %self.service_name,
                        instance_id = %self.instance_id,
                        gateway = %self.config.gateway_addr,
                        "Registered with gateway"
                    );
                    return Ok(());
                }
                // 实例 ID 冲突换个 ID 才有意义，重试无用
                Err(AgentError::GatewayStatus(status))
                    if status == http::StatusCode::CONFLICT =>
                {
                    return Err(AgentError::GatewayStatus(status));
                }
                Err(e) if attempt < self.config.max_register_attempts => {
                    tracing::warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Registration attempt failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.max_register_backoff);
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, "Registration attempts exhausted");
                    return Err(e);
                }
            }
        }

        Err(AgentError::Registration(
            "no registration attempts configured".to_string(),
        ))
    }

    async fn try_register(&self) -> Result<(), AgentError> {
        let payload = RegisterRequest {
            service_name: self.service_name.clone(),
            instance_id: self.instance_id.clone(),
            address: self.address.clone(),
            port: self.port,
            check: CheckSpecPayload::from(&self.check),
        };
        let body = serde_json::to_vec(&payload)
            .map_err(|e| AgentError::Registration(format!("failed to encode payload: {e}")))?;

        let req = http::Request::builder()
            .method(http::Method::PUT)
            .uri(format!(
                "http://{}/v1/registry/register",
                self.config.gateway_addr
            ))
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| AgentError::Registration(format!("failed to build request: {e}")))?;

        let response = tokio::time::timeout(self.config.register_timeout, self.client.request(req))
            .await
            .map_err(|_| AgentError::Registration("request timed out".to_string()))?
            .map_err(|e| AgentError::Registration(format!("transport error: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AgentError::GatewayStatus(response.status()))
        }
    }

    // 从网关注销。尽力而为：结果只记录、不重试，调用后进入终态，
    // 进程无论如何都要退出，残留记录由 TTL 驱逐兜底。
    pub async fn deregister(&mut self) -> Result<(), AgentError> {
        if self.state != AgentState::Registered {
            return Err(AgentError::InvalidState(
                "deregister requires the registered state",
            ));
        }
        self.state = AgentState::Deregistered;

        match tokio::time::timeout(self.config.deregister_timeout, self.try_deregister()).await {
            Ok(Ok(())) => {
                tracing::info!(
                    service_name = %self.service_name,
                    instance_id = %self.instance_id,
                    "Deregistered from gateway"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AgentError::Deregistration(format!(
                "timed out after {}s",
                self.config.deregister_timeout.as_secs()
            ))),
        }
    }

    async fn try_deregister(&self) -> Result<(), AgentError> {
        let req = http::Request::builder()
            .method(http::Method::PUT)
            .uri(format!(
                "http://{}/v1/registry/deregister/{}",
                self.config.gateway_addr, self.instance_id
            ))
            .body(Full::new(Bytes::new()))
            .map_err(|e| AgentError::Deregistration(format!("failed to build request: {e}")))?;

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| AgentError::Deregistration(format!("transport error: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else if response.status() == http::StatusCode::NOT_FOUND {
            // 记录已被 TTL 驱逐或从未注册成功，按无操作处理
            tracing::warn!(
                instance_id = %self.instance_id,
                "Gateway has no record of this instance, nothing to deregister"
            );
            Ok(())
        } else {
            Err(AgentError::GatewayStatus(response.status()))
        }
    }
}
