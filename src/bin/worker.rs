//! Demo worker process.
//!
//! Serves its business endpoints (`/info`) plus the liveness endpoint the
//! gateway probes, registers itself under `SERVICE_NAME` on startup, and
//! deregisters on SIGINT/SIGTERM before exiting. A crash skips the cleanup
//! on purpose — the registry's TTL eviction removes the stale record.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};

use discovery_gateway::server::wait_for_shutdown_signal;
use discovery_gateway::services::agent::{AgentConfig, RegistryAgent};
use discovery_gateway::services::registry::HealthCheckSpec;

// 全部来自环境变量（SERVICE_NAME、PORT、GATEWAY_ADDR…）
#[derive(Debug, Deserialize)]
struct WorkerConfig {
    #[serde(default = "default_service_name")]
    service_name: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_address")]
    address: String,
    #[serde(default = "default_gateway_addr")]
    gateway_addr: String,
    #[serde(default = "default_health_path")]
    health_path: String,
    #[serde(default = "default_health_interval_secs")]
    health_interval_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    health_timeout_secs: u64,
    #[serde(default = "default_deregister_after_secs")]
    deregister_after_secs: u64,
}

fn default_service_name() -> String {
    "service-a".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_health_interval_secs() -> u64 {
    10
}

fn default_health_timeout_secs() -> u64 {
    5
}

fn default_deregister_after_secs() -> u64 {
    60
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    service: String,
    instance_id: String,
    timestamp: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config: WorkerConfig = envy::from_env()?;

    let check = HealthCheckSpec {
        path: config.health_path.clone(),
        interval: Duration::from_secs(config.health_interval_secs),
        timeout: Duration::from_secs(config.health_timeout_secs),
        deregister_after: Duration::from_secs(config.deregister_after_secs),
    };
    let mut agent = RegistryAgent::new(
        config.service_name.clone(),
        config.address.clone(),
        config.port,
        check,
        AgentConfig {
            gateway_addr: config.gateway_addr.clone(),
            ..AgentConfig::default()
        },
    );

    // 关停开始后存活端点翻转为失败
    let draining = Arc::new(AtomicBool::new(false));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(
        service_name = %config.service_name,
        port = config.port,
        "Worker listening"
    );

    serve_worker_endpoints(
        listener,
        config.service_name.clone(),
        agent.instance_id().to_string(),
        config.health_path.clone(),
        draining.clone(),
    );

    // 注册失败（重试耗尽）对进程是致命的：
    // 无法被发现的实例不应该继续提供服务
    agent.register().await?;

    wait_for_shutdown_signal().await?;
    tracing::info!("Termination signal received, shutting down worker");
    draining.store(true, Ordering::SeqCst);

    // 注销只记录结果，失败也照常退出，TTL 驱逐兜底
    if let Err(e) = agent.deregister().await {
        tracing::error!(error = %e, "Deregistration failed, relying on TTL eviction");
    }

    Ok(())
}

fn serve_worker_endpoints(
    listener: tokio::net::TcpListener,
    service_name: String,
    instance_id: String,
    health_path: String,
    draining: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let service_name = service_name.clone();
            let instance_id = instance_id.clone();
            let health_path = health_path.clone();
            let draining = draining.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                    let service_name = service_name.clone();
                    let instance_id = instance_id.clone();
                    let health_path = health_path.clone();
                    let draining = draining.clone();
                    async move {
                        handle_request(&req, &service_name, &instance_id, &health_path, &draining)
                    }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
}

fn handle_request(
    req: &hyper::Request<hyper::body::Incoming>,
    service_name: &str,
    instance_id: &str,
    health_path: &str,
    draining: &AtomicBool,
) -> Result<hyper::Response<Full<Bytes>>, http::Error> {
    let path = req.uri().path();

    if req.method() == http::Method::GET && path == health_path {
        // 存活信号：没开始关停就一律成功，不编码更细的健康度
        return if draining.load(Ordering::SeqCst) {
            http::Response::builder()
                .status(http::StatusCode::SERVICE_UNAVAILABLE)
                .body(Full::new(Bytes::from("shutting down")))
        } else {
            http::Response::builder()
                .status(http::StatusCode::OK)
                .body(Full::new(Bytes::from("OK")))
        };
    }

    if req.method() == http::Method::GET && path == "/info" {
        let info = InfoResponse {
            service: service_name.to_string(),
            instance_id: instance_id.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        let body = serde_json::to_vec(&info).unwrap_or_else(|_| b"{}".to_vec());
        return http::Response::builder()
            .status(http::StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)));
    }

    http::Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from("Not found")))
}
