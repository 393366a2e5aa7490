//! Health evaluator
//!
//! Runs one independent probe loop per registered instance. Each loop issues
//! `GET http://<address>:<port><path>` with a per-probe timeout, converts the
//! outcome into a registry status transition, and exits when the record is
//! evicted or deregistered. Probe failures never propagate as errors.
//!
//! Router reads are eventually consistent with real instance health: a query
//! may observe a stale status for up to one probe interval in either
//! direction. That staleness window trades freshness for probe load.

use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::store::{ProbeApplied, Registry};
use super::types::{HealthCheckSpec, InstanceRecord};

// 单次探测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeOutcome {
    Pass,
    Fail,
}

#[derive(Debug)]
pub struct HealthEvaluator {
    registry: Registry,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl HealthEvaluator {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    // 为新注册的实例启动独立的探测循环
    pub fn watch(&self, record: &InstanceRecord, spec: HealthCheckSpec) {
        let registry = self.registry.clone();
        let service_name = record.service_name.clone();
        let instance_id = record.instance_id.clone();
        let authority = record.authority();
        let token = self.shutdown.clone();

        tracing::debug!(
            service_name = %service_name,
            instance_id = %instance_id,
            authority = %authority,
            interval_secs = spec.interval.as_secs(),
            "Starting health probe loop"
        );

        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(spec.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let outcome = http_probe(&authority, &spec.path, spec.timeout).await;
                let passed = outcome == ProbeOutcome::Pass;

                match registry.apply_probe(
                    &service_name,
                    &instance_id,
                    passed,
                    spec.deregister_after,
                ) {
                    ProbeApplied::Updated(status) => {
                        tracing::trace!(
                            service_name = %service_name,
                            instance_id = %instance_id,
                            status = ?status,
                            "Probe applied"
                        );
                    }
                    ProbeApplied::Evicted => break,
                    ProbeApplied::Gone => {
                        tracing::debug!(
                            service_name = %service_name,
                            instance_id = %instance_id,
                            "Instance deregistered, stopping probe loop"
                        );
                        break;
                    }
                }
            }
        });
    }

    // 停止所有探测循环并等待任务退出
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

// 对实例的存活端点发起一次 HTTP 探测。
// 任何成功状态码视为通过；非成功状态、连接失败或超时都视为失败。
async fn http_probe(authority: &str, path: &str, timeout: Duration) -> ProbeOutcome {
    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(authority).await {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(error = %e, %authority, "Health probe connection failed");
                return ProbeOutcome::Fail;
            }
        };

        let io = TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::debug!(error = %e, %authority, "Health probe handshake failed");
                return ProbeOutcome::Fail;
            }
        };

        // 后台驱动连接
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method(http::Method::GET)
            .uri(format!("http://{authority}{path}"))
            .header(http::header::HOST, authority)
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::debug!(error = %e, %authority, "Failed to build probe request");
                return ProbeOutcome::Fail;
            }
        };

        match sender.send_request(req).await {
            Ok(response) => {
                if response.status().is_success() {
                    ProbeOutcome::Pass
                } else {
                    tracing::debug!(status = %response.status(), %authority, "Health probe non-success status");
                    ProbeOutcome::Fail
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, %authority, "Health probe request failed");
                ProbeOutcome::Fail
            }
        }
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::debug!(%authority, "Health probe timed out");
            ProbeOutcome::Fail
        }
    }
}
