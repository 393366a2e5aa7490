pub mod error;
pub mod extractor;
pub mod forwarder;
pub mod response;
pub mod select;

pub use error::RouterError;
pub use select::{RandomSelection, RoundRobinSelection, SelectionPolicy};

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use http_body::Body;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tower::Service;

use crate::config::Config;
use crate::services::registry::Registry;
use forwarder::ForwardClient;
use response::BoxedBody;

// 定义动态路由服务：把一次客户端请求解析成对一个健康实例的一次转发。
// 路由器本身无状态，只读注册表，不在请求之间保留任何东西。
#[derive(Clone)]
pub struct DynamicRouter {
    registry: Registry,
    policy: Arc<dyn SelectionPolicy>,
    client: ForwardClient,
    forward_timeout: Duration,
}

impl std::fmt::Debug for DynamicRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicRouter")
            .field("policy", &self.policy)
            .field("forward_timeout", &self.forward_timeout)
            .finish_non_exhaustive()
    }
}

impl DynamicRouter {
    pub fn new(registry: Registry, config: &Config) -> Self {
        Self::with_policy(registry, config, Arc::new(select::RandomSelection))
    }

    pub fn with_policy(
        registry: Registry,
        config: &Config,
        policy: Arc<dyn SelectionPolicy>,
    ) -> Self {
        Self {
            registry,
            policy,
            client: Client::builder(TokioExecutor::new()).build_http(),
            forward_timeout: config.request_timeout(),
        }
    }

    // 解析并转发一次请求
    pub async fn resolve_and_forward<B>(
        &self,
        req: http::Request<B>,
    ) -> Result<http::Response<BoxedBody>, RouterError>
    where
        B: Body<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + std::fmt::Debug,
    {
        let target = extractor::extract_target(req.uri().path())?;

        // 健康视图按查询即时重算
        let healthy = self.registry.query_healthy(&target.service_name);
        if healthy.is_empty() {
            // 空集表示真实不可用，路由器内部不重试
            return Err(RouterError::ServiceUnavailable(format!(
                "No healthy instances for service '{}'",
                target.service_name
            )));
        }

        let selected = self.policy.select(&healthy).ok_or_else(|| {
            RouterError::ServiceUnavailable(format!(
                "Selection yielded no instance for service '{}'",
                target.service_name
            ))
        })?;

        tracing::debug!(
            service_name = %target.service_name,
            instance_id = %selected.instance_id,
            authority = %selected.authority(),
            subpath = %target.subpath,
            "Forwarding request to selected instance"
        );

        // 转发失败不在本次请求内换一个实例重发，由调用方决定是否重试
        forwarder::forward_request(
            &self.client,
            req,
            &selected.authority(),
            &target.subpath,
            self.forward_timeout,
        )
        .await
    }
}

impl<B> Service<http::Request<B>> for DynamicRouter
where
    B: Body<Data = bytes::Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + std::fmt::Debug,
{
    type Response = http::Response<BoxedBody>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let router = self.clone();

        Box::pin(async move {
            match router.resolve_and_forward(req).await {
                Ok(resp) => Ok(resp),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to route request");
                    Ok(response::create_error_response(&e))
                }
            }
        })
    }
}
