use std::convert::Infallible;
use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tower::util::ServiceExt;

use crate::config::Config;
use crate::services::registry::evaluator::HealthEvaluator;
use crate::services::registry::http_impl::{CONTROL_PATH_PREFIX, RegistryApi};
use crate::services::registry::store::Registry;
use crate::services::router::DynamicRouter;

pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(config.listen_addr()).await?;
    serve(listener, config).await
}

// 在给定监听器上运行网关：控制面（注册/注销/健康查询）+ 动态路由
pub async fn serve(
    listener: TcpListener,
    config: Config,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Registry::new();
    let evaluator = Arc::new(HealthEvaluator::new(registry.clone()));
    let api = Arc::new(RegistryApi::new(registry.clone(), evaluator.clone()));
    let router = DynamicRouter::new(registry, &config);

    tracing::info!(addr = %listener.local_addr()?, "Gateway listening");

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;
                let api = api.clone();
                let router = router.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                        let api = api.clone();
                        let router = router.clone();
                        async move {
                            // 保留前缀走控制面，其余全部按服务名转发
                            if req.uri().path().starts_with(CONTROL_PATH_PREFIX) {
                                return Ok::<_, Infallible>(api.handle(req).await);
                            }
                            match router.oneshot(req).await {
                                Ok(resp) => Ok(resp),
                                Err(infallible) => match infallible {},
                            }
                        }
                    });

                    if let Err(e) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        tracing::debug!(%peer_addr, error = %e, "Connection error");
                    }
                });
            }
            result = &mut shutdown => {
                result?;
                tracing::info!("Termination signal received, shutting down gateway");
                break;
            }
        }
    }

    // 停掉所有探测循环后退出
    evaluator.shutdown().await;
    Ok(())
}

/// 等待进程终止信号（SIGINT / SIGTERM，非 Unix 平台退化为 Ctrl-C）
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
