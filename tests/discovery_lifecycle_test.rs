use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::time::timeout;

use discovery_gateway::config::Config;
use discovery_gateway::services::registry::evaluator::HealthEvaluator;
use discovery_gateway::services::registry::store::Registry;
use discovery_gateway::services::registry::types::{HealthCheckSpec, InstanceRecord};
use discovery_gateway::services::router::response::create_error_response;
use discovery_gateway::services::router::{DynamicRouter, RouterError};

// 探测节奏调快的健康检查参数，让 TTL 驱逐在测试内可观察
fn fast_check() -> HealthCheckSpec {
    HealthCheckSpec {
        path: "/health".to_string(),
        interval: Duration::from_millis(50),
        timeout: Duration::from_millis(500),
        deregister_after: Duration::from_millis(250),
    }
}

fn record(service: &str, id: &str, addr: SocketAddr) -> InstanceRecord {
    InstanceRecord::new(
        id.to_string(),
        service.to_string(),
        addr.ip().to_string(),
        addr.port(),
    )
}

fn router_config() -> Config {
    let mut config = Config::default();
    config.forward.request_timeout = 2;
    config
}

// 启动一个上游实例：/health 按开关返回 200/500，
// 其余路径回显 marker、方法、路径和请求体（/teapot 返回 418）
async fn spawn_upstream(marker: &'static str, healthy: Arc<AtomicBool>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("upstream local addr");

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let healthy = healthy.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                    let healthy = healthy.clone();
                    async move {
                        let method = req.method().clone();
                        let uri = req.uri().clone();
                        let path = uri.path();

                        if method == http::Method::GET && path == "/health" {
                            let status = if healthy.load(Ordering::SeqCst) {
                                http::StatusCode::OK
                            } else {
                                http::StatusCode::INTERNAL_SERVER_ERROR
                            };
                            return http::Response::builder()
                                .status(status)
                                .body(Full::new(Bytes::from("OK")));
                        }

                        let status = if path == "/teapot" {
                            http::StatusCode::IM_A_TEAPOT
                        } else {
                            http::StatusCode::OK
                        };
                        let body = req
                            .into_body()
                            .collect()
                            .await
                            .map(|collected| collected.to_bytes())
                            .unwrap_or_default();
                        let echo = format!(
                            "{marker} {method} {uri} {}",
                            String::from_utf8_lossy(&body)
                        );
                        http::Response::builder()
                            .status(status)
                            .header("x-echo-marker", marker)
                            .body(Full::new(Bytes::from(echo)))
                    }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

// 轮询等待条件成立，超时 panic
async fn wait_until<F>(mut condition: F, what: &str)
where
    F: FnMut() -> bool,
{
    let deadline = Duration::from_secs(5);
    let result = timeout(deadline, async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for: {what}");
}

async fn call_router(
    router: &DynamicRouter,
    method: http::Method,
    uri: &str,
    body: &str,
) -> (http::StatusCode, http::HeaderMap, String) {
    let req = http::Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("build request");

    let response = match router.resolve_and_forward(req).await {
        Ok(response) => response,
        Err(e) => create_error_response(&e),
    };

    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.expect("collect body").to_bytes();
    (
        parts.status,
        parts.headers,
        String::from_utf8_lossy(&bytes).to_string(),
    )
}

#[tokio::test]
async fn full_discovery_and_routing_lifecycle() {
    let registry = Registry::new();
    let evaluator = Arc::new(HealthEvaluator::new(registry.clone()));
    let router = DynamicRouter::new(registry.clone(), &router_config());

    let healthy_a = Arc::new(AtomicBool::new(true));
    let healthy_b = Arc::new(AtomicBool::new(true));
    let addr_a = spawn_upstream("A", healthy_a.clone()).await;
    let addr_b = spawn_upstream("B", healthy_b.clone()).await;

    // A 注册后探测通过，成为唯一健康实例
    let rec_a = record("svc", "a1", addr_a);
    registry.register(rec_a.clone()).expect("register a1");
    evaluator.watch(&rec_a, fast_check());
    wait_until(
        || registry.query_healthy("svc").len() == 1,
        "a1 to become passing",
    )
    .await;

    // B 注册，两个实例都健康
    let rec_b = record("svc", "b1", addr_b);
    registry.register(rec_b.clone()).expect("register b1");
    evaluator.watch(&rec_b, fast_check());
    wait_until(
        || registry.query_healthy("svc").len() == 2,
        "b1 to become passing",
    )
    .await;

    // A 的探测开始失败，TTL 过后 A 被驱逐，无需显式注销
    healthy_a.store(false, Ordering::SeqCst);
    wait_until(
        || {
            let healthy = registry.query_healthy("svc");
            healthy.len() == 1 && healthy[0].instance_id == "b1"
        },
        "a1 to be evicted after ttl",
    )
    .await;
    assert!(!registry.contains("svc", "a1"), "a1 record must be purged");

    // 之后的路由请求必然落在 B 上
    for _ in 0..10 {
        let (status, headers, _body) =
            call_router(&router, http::Method::GET, "/svc/info", "").await;
        assert_eq!(status, http::StatusCode::OK);
        assert_eq!(
            headers
                .get("x-echo-marker")
                .and_then(|v| v.to_str().ok()),
            Some("B")
        );
    }

    // B 显式注销：健康视图立即变空，不需要等 TTL
    registry.deregister("b1").expect("deregister b1");
    assert!(registry.query_healthy("svc").is_empty());

    let (status, _headers, _body) =
        call_router(&router, http::Method::GET, "/svc/info", "").await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);

    evaluator.shutdown().await;
}

#[tokio::test]
async fn no_instances_is_unavailable_not_upstream_error() {
    let registry = Registry::new();
    let router = DynamicRouter::new(registry.clone(), &router_config());

    let req = http::Request::builder()
        .method(http::Method::GET)
        .uri("/ghost/info")
        .body(Full::new(Bytes::new()))
        .expect("build request");

    let err = router.resolve_and_forward(req).await.unwrap_err();
    assert!(matches!(err, RouterError::ServiceUnavailable(_)));
    assert_eq!(
        create_error_response(&err).status(),
        http::StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn unreachable_instance_is_upstream_error() {
    let registry = Registry::new();
    let router = DynamicRouter::new(registry.clone(), &router_config());

    // 绑定后立刻释放端口，实例注册了但连不上
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    registry
        .register(record("svc", "a1", dead_addr))
        .expect("register");
    registry.apply_probe("svc", "a1", true, Duration::from_secs(60));

    let req = http::Request::builder()
        .method(http::Method::GET)
        .uri("/svc/info")
        .body(Full::new(Bytes::new()))
        .expect("build request");

    let err = router.resolve_and_forward(req).await.unwrap_err();
    assert!(matches!(err, RouterError::Upstream(_)));
    assert_eq!(
        create_error_response(&err).status(),
        http::StatusCode::BAD_GATEWAY
    );
}

#[tokio::test]
async fn single_healthy_instance_is_always_targeted() {
    let registry = Registry::new();
    let router = DynamicRouter::new(registry.clone(), &router_config());

    let addr = spawn_upstream("only", Arc::new(AtomicBool::new(true))).await;
    registry.register(record("svc", "a1", addr)).expect("register");
    registry.apply_probe("svc", "a1", true, Duration::from_secs(60));

    for _ in 0..10 {
        let (status, headers, _body) =
            call_router(&router, http::Method::GET, "/svc/info", "").await;
        assert_eq!(status, http::StatusCode::OK);
        assert_eq!(
            headers
                .get("x-echo-marker")
                .and_then(|v| v.to_str().ok()),
            Some("only")
        );
    }
}

#[tokio::test]
async fn selection_spreads_load_across_instances() {
    let registry = Registry::new();
    let router = DynamicRouter::new(registry.clone(), &router_config());

    let markers = ["m0", "m1", "m2"];
    for (i, marker) in markers.iter().enumerate() {
        let addr = spawn_upstream(marker, Arc::new(AtomicBool::new(true))).await;
        let id = format!("i{i}");
        registry.register(record("svc", &id, addr)).expect("register");
        registry.apply_probe("svc", &id, true, Duration::from_secs(60));
    }

    let mut hits = std::collections::HashMap::new();
    for _ in 0..90 {
        let (status, headers, _body) =
            call_router(&router, http::Method::GET, "/svc/info", "").await;
        assert_eq!(status, http::StatusCode::OK);
        let marker = headers
            .get("x-echo-marker")
            .and_then(|v| v.to_str().ok())
            .expect("marker header")
            .to_string();
        *hits.entry(marker).or_insert(0usize) += 1;
    }

    // 统计性检验：均匀随机下每个实例都该分到可观的份额
    assert_eq!(hits.len(), 3, "all instances should receive traffic");
    for marker in markers {
        let count = hits.get(marker).copied().unwrap_or(0);
        assert!(count >= 10, "instance {marker} only got {count}/90 requests");
    }
}

#[tokio::test]
async fn round_robin_policy_can_replace_random_selection() {
    use discovery_gateway::services::router::RoundRobinSelection;

    let registry = Registry::new();
    let router = DynamicRouter::with_policy(
        registry.clone(),
        &router_config(),
        Arc::new(RoundRobinSelection::default()),
    );

    let markers = ["r0", "r1", "r2"];
    for (i, marker) in markers.iter().enumerate() {
        let addr = spawn_upstream(marker, Arc::new(AtomicBool::new(true))).await;
        let id = format!("i{i}");
        registry.register(record("svc", &id, addr)).expect("register");
        registry.apply_probe("svc", &id, true, Duration::from_secs(60));
    }

    // 注册表在请求之间没有变化，轮询应当把 9 个请求平均分成 3 份
    let mut hits = std::collections::HashMap::new();
    for _ in 0..9 {
        let (status, headers, _body) =
            call_router(&router, http::Method::GET, "/svc/info", "").await;
        assert_eq!(status, http::StatusCode::OK);
        let marker = headers
            .get("x-echo-marker")
            .and_then(|v| v.to_str().ok())
            .expect("marker header")
            .to_string();
        *hits.entry(marker).or_insert(0usize) += 1;
    }
    for marker in markers {
        assert_eq!(hits.get(marker), Some(&3), "hits: {hits:?}");
    }
}

#[tokio::test]
async fn request_and_response_pass_through_unchanged() {
    let registry = Registry::new();
    let router = DynamicRouter::new(registry.clone(), &router_config());

    let addr = spawn_upstream("echo", Arc::new(AtomicBool::new(true))).await;
    registry.register(record("svc", "a1", addr)).expect("register");
    registry.apply_probe("svc", "a1", true, Duration::from_secs(60));

    // 方法、剩余路径、查询串和请求体原样到达上游
    let (status, headers, body) = call_router(
        &router,
        http::Method::POST,
        "/svc/api/items?page=2",
        "hello upstream",
    )
    .await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(
        headers.get("x-echo-marker").and_then(|v| v.to_str().ok()),
        Some("echo")
    );
    assert!(body.contains("POST"), "method should pass through: {body}");
    assert!(
        body.contains("/api/items?page=2"),
        "subpath and query should pass through: {body}"
    );
    assert!(
        body.contains("hello upstream"),
        "request body should pass through: {body}"
    );

    // 上游自己的状态码原样返回给客户端
    let (status, _headers, _body) =
        call_router(&router, http::Method::GET, "/svc/teapot", "").await;
    assert_eq!(status, http::StatusCode::IM_A_TEAPOT);
}
