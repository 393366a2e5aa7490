use std::time::Duration;

use http_body::Body;
use http_body_util::BodyExt;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;

use super::error::RouterError;
use super::response::BoxedBody;

// 复用连接的上游 HTTP 客户端
pub type ForwardClient = Client<HttpConnector, BoxedBody>;

// 转发 HTTP 请求到选中的实例。
// 方法、剩余路径、查询串、头部和请求体原样透传，只重写 Host。
// 客户端提前断开时本 future 随连接一起被丢弃，出站调用随之取消。
pub async fn forward_request<B>(
    client: &ForwardClient,
    req: http::Request<B>,
    authority: &str,
    subpath: &str,
    timeout: Duration,
) -> Result<http::Response<BoxedBody>, RouterError>
where
    B: Body<Data = bytes::Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + std::fmt::Debug,
{
    let (parts, body) = req.into_parts();

    let query = parts
        .uri
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();
    let uri: http::Uri = format!("http://{authority}{subpath}{query}")
        .parse()
        .map_err(|e| RouterError::Upstream(format!("Invalid upstream URI: {e}")))?;

    // 构建新的请求
    let mut new_req = http::Request::builder()
        .method(parts.method)
        .uri(uri)
        .version(http::Version::HTTP_11);

    // 复制头部，Host 改写为目标实例
    for (name, value) in parts.headers.iter() {
        if name == http::header::HOST {
            continue;
        }
        new_req = new_req.header(name, value);
    }
    new_req = new_req.header(http::header::HOST, authority);

    let new_req = new_req
        .body(
            body.map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { e.into() })
                .boxed_unsync(),
        )
        .map_err(|e| RouterError::Upstream(format!("Failed to build request: {e}")))?;

    // 发送请求到目标实例（带超时）
    let response = tokio::time::timeout(timeout, client.request(new_req))
        .await
        .map_err(|_| RouterError::Upstream(format!("Request to {authority} timed out")))?
        .map_err(|e| RouterError::Upstream(format!("Failed to reach {authority}: {e}")))?;

    // 直接转换响应体，不收集响应体
    let (parts, body) = response.into_parts();

    let mut response_builder = http::Response::builder()
        .status(parts.status)
        .version(parts.version);

    // 复制响应头部
    for (name, value) in parts.headers.iter() {
        response_builder = response_builder.header(name, value);
    }

    let boxed_body = body
        .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })
        .boxed_unsync();

    response_builder
        .body(boxed_body)
        .map_err(|e| RouterError::Upstream(format!("Failed to build response: {e}")))
}
