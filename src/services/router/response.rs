use http_body_util::{BodyExt, Empty, Full};
use serde::Serialize;

use super::error::RouterError;

pub type BoxedBody = http_body_util::combinators::UnsyncBoxBody<
    bytes::Bytes,
    Box<dyn std::error::Error + Send + Sync>,
>;

pub fn full_body(content: impl Into<bytes::Bytes>) -> BoxedBody {
    Full::new(content.into())
        .map_err(|never| -> Box<dyn std::error::Error + Send + Sync> { match never {} })
        .boxed_unsync()
}

pub fn empty_body() -> BoxedBody {
    Empty::new()
        .map_err(|never| -> Box<dyn std::error::Error + Send + Sync> { match never {} })
        .boxed_unsync()
}

// 创建错误响应
pub fn create_error_response(error: &RouterError) -> http::Response<BoxedBody> {
    let (status, message) = match error {
        // 没有健康实例：对客户端呈现为 404（与上游故障区分开）
        RouterError::ServiceUnavailable(msg) => (http::StatusCode::NOT_FOUND, msg.as_str()),
        RouterError::Upstream(msg) => (http::StatusCode::BAD_GATEWAY, msg.as_str()),
        RouterError::InvalidPath(msg) => (http::StatusCode::BAD_REQUEST, msg.as_str()),
    };

    tracing::warn!(status = %status, message = %message, "Creating error response");

    match http::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body(message.to_string()))
    {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build error response");
            let mut fallback = http::Response::new(empty_body());
            *fallback.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        }
    }
}

// 创建 JSON 响应（控制面接口使用）
pub fn json_response<T: Serialize>(
    status: http::StatusCode,
    payload: &T,
) -> http::Response<BoxedBody> {
    let body = match serde_json::to_vec(payload) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response payload");
            let mut fallback = http::Response::new(empty_body());
            *fallback.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
            return fallback;
        }
    };

    match http::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(full_body(body))
    {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build JSON response");
            let mut fallback = http::Response::new(empty_body());
            *fallback.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        }
    }
}
