// 定义路由错误类型。
// ServiceUnavailable（无健康实例）与 Upstream（实例不可达）必须区分开，
// 运维需要分辨“没有注册/健康的后端”和“后端注册了但连不上”。
#[derive(Debug)]
pub enum RouterError {
    ServiceUnavailable(String),
    Upstream(String),
    InvalidPath(String),
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {msg}"),
            RouterError::Upstream(msg) => write!(f, "Upstream error: {msg}"),
            RouterError::InvalidPath(msg) => write!(f, "Invalid path: {msg}"),
        }
    }
}

impl std::error::Error for RouterError {}
