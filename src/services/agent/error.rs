/// 注册代理错误类型
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("registration failed: {0}")]
    Registration(String),
    #[error("deregistration failed: {0}")]
    Deregistration(String),
    #[error("gateway returned status {0}")]
    GatewayStatus(http::StatusCode),
    #[error("invalid agent state: {0}")]
    InvalidState(&'static str),
}
