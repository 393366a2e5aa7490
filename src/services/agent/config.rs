use std::time::Duration;

/// 注册代理配置
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// 网关控制面地址（host:port）
    pub gateway_addr: String,
    /// 单次注册请求超时
    pub register_timeout: Duration,
    /// 注销请求总超时，关停流程不允许被它挂住
    pub deregister_timeout: Duration,
    /// 注册重试次数上限，全部失败后视为致命错误
    pub max_register_attempts: u32,
    /// 首次重试退避，之后指数翻倍
    pub register_backoff: Duration,
    /// 退避上限
    pub max_register_backoff: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            gateway_addr: "127.0.0.1:3000".to_string(),
            register_timeout: Duration::from_secs(10),
            deregister_timeout: Duration::from_secs(5),
            max_register_attempts: 5,
            register_backoff: Duration::from_millis(500),
            max_register_backoff: Duration::from_secs(8),
        }
    }
}
