use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// 转发请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_str = fs::read_to_string("config.toml")?;
        let config: Config = toml::from_str(&config_str)?;
        Ok(config)
    }

    // 配置文件缺失时回退到默认值
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load config.toml, using defaults");
                Self::default()
            }
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen.host, self.listen.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.forward.request_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_builtin_ports() {
        let config = Config::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:3000");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str("[listen]\nport = 8080\n").unwrap();
        assert_eq!(config.listen.host, "0.0.0.0");
        assert_eq!(config.listen.port, 8080);
        assert_eq!(config.forward.request_timeout, 30);
    }
}
