//! 采集进程运行配置加载。

use std::env;
use std::path::PathBuf;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 采集方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// 周期轮询读取
    Read,
    /// 订阅推送
    Subscribe,
}

/// 采集进程运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 设备配置文件（JSON）路径
    pub device_config: PathBuf,
    pub mode: AcquisitionMode,
    pub poll_interval_ms: u64,
    pub opcua_username: Option<String>,
    pub opcua_password: Option<String>,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let device_config = env::var("AGENT_DEVICE_CONFIG")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::Missing("AGENT_DEVICE_CONFIG".to_string()))?;
        let mode = read_mode("AGENT_MODE")?;
        let poll_interval_ms = read_u64_with_default("AGENT_POLL_INTERVAL_MS", 10_000)?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "AGENT_POLL_INTERVAL_MS".to_string(),
                "0".to_string(),
            ));
        }
        let opcua_username = read_optional("AGENT_OPCUA_USERNAME");
        let opcua_password = read_optional("AGENT_OPCUA_PASSWORD");

        Ok(Self {
            device_config,
            mode,
            poll_interval_ms,
            opcua_username,
            opcua_password,
        })
    }
}

fn read_mode(key: &str) -> Result<AcquisitionMode, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(AcquisitionMode::Read),
    };
    match value.to_ascii_lowercase().as_str() {
        "" | "read" | "poll" => Ok(AcquisitionMode::Read),
        "subscribe" | "listen" => Ok(AcquisitionMode::Subscribe),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
