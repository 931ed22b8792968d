//! 设备配置（JSON）。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{OpcUaError, OpcUaResult};
use crate::node::{NodeGroupSettings, NodeSettings};
use crate::types::{ModeChoice, PolicyChoice, Secret, TimestampSource};

/// 设备传输层 scheme
pub const OPC_TCP_SCHEME: &str = "opc.tcp";

/// 默认时间格式：RFC 3339（纳秒精度，UTC）
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";

/// 兼容性开关
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Workarounds {
    /// 额外视为有效的状态码（十进制或 `0x` 十六进制）
    pub additional_valid_status_codes: Vec<String>,
    /// 跳过 RegisterNodes，直接使用原始节点标识读取
    pub use_unregistered_reads: bool,
}

/// 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// 端点地址，例如 `opc.tcp://192.168.1.10:4840`
    pub endpoint: String,
    #[serde(default = "default_auto")]
    pub security_policy: String,
    #[serde(default = "default_auto")]
    pub security_mode: String,
    /// 客户端证书路径（PEM）
    #[serde(default)]
    pub certificate: Option<PathBuf>,
    /// 客户端私钥路径（PEM）
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    #[serde(default = "default_auth_method")]
    pub auth_method: String,
    #[serde(default)]
    pub username: Option<Secret>,
    #[serde(default)]
    pub password: Option<Secret>,
    /// IssuedToken 认证使用的令牌
    #[serde(default)]
    pub issued_token: Option<Secret>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// 会话超时，0 表示使用协议库默认值
    #[serde(default)]
    pub session_timeout_ms: u64,
    #[serde(default)]
    pub workarounds: Workarounds,
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_auth_method() -> String {
    "Anonymous".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_timestamp_format() -> String {
    DEFAULT_TIMESTAMP_FORMAT.to_string()
}

fn default_subscription_interval_ms() -> u64 {
    100
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            security_policy: default_auto(),
            security_mode: default_auto(),
            certificate: None,
            private_key: None,
            auth_method: default_auth_method(),
            username: None,
            password: None,
            issued_token: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            session_timeout_ms: 0,
            workarounds: Workarounds::default(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn policy(&self) -> OpcUaResult<PolicyChoice> {
        self.security_policy.parse()
    }

    pub fn mode(&self) -> OpcUaResult<ModeChoice> {
        self.security_mode.parse()
    }

    /// 端点地址必须为 `opc.tcp`
    pub fn endpoint_url(&self) -> OpcUaResult<Url> {
        let url = Url::parse(self.endpoint.trim())
            .map_err(|e| OpcUaError::InvalidEndpoint(format!("{}: {e}", self.endpoint)))?;
        if url.scheme() != OPC_TCP_SCHEME {
            return Err(OpcUaError::InvalidEndpoint(format!(
                "{}: scheme {:?} not supported, expected {OPC_TCP_SCHEME}",
                self.endpoint,
                url.scheme()
            )));
        }
        Ok(url)
    }

    pub fn validate(&self) -> OpcUaResult<()> {
        self.endpoint_url()?;
        self.policy()?;
        self.mode()?;
        if self.connect_timeout_ms == 0 {
            return Err(OpcUaError::config("connect_timeout_ms must be positive"));
        }
        if self.request_timeout_ms == 0 {
            return Err(OpcUaError::config("request_timeout_ms must be positive"));
        }
        Ok(())
    }
}

/// 轮询 / 订阅共用的采集配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputClientConfig {
    #[serde(flatten)]
    pub client: ClientConfig,
    /// 默认指标名
    pub metric_name: String,
    #[serde(default)]
    pub timestamp: TimestampSource,
    /// DateTime 值的输出格式（strftime）
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    #[serde(default)]
    pub root_nodes: Vec<NodeSettings>,
    #[serde(default)]
    pub groups: Vec<NodeGroupSettings>,
    /// 可选输出字段，目前支持 `DataType`
    #[serde(default)]
    pub optional_fields: Vec<String>,
}

impl InputClientConfig {
    pub fn from_json(value: &str) -> OpcUaResult<Self> {
        serde_json::from_str(value).map_err(|e| OpcUaError::config(e.to_string()))
    }

    pub fn validate(&self) -> OpcUaResult<()> {
        if self.metric_name.trim().is_empty() {
            return Err(OpcUaError::config("metric_name is empty"));
        }
        if self.root_nodes.is_empty() && self.groups.is_empty() {
            return Err(OpcUaError::config("no nodes configured"));
        }
        for group in &self.groups {
            if group.nodes.is_empty() {
                return Err(OpcUaError::config(format!(
                    "group {:?} has no nodes",
                    group.metric_name
                )));
            }
        }
        for field in &self.optional_fields {
            if field != "DataType" {
                return Err(OpcUaError::config(format!(
                    "optional field {field:?} not supported"
                )));
            }
        }
        if self.timestamp_format.is_empty() || !timestamp_format_valid(&self.timestamp_format) {
            return Err(OpcUaError::config(format!(
                "invalid timestamp_format {:?}",
                self.timestamp_format
            )));
        }
        self.client.validate()
    }

    pub fn wants_data_type(&self) -> bool {
        self.optional_fields.iter().any(|f| f == "DataType")
    }
}

fn timestamp_format_valid(format: &str) -> bool {
    use chrono::format::{Item, StrftimeItems};

    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// 订阅采集配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeClientConfig {
    #[serde(flatten)]
    pub input: InputClientConfig,
    /// 订阅发布间隔
    #[serde(default = "default_subscription_interval_ms")]
    pub subscription_interval_ms: u64,
}

impl SubscribeClientConfig {
    pub fn from_json(value: &str) -> OpcUaResult<Self> {
        serde_json::from_str(value).map_err(|e| OpcUaError::config(e.to_string()))
    }

    pub fn subscription_interval(&self) -> Duration {
        Duration::from_millis(self.subscription_interval_ms)
    }

    pub fn validate(&self) -> OpcUaResult<()> {
        if self.subscription_interval_ms == 0 {
            return Err(OpcUaError::config("subscription_interval_ms must be positive"));
        }
        self.input.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_json() {
        let config = InputClientConfig::from_json(
            r#"{
                "endpoint": "opc.tcp://localhost:4840",
                "metric_name": "opcua",
                "root_nodes": [
                    { "name": "temp", "namespace": "2", "identifier_type": "s", "identifier": "t1" }
                ]
            }"#,
        )
        .expect("config");

        assert_eq!(config.client.security_policy, "auto");
        assert_eq!(config.client.security_mode, "auto");
        assert_eq!(config.client.auth_method, "Anonymous");
        assert_eq!(config.client.connect_timeout_ms, 10_000);
        assert_eq!(config.client.request_timeout_ms, 5_000);
        assert_eq!(config.timestamp, TimestampSource::Gather);
        assert_eq!(config.timestamp_format, DEFAULT_TIMESTAMP_FORMAT);
        assert!(!config.client.workarounds.use_unregistered_reads);
        config.validate().expect("valid");
    }

    #[test]
    fn rejects_wrong_scheme() {
        let config = ClientConfig::new("http://localhost:4840");
        assert!(matches!(
            config.validate(),
            Err(OpcUaError::InvalidEndpoint(msg)) if msg.contains("http")
        ));
    }

    #[test]
    fn rejects_bad_policy() {
        let mut config = ClientConfig::new("opc.tcp://localhost:4840");
        config.security_policy = "Basic1".to_string();
        assert!(matches!(
            config.validate(),
            Err(OpcUaError::InvalidSecurityPolicy(_))
        ));
    }

    #[test]
    fn subscribe_defaults() {
        let config = SubscribeClientConfig::from_json(
            r#"{
                "endpoint": "opc.tcp://localhost:4840",
                "metric_name": "opcua",
                "groups": [
                    { "name": "g", "namespace": "3", "identifier_type": "i",
                      "nodes": [ { "name": "a", "identifier": "1" } ] }
                ]
            }"#,
        )
        .expect("config");
        assert_eq!(config.subscription_interval_ms, 100);
        config.validate().expect("valid");
    }
}
