//! OPC UA 采集类型定义

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use domain::FieldValue;
use serde::{Deserialize, Serialize};

use crate::error::OpcUaError;

const POLICY_URI_PREFIX: &str = "http://opcfoundation.org/UA/SecurityPolicy#";

// =============================================================================
// 安全策略 / 安全模式
// =============================================================================

/// 安全策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityPolicy {
    None,
    Basic128Rsa15,
    Basic256,
    Basic256Sha256,
    Aes128Sha256RsaOaep,
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    /// 短名称（URI 的 `#` 之后部分）
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic128Rsa15 => "Basic128Rsa15",
            Self::Basic256 => "Basic256",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128_Sha256_RsaOaep",
            Self::Aes256Sha256RsaPss => "Aes256_Sha256_RsaPss",
        }
    }

    pub fn uri(&self) -> String {
        format!("{POLICY_URI_PREFIX}{}", self.name())
    }

    /// 由服务端通告的策略 URI 解析
    pub fn from_uri(uri: &str) -> Option<Self> {
        uri.strip_prefix(POLICY_URI_PREFIX)
            .and_then(Self::from_name)
    }

    fn from_name(name: &str) -> Option<Self> {
        [
            Self::None,
            Self::Basic128Rsa15,
            Self::Basic256,
            Self::Basic256Sha256,
            Self::Aes128Sha256RsaOaep,
            Self::Aes256Sha256RsaPss,
        ]
        .into_iter()
        .find(|p| p.name().eq_ignore_ascii_case(name) || p.name().replace('_', "") == name)
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 配置中的安全策略：自动或固定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyChoice {
    Auto,
    Fixed(SecurityPolicy),
}

impl FromStr for PolicyChoice {
    type Err = OpcUaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        SecurityPolicy::from_uri(s)
            .or_else(|| SecurityPolicy::from_name(s))
            .map(Self::Fixed)
            .ok_or_else(|| OpcUaError::InvalidSecurityPolicy(s.to_string()))
    }
}

impl fmt::Display for PolicyChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Fixed(policy) => policy.fmt(f),
        }
    }
}

/// 消息安全模式（取值与协议枚举一致，可比较强弱）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageSecurityMode {
    Invalid = 0,
    None = 1,
    Sign = 2,
    SignAndEncrypt = 3,
}

impl fmt::Display for MessageSecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => f.write_str("Invalid"),
            Self::None => f.write_str("None"),
            Self::Sign => f.write_str("Sign"),
            Self::SignAndEncrypt => f.write_str("SignAndEncrypt"),
        }
    }
}

/// 配置中的安全模式：自动或固定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChoice {
    Auto,
    Fixed(MessageSecurityMode),
}

impl FromStr for ModeChoice {
    type Err = OpcUaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "none" => Ok(Self::Fixed(MessageSecurityMode::None)),
            "sign" => Ok(Self::Fixed(MessageSecurityMode::Sign)),
            "signandencrypt" => Ok(Self::Fixed(MessageSecurityMode::SignAndEncrypt)),
            _ => Err(OpcUaError::InvalidSecurityMode(s.to_string())),
        }
    }
}

impl fmt::Display for ModeChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Fixed(mode) => mode.fmt(f),
        }
    }
}

// =============================================================================
// 认证
// =============================================================================

/// 用户身份令牌类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserTokenType {
    Anonymous,
    UserName,
    Certificate,
    IssuedToken,
}

impl fmt::Display for UserTokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::UserName => f.write_str("UserName"),
            Self::Certificate => f.write_str("Certificate"),
            Self::IssuedToken => f.write_str("IssuedToken"),
        }
    }
}

/// 敏感字符串，`Debug` 输出脱敏
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

// =============================================================================
// 端点与连接状态
// =============================================================================

/// 服务端通告的端点
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDescription {
    pub endpoint_url: String,
    pub security_policy_uri: String,
    pub security_mode: MessageSecurityMode,
    pub security_level: u8,
    pub user_identity_tokens: Vec<UserTokenType>,
}

impl EndpointDescription {
    pub fn security_policy(&self) -> Option<SecurityPolicy> {
        SecurityPolicy::from_uri(&self.security_policy_uri)
    }

    pub fn offers(&self, token: UserTokenType) -> bool {
        self.user_identity_tokens.contains(&token)
    }
}

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

impl ConnectionState {
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

/// 协商完成后实际生效的安全参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveSecurity {
    pub policy: SecurityPolicy,
    pub mode: MessageSecurityMode,
    pub token: UserTokenType,
}

// =============================================================================
// 数据值
// =============================================================================

/// 节点值（传输层与协议库解耦的简化表示）
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Guid(String),
    ByteString(Vec<u8>),
    StatusCode(u32),
    Array(Vec<Variant>),
}

impl Variant {
    /// 协议数据类型名
    pub fn data_type(&self) -> &'static str {
        match self {
            Self::Empty => "Null",
            Self::Boolean(_) => "Boolean",
            Self::SByte(_) => "SByte",
            Self::Byte(_) => "Byte",
            Self::Int16(_) => "Int16",
            Self::UInt16(_) => "UInt16",
            Self::Int32(_) => "Int32",
            Self::UInt32(_) => "UInt32",
            Self::Int64(_) => "Int64",
            Self::UInt64(_) => "UInt64",
            Self::Float(_) => "Float",
            Self::Double(_) => "Double",
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::Guid(_) => "Guid",
            Self::ByteString(_) => "ByteString",
            Self::StatusCode(_) => "StatusCode",
            Self::Array(items) => items.first().map(Variant::data_type).unwrap_or("Null"),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// 标量转字段值；数组与空值返回 `None`
    pub fn to_field(&self, timestamp_format: &str) -> Option<FieldValue> {
        let value = match self {
            Self::Empty | Self::Array(_) => return None,
            Self::Boolean(v) => FieldValue::Bool(*v),
            Self::SByte(v) => FieldValue::I64(i64::from(*v)),
            Self::Byte(v) => FieldValue::U64(u64::from(*v)),
            Self::Int16(v) => FieldValue::I64(i64::from(*v)),
            Self::UInt16(v) => FieldValue::U64(u64::from(*v)),
            Self::Int32(v) => FieldValue::I64(i64::from(*v)),
            Self::UInt32(v) => FieldValue::U64(u64::from(*v)),
            Self::Int64(v) => FieldValue::I64(*v),
            Self::UInt64(v) => FieldValue::U64(*v),
            Self::Float(v) => FieldValue::F64(f64::from(*v)),
            Self::Double(v) => FieldValue::F64(*v),
            Self::String(v) | Self::Guid(v) => FieldValue::String(v.clone()),
            Self::DateTime(v) => FieldValue::String(format_timestamp(v, timestamp_format)),
            Self::ByteString(v) => FieldValue::String(hex(v)),
            Self::StatusCode(v) => FieldValue::U64(u64::from(*v)),
        };
        Some(value)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// 按 strftime 格式输出；格式非法时退回 RFC 3339
pub fn format_timestamp(ts: &DateTime<Utc>, format: &str) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    if write!(out, "{}", ts.format(format)).is_err() {
        return ts.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
    }
    out
}

/// 带状态与时间戳的数据值
#[derive(Debug, Clone, PartialEq)]
pub struct DataValue {
    pub value: Option<Variant>,
    pub status: u32,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    pub fn good(value: Variant) -> Self {
        Self {
            value: Some(value),
            status: crate::status::STATUS_GOOD,
            source_timestamp: None,
            server_timestamp: None,
        }
    }

    pub fn with_status(status: u32) -> Self {
        Self {
            value: None,
            status,
            source_timestamp: None,
            server_timestamp: None,
        }
    }
}

/// 订阅变更通知（客户端句柄 = 节点位置索引）
#[derive(Debug, Clone, PartialEq)]
pub struct DataChangeNotification {
    pub client_handle: u32,
    pub value: DataValue,
}

/// 输出记录的时间戳来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampSource {
    /// 采集时刻
    #[default]
    Gather,
    /// 服务端时间戳
    Server,
    /// 数据源时间戳
    Source,
}
