//! OPC UA 采集错误类型定义

/// OPC UA 采集错误
#[derive(Debug, thiserror::Error)]
pub enum OpcUaError {
    /// 配置错误（初始化阶段即失败）
    #[error("config error: {0}")]
    Config(String),

    /// 端点地址非法
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// 安全策略非法
    #[error("invalid security policy: {0}")]
    InvalidSecurityPolicy(String),

    /// 安全模式非法
    #[error("invalid security mode: {0}")]
    InvalidSecurityMode(String),

    /// 没有满足条件的端点
    #[error("unable to find suitable endpoint (policy {policy}, mode {mode}): {reason}")]
    EndpointNotFound {
        policy: String,
        mode: String,
        reason: String,
    },

    /// 认证方式不可用
    #[error("authentication {method} failed: {reason}")]
    Authentication { method: String, reason: String },

    /// 证书生成或加载失败
    #[error("certificate {operation} failed for {path}: {reason}")]
    Certificate {
        operation: String,
        path: String,
        reason: String,
    },

    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// 会话尚未建立
    #[error("not connected")]
    NotConnected,

    /// 传输层错误（读、注册、订阅）
    #[error("transport error: {0}")]
    Transport(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 监控项创建失败
    #[error("monitored item for node {node} failed: {reason}")]
    MonitoredItem { node: String, reason: String },

    /// 通道关闭
    #[error("channel closed")]
    ChannelClosed,

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// OPC UA 采集结果
pub type OpcUaResult<T> = Result<T, OpcUaError>;

impl OpcUaError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn certificate(
        operation: &str,
        path: impl std::fmt::Display,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Certificate {
            operation: operation.to_string(),
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}
