//! # OPC UA 采集能力模块
//!
//! 连接 OPC UA 设备并把节点值转换为采集记录，支持两种采集方式：
//! - **轮询读取**（`ReadClient`）：注册节点后按调度周期批量读取
//! - **订阅推送**（`SubscribeClient`）：监控项变更经有界队列推送
//!
//! ## 架构设计
//!
//! ```text
//! 设备配置 (InputClientConfig / SubscribeClientConfig)
//!       │
//!       ▼
//! NodeMapper ──── StatusCodeFilter
//!       │
//!       ▼
//! InputClient（共享基础：映射、最新值、指标生成）
//!       │
//!       ├── ReadClient ──┐
//!       └── SubscribeClient ──┐
//!                        ▼    ▼
//!                      Connection
//!                        │  ├── EndpointNegotiator
//!                        │  └── CertificateProvisioner
//!                        ▼
//!                    UaTransport（OpcUaSessionTransport / 测试实现）
//! ```
//!
//! ## 配置格式
//!
//! ```json
//! {
//!   "endpoint": "opc.tcp://192.168.1.10:4840",
//!   "security_policy": "auto",
//!   "security_mode": "auto",
//!   "auth_method": "Anonymous",
//!   "metric_name": "opcua",
//!   "root_nodes": [
//!     { "name": "temp", "namespace": "2", "identifier_type": "s", "identifier": "Boiler.Temp" }
//!   ],
//!   "groups": [
//!     { "name": "line1", "namespace": "3", "identifier_type": "i",
//!       "default_tags": { "line": "1" },
//!       "nodes": [ { "name": "speed", "identifier": "1001" } ] }
//!   ]
//! }
//! ```

mod certificate;
mod client;
mod config;
mod connection;
mod endpoint;
mod error;
mod node;
mod read;
mod session;
mod status;
mod subscribe;
mod transport;
mod types;

pub use certificate::{
    APPLICATION_NAME, APPLICATION_URI, CertificateGenerator, CertificatePair,
    CertificateProvisioner, GeneratedCertificate, RcgenCertificateGenerator,
};
pub use client::{Acquisition, InputClient};
pub use config::{
    ClientConfig, DEFAULT_TIMESTAMP_FORMAT, InputClientConfig, OPC_TCP_SCHEME,
    SubscribeClientConfig, Workarounds,
};
pub use connection::Connection;
pub use endpoint::{EndpointNegotiator, Negotiated, resolve_auth};
pub use error::{OpcUaError, OpcUaResult};
pub use node::{
    DataChangeFilter, DataChangeFilterSettings, DataChangeTrigger, DeadbandType,
    MonitoringParameters, NodeGroupSettings, NodeMapper, NodeMetricMapping, NodeSettings,
    NodeValue,
};
pub use read::{READ_MAX_AGE_MS, ReadClient};
pub use session::OpcUaSessionTransport;
pub use status::{STATUS_GOOD, StatusCodeFilter, is_good, quality_text};
pub use subscribe::{
    INTAKE_QUEUE_CAPACITY, OUTPUT_QUEUE_CAPACITY, SubscribeClient, UNSUBSCRIBE_TIMEOUT,
};
pub use transport::{
    IdentityToken, MonitoredItemRequest, NotificationSender, SessionParams, UaTransport,
};
pub use types::*;
