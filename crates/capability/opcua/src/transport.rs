//! OPC UA 传输抽象。
//!
//! 连接、轮询、订阅只依赖 `UaTransport`；协议库适配见 `session` 模块，
//! 测试使用内存实现。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_telemetry::{Counter, StatsSink};
use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::certificate::CertificatePair;
use crate::error::OpcUaResult;
use crate::node::DataChangeFilter;
use crate::types::{DataChangeNotification, DataValue, EndpointDescription, Secret};

/// 会话身份令牌
#[derive(Debug, Clone)]
pub enum IdentityToken {
    Anonymous,
    UserName { username: String, password: Secret },
    /// X509 用户证书（PEM 文件）
    X509 {
        certificate: PathBuf,
        private_key: PathBuf,
    },
    /// base64 编码的令牌
    IssuedToken(Secret),
}

/// 建立会话所需参数
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub endpoint: EndpointDescription,
    pub identity: IdentityToken,
    pub certificate: Option<CertificatePair>,
    pub application_name: String,
    pub application_uri: String,
    /// 0 表示协议库默认值
    pub session_timeout_ms: u64,
}

/// 单个监控项请求（客户端句柄 = 节点位置索引）
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemRequest {
    pub node_id: String,
    pub client_handle: u32,
    pub sampling_interval_ms: f64,
    pub queue_size: u32,
    pub discard_oldest: bool,
    pub filter: Option<DataChangeFilter>,
}

/// 变更通知入队端，协议库回调中调用，从不阻塞
#[derive(Clone)]
pub struct NotificationSender {
    tx: mpsc::Sender<DataChangeNotification>,
    stats: Arc<dyn StatsSink>,
}

impl NotificationSender {
    pub fn new(tx: mpsc::Sender<DataChangeNotification>, stats: Arc<dyn StatsSink>) -> Self {
        Self { tx, stats }
    }

    /// 入队成功返回 true；队列满时丢弃并计数
    pub fn deliver(&self, notification: DataChangeNotification) -> bool {
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                self.stats.incr(Counter::NotificationDropped);
                warn!(
                    client_handle = dropped.client_handle,
                    "notification queue full, dropping change notification"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("notification queue closed");
                false
            }
        }
    }
}

/// OPC UA 传输接口
#[async_trait]
pub trait UaTransport: Send + Sync {
    /// 获取服务端通告的端点
    async fn get_endpoints(&self, url: &str) -> OpcUaResult<Vec<EndpointDescription>>;

    /// 建立并激活会话
    async fn open_session(&self, params: &SessionParams) -> OpcUaResult<()>;

    /// 关闭当前会话（无会话时为空操作）
    async fn close_session(&self) -> OpcUaResult<()>;

    /// 注册节点，返回服务端分配的别名
    async fn register_nodes(&self, node_ids: &[String]) -> OpcUaResult<Vec<String>>;

    /// 读取节点值（同时请求服务端和数据源时间戳）
    async fn read(&self, node_ids: &[String], max_age_ms: f64) -> OpcUaResult<Vec<DataValue>>;

    /// 创建订阅，变更通知投递到 `sink`
    async fn create_subscription(
        &self,
        publishing_interval: Duration,
        sink: NotificationSender,
    ) -> OpcUaResult<u32>;

    /// 创建监控项，返回每项状态码（与请求按位置对应）
    async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: &[MonitoredItemRequest],
    ) -> OpcUaResult<Vec<u32>>;

    async fn delete_subscription(&self, subscription_id: u32) -> OpcUaResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_telemetry::AcquisitionMetrics;

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let metrics = Arc::new(AcquisitionMetrics::new());
        let (tx, mut rx) = mpsc::channel(1);
        let sender = NotificationSender::new(tx, metrics.clone());

        let notification = DataChangeNotification {
            client_handle: 0,
            value: DataValue::with_status(0),
        };
        assert!(sender.deliver(notification.clone()));
        assert!(!sender.deliver(notification.clone()));
        assert_eq!(metrics.snapshot().notification_dropped, 1);

        assert_eq!(rx.recv().await, Some(notification));
    }
}
