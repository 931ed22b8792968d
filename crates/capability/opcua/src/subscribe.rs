//! 订阅采集：监控项变更经有界队列交给后台消费任务，再输出为指标。
//!
//! ```text
//! 协议库回调 ──try_send──▶ 接收队列(1024) ──▶ 消费任务 ──send──▶ 输出队列(100)
//!                                                 │
//!                                                 └── 更新 NodeValue 槽位
//! ```

use std::sync::Arc;
use std::time::Duration;

use agent_telemetry::{Counter, StatsSink};
use async_trait::async_trait;
use domain::Metric;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{Acquisition, InputClient};
use crate::config::SubscribeClientConfig;
use crate::connection::Connection;
use crate::error::{OpcUaError, OpcUaResult};
use crate::status::quality_text;
use crate::transport::{MonitoredItemRequest, NotificationSender, UaTransport};
use crate::types::DataChangeNotification;

/// 变更通知接收队列容量
pub const INTAKE_QUEUE_CAPACITY: usize = 1024;
/// 输出指标队列容量
pub const OUTPUT_QUEUE_CAPACITY: usize = 100;
/// 停止时等待取消订阅的上限
pub const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

struct Consumer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// 订阅采集客户端
pub struct SubscribeClient {
    base: Arc<InputClient>,
    connection: Connection,
    interval: Duration,
    requests: Vec<MonitoredItemRequest>,
    subscription_id: Option<u32>,
    intake: Option<mpsc::Receiver<DataChangeNotification>>,
    consumer: Option<Consumer>,
}

impl SubscribeClient {
    pub fn new(
        config: SubscribeClientConfig,
        transport: Arc<dyn UaTransport>,
        stats: Arc<dyn StatsSink>,
    ) -> OpcUaResult<Self> {
        config.validate()?;
        let connection = Connection::new(config.input.client.clone(), transport)?;
        let interval = config.subscription_interval();
        let base = Arc::new(InputClient::new(config.input, stats)?);
        Self::with_connection(base, connection, interval)
    }

    /// 使用已构建的基础对象与连接；监控项请求在此构建并校验
    pub fn with_connection(
        base: Arc<InputClient>,
        connection: Connection,
        interval: Duration,
    ) -> OpcUaResult<Self> {
        let requests = build_requests(&base)?;
        Ok(Self {
            base,
            connection,
            interval,
            requests,
            subscription_id: None,
            intake: None,
            consumer: None,
        })
    }

    pub fn base(&self) -> &Arc<InputClient> {
        &self.base
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn requests(&self) -> &[MonitoredItemRequest] {
        &self.requests
    }

    /// 提交监控项，全部成功后启动消费任务并返回输出队列
    pub async fn start_stream_values(&mut self) -> OpcUaResult<mpsc::Receiver<Metric>> {
        if self.consumer.is_some() {
            return Err(OpcUaError::Config("stream already started".to_string()));
        }
        if self.subscription_id.is_none() {
            self.connect().await?;
        }
        let subscription_id = self.subscription_id.ok_or(OpcUaError::NotConnected)?;

        if let Err(e) = self.submit_monitored_items(subscription_id).await {
            // 已创建的监控项随订阅一起删除，重试时重新订阅
            self.discard_subscription().await;
            return Err(e);
        }

        let intake = self.intake.take().ok_or(OpcUaError::ChannelClosed)?;
        let (out_tx, out_rx) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(consume(
            Arc::clone(&self.base),
            intake,
            out_tx,
            cancel.clone(),
        ));
        self.consumer = Some(Consumer { cancel, handle });

        info!(
            subscription_id,
            items = self.requests.len(),
            "streaming monitored items"
        );
        Ok(out_rx)
    }

    async fn submit_monitored_items(&self, subscription_id: u32) -> OpcUaResult<()> {
        let transport = Arc::clone(self.connection.transport());
        let statuses = self
            .connection
            .request(
                "create monitored items",
                transport.create_monitored_items(subscription_id, &self.requests),
            )
            .await?;
        if statuses.len() != self.requests.len() {
            return Err(OpcUaError::Transport(format!(
                "created {} of {} monitored items",
                statuses.len(),
                self.requests.len()
            )));
        }
        for (request, status) in self.requests.iter().zip(&statuses) {
            if !self.base.filter().is_ok(*status) {
                return Err(OpcUaError::MonitoredItem {
                    node: request.node_id.clone(),
                    reason: quality_text(*status),
                });
            }
        }
        Ok(())
    }

    /// 删除订阅（有界等待，失败只记录日志）并丢弃接收队列
    async fn discard_subscription(&mut self) {
        if let Some(subscription_id) = self.subscription_id.take() {
            let transport = Arc::clone(self.connection.transport());
            match tokio::time::timeout(
                UNSUBSCRIBE_TIMEOUT,
                transport.delete_subscription(subscription_id),
            )
            .await
            {
                Ok(Ok(())) => debug!(subscription_id, "subscription deleted"),
                Ok(Err(e)) => warn!(subscription_id, error = %e, "failed to delete subscription"),
                Err(_) => warn!(subscription_id, "timed out deleting subscription"),
            }
        }
        self.intake = None;
    }
}

#[async_trait]
impl Acquisition for SubscribeClient {
    /// 建立会话并创建订阅
    async fn connect(&mut self) -> OpcUaResult<()> {
        self.connection.connect().await?;

        let (tx, rx) = mpsc::channel(INTAKE_QUEUE_CAPACITY);
        let sink = NotificationSender::new(tx, Arc::clone(self.base.stats()));
        let transport = Arc::clone(self.connection.transport());
        let subscription_id = self
            .connection
            .request(
                "create subscription",
                transport.create_subscription(self.interval, sink),
            )
            .await?;

        debug!(subscription_id, interval_ms = self.interval.as_millis() as u64, "subscription created");
        self.subscription_id = Some(subscription_id);
        self.intake = Some(rx);
        Ok(())
    }

    /// 取消订阅、停止消费任务并断开；返回时输出队列已关闭
    async fn stop(&mut self) -> OpcUaResult<()> {
        self.discard_subscription().await;

        if let Some(consumer) = self.consumer.take() {
            consumer.cancel.cancel();
            if let Err(e) = consumer.handle.await {
                warn!(error = %e, "notification consumer task failed");
            }
        }

        self.connection.disconnect().await
    }
}

fn build_requests(base: &InputClient) -> OpcUaResult<Vec<MonitoredItemRequest>> {
    base.mapper()
        .mappings()
        .iter()
        .enumerate()
        .map(|(i, mapping)| {
            let params = &mapping.node.monitoring_params;
            let filter = params
                .data_change_filter
                .as_ref()
                .map(|f| f.resolve(&mapping.id))
                .transpose()?;
            let client_handle = u32::try_from(i)
                .map_err(|_| OpcUaError::config(format!("too many nodes ({i})")))?;
            Ok(MonitoredItemRequest {
                node_id: mapping.id.clone(),
                client_handle,
                sampling_interval_ms: params.sampling_interval_ms as f64,
                queue_size: params.queue_size(),
                discard_oldest: params.discard_oldest(),
                filter,
            })
        })
        .collect()
}

async fn consume(
    base: Arc<InputClient>,
    mut intake: mpsc::Receiver<DataChangeNotification>,
    out: mpsc::Sender<Metric>,
    cancel: CancellationToken,
) {
    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => break,
            received = intake.recv() => match received {
                Some(notification) => notification,
                None => break,
            },
        };
        base.stats().incr(Counter::Notification);

        let index = notification.client_handle as usize;
        if index >= base.mapper().len() {
            warn!(client_handle = notification.client_handle, "notification for unknown client handle");
            continue;
        }
        if !base.update_node_value(index, &notification.value) {
            continue;
        }
        let Some(metric) = base.metric_for_node(index) else {
            continue;
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = out.send(metric) => {
                if sent.is_err() {
                    debug!("metric receiver dropped, stopping consumer");
                    break;
                }
            }
        }
    }
    debug!("notification consumer exited");
}
