//! 轮询采集：注册节点后按需读取。

use std::sync::Arc;

use agent_telemetry::{Counter, StatsSink};
use async_trait::async_trait;
use domain::Metric;
use tracing::{debug, warn};

use crate::client::{Acquisition, InputClient};
use crate::config::InputClientConfig;
use crate::connection::Connection;
use crate::error::{OpcUaError, OpcUaResult};
use crate::transport::UaTransport;
use crate::types::ConnectionState;

/// Read 请求的最大缓存时长
pub const READ_MAX_AGE_MS: f64 = 2000.0;

/// 轮询采集客户端
pub struct ReadClient {
    base: Arc<InputClient>,
    connection: Connection,
    read_ids: Vec<String>,
}

impl ReadClient {
    pub fn new(
        config: InputClientConfig,
        transport: Arc<dyn UaTransport>,
        stats: Arc<dyn StatsSink>,
    ) -> OpcUaResult<Self> {
        let connection = Connection::new(config.client.clone(), transport)?;
        let base = Arc::new(InputClient::new(config, stats)?);
        Ok(Self::with_connection(base, connection))
    }

    /// 使用已构建的基础对象与连接
    pub fn with_connection(base: Arc<InputClient>, connection: Connection) -> Self {
        Self {
            base,
            connection,
            read_ids: Vec::new(),
        }
    }

    pub fn base(&self) -> &Arc<InputClient> {
        &self.base
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// 连接状态为 Connected 时读取，否则先重连；读取失败后主动断开
    pub async fn current_values(&mut self) -> OpcUaResult<Vec<Metric>> {
        let result = match self.connection.state() {
            ConnectionState::Connected => self.read().await,
            _ => self.connect_and_read().await,
        };

        if let Err(e) = result {
            self.base.stats().incr(Counter::ReadError);
            if let Err(disconnect_err) = self.connection.reset().await {
                warn!(error = %disconnect_err, "disconnect after read failure failed");
            }
            return Err(e);
        }
        self.base.stats().incr(Counter::ReadSuccess);

        let metrics = (0..self.base.mapper().len())
            .filter(|&i| self.base.status_ok(i))
            .filter_map(|i| self.base.metric_for_node(i))
            .collect();
        Ok(metrics)
    }

    async fn connect_and_read(&mut self) -> OpcUaResult<()> {
        self.connection.connect().await?;
        self.prepare_read_ids().await?;
        self.read().await
    }

    async fn prepare_read_ids(&mut self) -> OpcUaResult<()> {
        let node_ids = self.base.mapper().node_ids();
        if self.base.config().client.workarounds.use_unregistered_reads {
            self.read_ids = node_ids.to_vec();
            return Ok(());
        }

        let transport = Arc::clone(self.connection.transport());
        let registered = self
            .connection
            .request("register nodes", transport.register_nodes(node_ids))
            .await?;
        if registered.len() != node_ids.len() {
            return Err(OpcUaError::Transport(format!(
                "registered {} of {} nodes",
                registered.len(),
                node_ids.len()
            )));
        }
        debug!(count = registered.len(), "registered nodes");
        self.read_ids = registered;
        Ok(())
    }

    async fn read(&mut self) -> OpcUaResult<()> {
        let transport = Arc::clone(self.connection.transport());
        let values = self
            .connection
            .request("read", transport.read(&self.read_ids, READ_MAX_AGE_MS))
            .await?;
        if values.len() != self.read_ids.len() {
            return Err(OpcUaError::Transport(format!(
                "read returned {} values for {} nodes",
                values.len(),
                self.read_ids.len()
            )));
        }
        for (i, value) in values.iter().enumerate() {
            self.base.update_node_value(i, value);
        }
        Ok(())
    }
}

#[async_trait]
impl Acquisition for ReadClient {
    /// 建立会话、注册节点并读取一次
    async fn connect(&mut self) -> OpcUaResult<()> {
        self.connect_and_read().await
    }

    async fn stop(&mut self) -> OpcUaResult<()> {
        self.connection.disconnect().await
    }
}
