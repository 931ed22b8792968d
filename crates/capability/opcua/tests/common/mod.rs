#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_opcua::{
    CertificateGenerator, ClientConfig, Connection, DataChangeNotification, DataValue,
    EndpointDescription, GeneratedCertificate, MessageSecurityMode, MonitoredItemRequest,
    NotificationSender, OpcUaError, OpcUaResult, SecurityPolicy, SessionParams, UaTransport,
    UserTokenType, Variant,
};
use async_trait::async_trait;

/// 内存传输实现：记录调用并按脚本返回结果
#[derive(Default)]
pub struct MockTransport {
    endpoints: Mutex<Vec<EndpointDescription>>,
    reads: Mutex<VecDeque<OpcUaResult<Vec<DataValue>>>>,
    monitor_statuses: Mutex<Option<Vec<u32>>>,
    calls: Mutex<Vec<String>>,
    sessions: Mutex<Vec<SessionParams>>,
    read_ids: Mutex<Vec<Vec<String>>>,
    monitored: Mutex<Vec<MonitoredItemRequest>>,
    sink: Mutex<Option<NotificationSender>>,
    subscriptions: AtomicU32,
    live_items: Mutex<BTreeMap<u32, usize>>,
    fail_close: AtomicBool,
}

impl MockTransport {
    pub fn new(endpoints: Vec<EndpointDescription>) -> Arc<Self> {
        let mock = Self::default();
        *mock.endpoints.lock().unwrap() = endpoints;
        Arc::new(mock)
    }

    /// 只提供 None/None 匿名端点
    pub fn insecure() -> Arc<Self> {
        Self::new(vec![endpoint(
            SecurityPolicy::None,
            MessageSecurityMode::None,
            0,
        )])
    }

    pub fn push_read(&self, result: OpcUaResult<Vec<DataValue>>) {
        self.reads.lock().unwrap().push_back(result);
    }

    pub fn set_monitor_statuses(&self, statuses: Vec<u32>) {
        *self.monitor_statuses.lock().unwrap() = Some(statuses);
    }

    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    pub fn sessions(&self) -> Vec<SessionParams> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn read_ids(&self) -> Vec<Vec<String>> {
        self.read_ids.lock().unwrap().clone()
    }

    pub fn monitored(&self) -> Vec<MonitoredItemRequest> {
        self.monitored.lock().unwrap().clone()
    }

    /// 服务端仍存在的订阅及其监控项数量
    pub fn live_items(&self) -> BTreeMap<u32, usize> {
        self.live_items.lock().unwrap().clone()
    }

    /// 模拟服务端推送一条变更通知
    pub fn notify(&self, client_handle: u32, value: DataValue) -> bool {
        let sink = self.sink.lock().unwrap().clone();
        match sink {
            Some(sink) => sink.deliver(DataChangeNotification {
                client_handle,
                value,
            }),
            None => false,
        }
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl UaTransport for MockTransport {
    async fn get_endpoints(&self, _url: &str) -> OpcUaResult<Vec<EndpointDescription>> {
        self.record("get_endpoints");
        Ok(self.endpoints.lock().unwrap().clone())
    }

    async fn open_session(&self, params: &SessionParams) -> OpcUaResult<()> {
        self.record("open_session");
        self.sessions.lock().unwrap().push(params.clone());
        Ok(())
    }

    async fn close_session(&self) -> OpcUaResult<()> {
        self.record("close_session");
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(OpcUaError::Connection("close refused".to_string()));
        }
        Ok(())
    }

    async fn register_nodes(&self, node_ids: &[String]) -> OpcUaResult<Vec<String>> {
        self.record("register_nodes");
        Ok(node_ids.iter().map(|id| format!("registered:{id}")).collect())
    }

    async fn read(&self, node_ids: &[String], _max_age_ms: f64) -> OpcUaResult<Vec<DataValue>> {
        self.record("read");
        self.read_ids.lock().unwrap().push(node_ids.to_vec());
        match self.reads.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(node_ids
                .iter()
                .map(|_| DataValue::good(Variant::Double(1.0)))
                .collect()),
        }
    }

    async fn create_subscription(
        &self,
        _publishing_interval: Duration,
        sink: NotificationSender,
    ) -> OpcUaResult<u32> {
        self.record("create_subscription");
        *self.sink.lock().unwrap() = Some(sink);
        let id = 7 + self.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.live_items.lock().unwrap().insert(id, 0);
        Ok(id)
    }

    async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: &[MonitoredItemRequest],
    ) -> OpcUaResult<Vec<u32>> {
        self.record("create_monitored_items");
        *self
            .live_items
            .lock()
            .unwrap()
            .entry(subscription_id)
            .or_default() += items.len();
        self.monitored.lock().unwrap().extend_from_slice(items);
        Ok(self
            .monitor_statuses
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| vec![0; items.len()]))
    }

    async fn delete_subscription(&self, subscription_id: u32) -> OpcUaResult<()> {
        self.record("delete_subscription");
        self.live_items.lock().unwrap().remove(&subscription_id);
        *self.sink.lock().unwrap() = None;
        Ok(())
    }
}

/// 不做 RSA 运算的证书生成器
pub struct FakeGenerator;

impl CertificateGenerator for FakeGenerator {
    fn generate(&self, application_uri: &str, host: &str) -> OpcUaResult<GeneratedCertificate> {
        Ok(GeneratedCertificate {
            certificate_pem: format!("CERT {application_uri} {host}\n"),
            private_key_pem: "KEY\n".to_string(),
        })
    }
}

pub fn endpoint(policy: SecurityPolicy, mode: MessageSecurityMode, level: u8) -> EndpointDescription {
    EndpointDescription {
        endpoint_url: "opc.tcp://plc.local:4840".to_string(),
        security_policy_uri: policy.uri(),
        security_mode: mode,
        security_level: level,
        user_identity_tokens: vec![UserTokenType::Anonymous, UserTokenType::UserName],
    }
}

pub fn connection(config: ClientConfig, transport: Arc<MockTransport>) -> Connection {
    Connection::new(config, transport)
        .expect("connection")
        .with_certificate_generator(Arc::new(FakeGenerator))
}

/// 单个 double 值
pub fn double(value: f64) -> DataValue {
    DataValue::good(Variant::Double(value))
}
