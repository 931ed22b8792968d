//! 基于 async-opcua 的 `UaTransport` 实现。

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opcua::{
    client::{
        ClientBuilder, IdentityToken as UaIdentityToken, MonitoredItem, Session,
        SubscriptionCallbacks,
    },
    types::{
        enums::{DataChangeTrigger as UaDataChangeTrigger, MonitoringMode, UserTokenType as UaUserTokenType},
        DataChangeFilter as UaDataChangeFilter, DataValue as UaDataValue,
        EndpointDescription as UaEndpointDescription, ExtensionObject,
        MessageSecurityMode as UaMessageSecurityMode, MonitoredItemCreateRequest,
        MonitoringParameters as UaMonitoringParameters, NodeId, ReadValueId, StatusCode,
        TimestampsToReturn, Variant as UaVariant,
    },
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::certificate::{APPLICATION_NAME, APPLICATION_URI};
use crate::error::{OpcUaError, OpcUaResult};
use crate::node::DataChangeTrigger;
use crate::status::STATUS_GOOD;
use crate::transport::{
    IdentityToken, MonitoredItemRequest, NotificationSender, SessionParams, UaTransport,
};
use crate::types::{
    DataChangeNotification, DataValue, EndpointDescription, MessageSecurityMode, UserTokenType,
    Variant,
};

/// 订阅保活与生命周期计数（与常见客户端默认值一致）
const LIFETIME_COUNT: u32 = 60;
const MAX_KEEP_ALIVE_COUNT: u32 = 20;

struct ActiveSession {
    session: Arc<Session>,
    event_loop: JoinHandle<StatusCode>,
}

#[derive(Default)]
struct Inner {
    discovered: Vec<UaEndpointDescription>,
    active: Option<ActiveSession>,
}

/// async-opcua 会话适配
pub struct OpcUaSessionTransport {
    pki_dir: PathBuf,
    inner: Mutex<Inner>,
}

impl Default for OpcUaSessionTransport {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("opcua-agent-pki"))
    }
}

impl OpcUaSessionTransport {
    pub fn new(pki_dir: impl Into<PathBuf>) -> Self {
        Self {
            pki_dir: pki_dir.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn builder(&self, application_name: &str, application_uri: &str) -> ClientBuilder {
        ClientBuilder::new()
            .application_name(application_name)
            .application_uri(application_uri)
            .pki_dir(self.pki_dir.clone())
            .session_retry_limit(0)
            .trust_server_certs(true)
            .create_sample_keypair(false)
    }

    async fn session(&self) -> OpcUaResult<Arc<Session>> {
        self.inner
            .lock()
            .await
            .active
            .as_ref()
            .map(|active| Arc::clone(&active.session))
            .ok_or(OpcUaError::NotConnected)
    }
}

#[async_trait]
impl UaTransport for OpcUaSessionTransport {
    async fn get_endpoints(&self, url: &str) -> OpcUaResult<Vec<EndpointDescription>> {
        let client = self
            .builder(APPLICATION_NAME, APPLICATION_URI)
            .client()
            .map_err(|e| OpcUaError::Connection(format!("build client: {e:?}")))?;
        let endpoints = client
            .get_server_endpoints_from_url(url)
            .await
            .map_err(|e| OpcUaError::Connection(format!("get endpoints from {url}: {e}")))?;

        for ep in &endpoints {
            debug!(
                endpoint = %ep.endpoint_url,
                policy = %ep.security_policy_uri,
                mode = ?ep.security_mode,
                level = ep.security_level,
                "discovered endpoint"
            );
        }
        let converted = endpoints.iter().map(endpoint_from_ua).collect();
        self.inner.lock().await.discovered = endpoints;
        Ok(converted)
    }

    async fn open_session(&self, params: &SessionParams) -> OpcUaResult<()> {
        let mut builder = self.builder(&params.application_name, &params.application_uri);
        if params.session_timeout_ms > 0 {
            builder = builder.session_timeout(u32::try_from(params.session_timeout_ms).unwrap_or(u32::MAX));
        }
        if let Some(pair) = &params.certificate {
            builder = builder
                .certificate_path(pair.certificate.clone())
                .private_key_path(pair.private_key.clone());
        }
        let mut client = builder
            .client()
            .map_err(|e| OpcUaError::Connection(format!("build client: {e:?}")))?;
        let identity = identity_to_ua(&params.identity)?;

        let endpoint = {
            let inner = self.inner.lock().await;
            inner
                .discovered
                .iter()
                .find(|ep| endpoint_matches(ep, &params.endpoint))
                .cloned()
        }
        .ok_or_else(|| {
            OpcUaError::Connection(format!(
                "endpoint {} was not discovered",
                params.endpoint.endpoint_url
            ))
        })?;

        let (session, event_loop) = client
            .connect_to_endpoint_directly(endpoint, identity)
            .map_err(|e| OpcUaError::Connection(format!("connect: {e}")))?;
        let event_loop = event_loop.spawn();
        if !session.wait_for_connection().await {
            event_loop.abort();
            return Err(OpcUaError::Connection(
                "session did not become active".to_string(),
            ));
        }

        info!(endpoint = %params.endpoint.endpoint_url, "session activated");
        self.inner.lock().await.active = Some(ActiveSession {
            session,
            event_loop,
        });
        Ok(())
    }

    async fn close_session(&self) -> OpcUaResult<()> {
        let active = self.inner.lock().await.active.take();
        let Some(active) = active else {
            return Ok(());
        };
        let result = active.session.disconnect().await;
        active.event_loop.abort();
        result.map_err(|e| OpcUaError::Connection(format!("disconnect: {e}")))
    }

    async fn register_nodes(&self, node_ids: &[String]) -> OpcUaResult<Vec<String>> {
        let session = self.session().await?;
        let nodes = parse_node_ids(node_ids)?;
        let registered = session
            .register_nodes(&nodes)
            .await
            .map_err(|e| OpcUaError::Transport(format!("register nodes: {e}")))?;
        Ok(registered.iter().map(|n| n.to_string()).collect())
    }

    async fn read(&self, node_ids: &[String], max_age_ms: f64) -> OpcUaResult<Vec<DataValue>> {
        let session = self.session().await?;
        let reads: Vec<ReadValueId> = parse_node_ids(node_ids)?
            .into_iter()
            .map(ReadValueId::new_value)
            .collect();
        let values = session
            .read(&reads, TimestampsToReturn::Both, max_age_ms)
            .await
            .map_err(|e| OpcUaError::Transport(format!("read: {e}")))?;
        Ok(values.into_iter().map(data_value_from_ua).collect())
    }

    async fn create_subscription(
        &self,
        publishing_interval: Duration,
        sink: NotificationSender,
    ) -> OpcUaResult<u32> {
        let session = self.session().await?;
        let callbacks = SubscriptionCallbacks::new(
            |_status| {},
            move |dv: UaDataValue, item: &MonitoredItem| {
                sink.deliver(DataChangeNotification {
                    client_handle: item.client_handle(),
                    value: data_value_from_ua(dv),
                });
            },
            |_event, _item| {},
        );
        session
            .create_subscription(
                publishing_interval,
                LIFETIME_COUNT,
                MAX_KEEP_ALIVE_COUNT,
                0,
                0,
                true,
                callbacks,
            )
            .await
            .map_err(|e| OpcUaError::Transport(format!("create subscription: {e}")))
    }

    async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: &[MonitoredItemRequest],
    ) -> OpcUaResult<Vec<u32>> {
        let session = self.session().await?;
        let mut requests = Vec::with_capacity(items.len());
        for item in items {
            let node = NodeId::from_str(&item.node_id)
                .map_err(|e| OpcUaError::MonitoredItem {
                    node: item.node_id.clone(),
                    reason: e.to_string(),
                })?;
            let filter = match &item.filter {
                Some(f) => ExtensionObject::from_message(UaDataChangeFilter {
                    trigger: match f.trigger {
                        DataChangeTrigger::Status => UaDataChangeTrigger::Status,
                        DataChangeTrigger::StatusValue => UaDataChangeTrigger::StatusValue,
                        DataChangeTrigger::StatusValueTimestamp => {
                            UaDataChangeTrigger::StatusValueTimestamp
                        }
                    },
                    deadband_type: f.deadband_type as u32,
                    deadband_value: f.deadband_value,
                }),
                None => Default::default(),
            };
            requests.push(MonitoredItemCreateRequest {
                item_to_monitor: ReadValueId::new_value(node),
                monitoring_mode: MonitoringMode::Reporting,
                requested_parameters: UaMonitoringParameters {
                    client_handle: item.client_handle,
                    sampling_interval: item.sampling_interval_ms,
                    filter,
                    queue_size: item.queue_size,
                    discard_oldest: item.discard_oldest,
                },
            });
        }

        let results = session
            .create_monitored_items(subscription_id, TimestampsToReturn::Both, requests)
            .await
            .map_err(|e| OpcUaError::Transport(format!("create monitored items: {e}")))?;
        Ok(results
            .into_iter()
            .map(|res| res.status_code.bits())
            .collect())
    }

    async fn delete_subscription(&self, subscription_id: u32) -> OpcUaResult<()> {
        let session = self.session().await?;
        session
            .delete_subscription(subscription_id)
            .await
            .map(|_| ())
            .map_err(|e| OpcUaError::Transport(format!("delete subscription: {e}")))
    }
}

fn parse_node_ids(node_ids: &[String]) -> OpcUaResult<Vec<NodeId>> {
    node_ids
        .iter()
        .map(|id| {
            NodeId::from_str(id)
                .map_err(|e| OpcUaError::Transport(format!("invalid node id {id}: {e}")))
        })
        .collect()
}

fn endpoint_matches(ua: &UaEndpointDescription, wanted: &EndpointDescription) -> bool {
    ua.endpoint_url.as_ref() == wanted.endpoint_url
        && ua.security_policy_uri.as_ref() == wanted.security_policy_uri
        && mode_from_ua(ua.security_mode) == wanted.security_mode
}

fn mode_from_ua(mode: UaMessageSecurityMode) -> MessageSecurityMode {
    match mode {
        UaMessageSecurityMode::None => MessageSecurityMode::None,
        UaMessageSecurityMode::Sign => MessageSecurityMode::Sign,
        UaMessageSecurityMode::SignAndEncrypt => MessageSecurityMode::SignAndEncrypt,
        _ => MessageSecurityMode::Invalid,
    }
}

fn endpoint_from_ua(ep: &UaEndpointDescription) -> EndpointDescription {
    EndpointDescription {
        endpoint_url: ep.endpoint_url.as_ref().to_string(),
        security_policy_uri: ep.security_policy_uri.as_ref().to_string(),
        security_mode: mode_from_ua(ep.security_mode),
        security_level: ep.security_level,
        user_identity_tokens: ep
            .user_identity_tokens
            .iter()
            .flatten()
            .filter_map(|policy| match policy.token_type {
                UaUserTokenType::Anonymous => Some(UserTokenType::Anonymous),
                UaUserTokenType::UserName => Some(UserTokenType::UserName),
                UaUserTokenType::Certificate => Some(UserTokenType::Certificate),
                UaUserTokenType::IssuedToken => Some(UserTokenType::IssuedToken),
                #[allow(unreachable_patterns)]
                _ => None,
            })
            .collect(),
    }
}

/// 协议库会话只接受匿名、用户名与 X509 文件路径三种身份
fn identity_to_ua(identity: &IdentityToken) -> OpcUaResult<UaIdentityToken> {
    match identity {
        IdentityToken::Anonymous => Ok(UaIdentityToken::Anonymous),
        IdentityToken::UserName { username, password } => Ok(UaIdentityToken::UserName(
            username.clone(),
            password.expose().to_string(),
        )),
        IdentityToken::X509 {
            certificate,
            private_key,
        } => Ok(UaIdentityToken::X509(
            certificate.clone(),
            private_key.clone(),
        )),
        IdentityToken::IssuedToken(_) => Err(OpcUaError::Authentication {
            method: UserTokenType::IssuedToken.to_string(),
            reason: "issued tokens are not supported by the session transport".to_string(),
        }),
    }
}

fn data_value_from_ua(dv: UaDataValue) -> DataValue {
    DataValue {
        status: dv.status.map(|s| s.bits()).unwrap_or(STATUS_GOOD),
        source_timestamp: dv.source_timestamp.map(|t| t.as_chrono()),
        server_timestamp: dv.server_timestamp.map(|t| t.as_chrono()),
        value: dv.value.map(variant_from_ua),
    }
}

fn variant_from_ua(value: UaVariant) -> Variant {
    match value {
        UaVariant::Empty => Variant::Empty,
        UaVariant::Boolean(v) => Variant::Boolean(v),
        UaVariant::SByte(v) => Variant::SByte(v),
        UaVariant::Byte(v) => Variant::Byte(v),
        UaVariant::Int16(v) => Variant::Int16(v),
        UaVariant::UInt16(v) => Variant::UInt16(v),
        UaVariant::Int32(v) => Variant::Int32(v),
        UaVariant::UInt32(v) => Variant::UInt32(v),
        UaVariant::Int64(v) => Variant::Int64(v),
        UaVariant::UInt64(v) => Variant::UInt64(v),
        UaVariant::Float(v) => Variant::Float(v),
        UaVariant::Double(v) => Variant::Double(v),
        UaVariant::String(v) => Variant::String(v.as_ref().to_string()),
        UaVariant::DateTime(v) => Variant::DateTime(v.as_chrono()),
        UaVariant::Guid(v) => Variant::Guid(v.to_string()),
        UaVariant::ByteString(v) => Variant::ByteString(v.value.unwrap_or_default()),
        UaVariant::StatusCode(v) => Variant::StatusCode(v.bits()),
        UaVariant::LocalizedText(v) => Variant::String(v.text.as_ref().to_string()),
        UaVariant::Array(array) => {
            Variant::Array(array.values.into_iter().map(variant_from_ua).collect())
        }
        other => Variant::String(format!("{other:?}")),
    }
}
