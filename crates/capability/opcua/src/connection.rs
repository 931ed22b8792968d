//! 连接生命周期：端点协商、证书供应、会话建立与关闭。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::certificate::{
    APPLICATION_NAME, APPLICATION_URI, CertificateGenerator, CertificatePair,
    CertificateProvisioner,
};
use crate::config::ClientConfig;
use crate::endpoint::EndpointNegotiator;
use crate::error::{OpcUaError, OpcUaResult};
use crate::transport::{IdentityToken, SessionParams, UaTransport};
use crate::types::{ConnectionState, EffectiveSecurity, UserTokenType};

/// 单个端点的连接
///
/// `connect`/`disconnect` 与读取、订阅操作由调用方串行调用。
pub struct Connection {
    config: ClientConfig,
    transport: Arc<dyn UaTransport>,
    negotiator: EndpointNegotiator,
    provisioner: CertificateProvisioner,
    state: ConnectionState,
    has_session: bool,
    effective: Option<EffectiveSecurity>,
}

impl Connection {
    pub fn new(config: ClientConfig, transport: Arc<dyn UaTransport>) -> OpcUaResult<Self> {
        config.validate()?;
        let negotiator = EndpointNegotiator::from_config(&config)?;
        Ok(Self {
            config,
            transport,
            negotiator,
            provisioner: CertificateProvisioner::default(),
            state: ConnectionState::Closed,
            has_session: false,
            effective: None,
        })
    }

    /// 替换证书生成器
    pub fn with_certificate_generator(mut self, generator: Arc<dyn CertificateGenerator>) -> Self {
        self.provisioner = CertificateProvisioner::new(generator);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 最近一次协商生效的安全参数
    pub fn effective_security(&self) -> Option<EffectiveSecurity> {
        self.effective
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn UaTransport> {
        &self.transport
    }

    /// 带请求超时执行传输操作
    pub async fn request<T, F>(&self, operation: &str, fut: F) -> OpcUaResult<T>
    where
        F: Future<Output = OpcUaResult<T>>,
    {
        with_timeout(self.config.request_timeout(), operation, fut).await
    }

    /// 建立连接；已有会话先关闭，关闭失败只记录日志
    pub async fn connect(&mut self) -> OpcUaResult<()> {
        let url = self.config.endpoint_url()?;

        if self.has_session {
            if let Err(e) = self.transport.close_session().await {
                warn!(endpoint = %url, error = %e, "failed to close stale session");
            }
            self.has_session = false;
        }

        self.state = match self.state {
            ConnectionState::Disconnected => ConnectionState::Reconnecting,
            _ => ConnectionState::Connecting,
        };
        debug!(endpoint = %url, state = %self.state, "connecting");

        let timeout = self.config.connect_timeout();
        match with_timeout(timeout, "connect", self.establish(&url)).await {
            Ok(security) => {
                self.state = ConnectionState::Connected;
                self.has_session = true;
                self.effective = Some(security);
                info!(
                    endpoint = %url,
                    policy = %security.policy,
                    mode = %security.mode,
                    token = %security.token,
                    "connected"
                );
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn establish(&self, url: &Url) -> OpcUaResult<EffectiveSecurity> {
        let endpoints = self.transport.get_endpoints(url.as_str()).await?;

        let host = url.host_str().unwrap_or("localhost");
        let certificate = self
            .provisioner
            .provision(&self.config, self.negotiator.needs_certificate(), host)
            .await?;

        let negotiated = self
            .negotiator
            .negotiate(&endpoints, &self.config.auth_method)?;
        let identity = self.identity(negotiated.security.token, certificate.as_ref())?;

        let params = SessionParams {
            endpoint: negotiated.endpoint,
            identity,
            certificate,
            application_name: APPLICATION_NAME.to_string(),
            application_uri: APPLICATION_URI.to_string(),
            session_timeout_ms: self.config.session_timeout_ms,
        };
        self.transport.open_session(&params).await?;
        Ok(negotiated.security)
    }

    fn identity(
        &self,
        token: UserTokenType,
        certificate: Option<&CertificatePair>,
    ) -> OpcUaResult<IdentityToken> {
        let missing = |what: &str| OpcUaError::Authentication {
            method: token.to_string(),
            reason: format!("{what} not configured"),
        };
        let identity = match token {
            UserTokenType::Anonymous => IdentityToken::Anonymous,
            UserTokenType::UserName => {
                let username = self.config.username.as_ref().ok_or_else(|| missing("username"))?;
                let password = self.config.password.clone().ok_or_else(|| missing("password"))?;
                IdentityToken::UserName {
                    username: username.expose().to_string(),
                    password,
                }
            }
            UserTokenType::Certificate => {
                let pair = certificate.ok_or_else(|| missing("certificate"))?;
                IdentityToken::X509 {
                    certificate: pair.certificate.clone(),
                    private_key: pair.private_key.clone(),
                }
            }
            UserTokenType::IssuedToken => IdentityToken::IssuedToken(
                self.config
                    .issued_token
                    .clone()
                    .ok_or_else(|| missing("issued_token"))?,
            ),
        };
        Ok(identity)
    }

    /// 主动关闭连接，状态变为 `Closed`
    pub async fn disconnect(&mut self) -> OpcUaResult<()> {
        let result = self.close().await;
        self.state = ConnectionState::Closed;
        result
    }

    /// 故障后丢弃会话，状态变为 `Disconnected`，下次使用时重连
    pub async fn reset(&mut self) -> OpcUaResult<()> {
        let result = self.close().await;
        self.state = ConnectionState::Disconnected;
        result
    }

    async fn close(&mut self) -> OpcUaResult<()> {
        if !self.has_session {
            return Ok(());
        }
        self.has_session = false;
        self.transport.close_session().await
    }
}

async fn with_timeout<T, F>(timeout: Duration, operation: &str, fut: F) -> OpcUaResult<T>
where
    F: Future<Output = OpcUaResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(OpcUaError::Timeout(format!(
            "{operation} exceeded {} ms",
            timeout.as_millis()
        ))),
    }
}
