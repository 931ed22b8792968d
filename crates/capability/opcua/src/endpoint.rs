//! 端点协商：选择服务端端点并解析认证方式。

use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{OpcUaError, OpcUaResult};
use crate::types::{
    EffectiveSecurity, EndpointDescription, MessageSecurityMode, ModeChoice, PolicyChoice,
    SecurityPolicy, UserTokenType,
};

/// 协商结果
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiated {
    pub endpoint: EndpointDescription,
    pub security: EffectiveSecurity,
}

/// 端点协商器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointNegotiator {
    policy: PolicyChoice,
    mode: ModeChoice,
}

impl EndpointNegotiator {
    /// 策略或模式任一为 None 时两者同时为 None
    pub fn new(policy: PolicyChoice, mode: ModeChoice) -> Self {
        let none_policy = PolicyChoice::Fixed(SecurityPolicy::None);
        let none_mode = ModeChoice::Fixed(MessageSecurityMode::None);
        if policy == none_policy || mode == none_mode {
            return Self {
                policy: none_policy,
                mode: none_mode,
            };
        }
        Self { policy, mode }
    }

    pub fn from_config(config: &ClientConfig) -> OpcUaResult<Self> {
        Ok(Self::new(config.policy()?, config.mode()?))
    }

    pub fn policy(&self) -> PolicyChoice {
        self.policy
    }

    pub fn mode(&self) -> ModeChoice {
        self.mode
    }

    /// 是否可能需要客户端证书（非 None 或自动）
    pub fn needs_certificate(&self) -> bool {
        self.policy != PolicyChoice::Fixed(SecurityPolicy::None)
            || self.mode != ModeChoice::Fixed(MessageSecurityMode::None)
    }

    /// 按策略/模式选择端点
    ///
    /// 策略 URI 无法识别或模式无效的端点不参与选择。
    pub fn select(&self, endpoints: &[EndpointDescription]) -> OpcUaResult<EndpointDescription> {
        let usable: Vec<&EndpointDescription> =
            endpoints.iter().filter(|ep| is_usable(ep)).collect();
        let candidates = usable.iter().copied();
        let selected = match (self.policy, self.mode) {
            (PolicyChoice::Auto, ModeChoice::Auto) => {
                candidates.max_by_key(|ep| (ep.security_mode, ep.security_level))
            }
            (PolicyChoice::Auto, ModeChoice::Fixed(mode)) => candidates
                .filter(|ep| ep.security_mode == mode)
                .max_by_key(|ep| ep.security_level),
            (PolicyChoice::Fixed(policy), ModeChoice::Auto) => candidates
                .filter(|ep| ep.security_policy() == Some(policy))
                .max_by_key(|ep| ep.security_level),
            (PolicyChoice::Fixed(policy), ModeChoice::Fixed(mode)) => candidates
                .filter(|ep| ep.security_policy() == Some(policy) && ep.security_mode == mode)
                .max_by_key(|ep| ep.security_level),
        };

        selected.cloned().ok_or_else(|| OpcUaError::EndpointNotFound {
            policy: self.policy.to_string(),
            mode: self.mode.to_string(),
            reason: if endpoints.is_empty() {
                "server advertised no endpoints".to_string()
            } else {
                format!("none of {} advertised endpoints match", endpoints.len())
            },
        })
    }

    /// 选择端点、解析认证方式并确认端点支持该令牌类型
    pub fn negotiate(
        &self,
        endpoints: &[EndpointDescription],
        auth_method: &str,
    ) -> OpcUaResult<Negotiated> {
        let endpoint = self.select(endpoints)?;
        let token = resolve_auth(auth_method);

        let mut policy = endpoint.security_policy().ok_or_else(|| {
            OpcUaError::InvalidSecurityPolicy(endpoint.security_policy_uri.clone())
        })?;
        let mut mode = endpoint.security_mode;
        if policy == SecurityPolicy::None || mode == MessageSecurityMode::None {
            policy = SecurityPolicy::None;
            mode = MessageSecurityMode::None;
        }

        if self.policy != PolicyChoice::Fixed(policy) || self.mode != ModeChoice::Fixed(mode) {
            info!(
                configured_policy = %self.policy,
                configured_mode = %self.mode,
                policy = %policy,
                mode = %mode,
                "using security settings advertised by endpoint"
            );
        }

        if !endpoint.offers(token) {
            return Err(OpcUaError::Authentication {
                method: token.to_string(),
                reason: format!(
                    "endpoint {} ({policy}, {mode}) does not offer this token type",
                    endpoint.endpoint_url
                ),
            });
        }

        info!(
            endpoint = %endpoint.endpoint_url,
            policy = %policy,
            mode = %mode,
            level = endpoint.security_level,
            token = %token,
            "selected endpoint"
        );

        Ok(Negotiated {
            endpoint,
            security: EffectiveSecurity {
                policy,
                mode,
                token,
            },
        })
    }
}

fn is_usable(ep: &EndpointDescription) -> bool {
    let usable =
        ep.security_policy().is_some() && ep.security_mode != MessageSecurityMode::Invalid;
    if !usable {
        debug!(
            endpoint = %ep.endpoint_url,
            policy = %ep.security_policy_uri,
            mode = %ep.security_mode,
            "skipping endpoint with unsupported security settings"
        );
    }
    usable
}

/// 认证方式映射为令牌类型，未知值回退为 Anonymous
pub fn resolve_auth(method: &str) -> UserTokenType {
    match method.trim().to_ascii_lowercase().as_str() {
        "" | "anonymous" => UserTokenType::Anonymous,
        "username" => UserTokenType::UserName,
        "certificate" => UserTokenType::Certificate,
        "issuedtoken" => UserTokenType::IssuedToken,
        _ => {
            warn!(auth_method = %method, "unknown auth method, using Anonymous");
            UserTokenType::Anonymous
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(policy: SecurityPolicy, mode: MessageSecurityMode, level: u8) -> EndpointDescription {
        EndpointDescription {
            endpoint_url: "opc.tcp://plc:4840".to_string(),
            security_policy_uri: policy.uri(),
            security_mode: mode,
            security_level: level,
            user_identity_tokens: vec![UserTokenType::Anonymous],
        }
    }

    #[test]
    fn none_forces_both() {
        let negotiator = EndpointNegotiator::new(
            PolicyChoice::Auto,
            ModeChoice::Fixed(MessageSecurityMode::None),
        );
        assert_eq!(negotiator.policy(), PolicyChoice::Fixed(SecurityPolicy::None));
        assert!(!negotiator.needs_certificate());

        let negotiator = EndpointNegotiator::new(
            PolicyChoice::Fixed(SecurityPolicy::None),
            ModeChoice::Fixed(MessageSecurityMode::Sign),
        );
        assert_eq!(
            negotiator.mode(),
            ModeChoice::Fixed(MessageSecurityMode::None)
        );
    }

    #[test]
    fn auto_ties_prefer_later_endpoint() {
        let mut first = endpoint(SecurityPolicy::Basic256, MessageSecurityMode::Sign, 3);
        first.endpoint_url = "opc.tcp://first:4840".to_string();
        let second = endpoint(SecurityPolicy::Basic256Sha256, MessageSecurityMode::Sign, 3);
        let negotiator = EndpointNegotiator::new(PolicyChoice::Auto, ModeChoice::Auto);
        let selected = negotiator.select(&[first, second.clone()]).expect("select");
        assert_eq!(selected, second);
    }

    #[test]
    fn fixed_policy_picks_highest_level() {
        let endpoints = [
            endpoint(SecurityPolicy::Basic256Sha256, MessageSecurityMode::Sign, 2),
            endpoint(SecurityPolicy::Basic256Sha256, MessageSecurityMode::SignAndEncrypt, 9),
            endpoint(SecurityPolicy::Basic256, MessageSecurityMode::SignAndEncrypt, 20),
        ];
        let negotiator = EndpointNegotiator::new(
            PolicyChoice::Fixed(SecurityPolicy::Basic256Sha256),
            ModeChoice::Auto,
        );
        let selected = negotiator.select(&endpoints).expect("select");
        assert_eq!(selected.security_level, 9);
    }

    #[test]
    fn empty_endpoint_list_fails() {
        let negotiator = EndpointNegotiator::new(PolicyChoice::Auto, ModeChoice::Auto);
        assert!(matches!(
            negotiator.select(&[]),
            Err(OpcUaError::EndpointNotFound { .. })
        ));
    }

    #[test]
    fn auth_resolution() {
        assert_eq!(resolve_auth("UserName"), UserTokenType::UserName);
        assert_eq!(resolve_auth("Certificate"), UserTokenType::Certificate);
        assert_eq!(resolve_auth("IssuedToken"), UserTokenType::IssuedToken);
        assert_eq!(resolve_auth(""), UserTokenType::Anonymous);
        assert_eq!(resolve_auth("kerberos"), UserTokenType::Anonymous);
    }

    #[test]
    fn token_must_be_offered() {
        let endpoints = [endpoint(SecurityPolicy::None, MessageSecurityMode::None, 0)];
        let negotiator = EndpointNegotiator::new(PolicyChoice::Auto, ModeChoice::Auto);
        let err = negotiator
            .negotiate(&endpoints, "UserName")
            .expect_err("username not offered");
        assert!(matches!(err, OpcUaError::Authentication { method, .. } if method == "UserName"));
    }
}
