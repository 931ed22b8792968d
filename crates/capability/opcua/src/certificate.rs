//! 客户端证书：加载已有证书或生成自签名证书。

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rcgen::string::Ia5String;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, SanType,
};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::config::ClientConfig;
use crate::error::{OpcUaError, OpcUaResult};

/// 客户端应用名
pub const APPLICATION_NAME: &str = "opcua-agent";
/// 客户端应用 URI（写入证书 SAN）
pub const APPLICATION_URI: &str = "urn:opcua-agent:client";

const RSA_BITS: usize = 2048;
const VALIDITY_DAYS: i64 = 365;

/// 证书与私钥文件路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePair {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

/// PEM 编码的证书与私钥
pub struct GeneratedCertificate {
    pub certificate_pem: String,
    pub private_key_pem: String,
}

/// 自签名证书生成器
pub trait CertificateGenerator: Send + Sync {
    fn generate(&self, application_uri: &str, host: &str) -> OpcUaResult<GeneratedCertificate>;
}

/// 基于 rsa + rcgen 的 RSA-2048 自签名证书，有效期一年
#[derive(Debug, Default, Clone, Copy)]
pub struct RcgenCertificateGenerator;

impl CertificateGenerator for RcgenCertificateGenerator {
    fn generate(&self, application_uri: &str, host: &str) -> OpcUaResult<GeneratedCertificate> {
        let rsa_key = RsaPrivateKey::new(&mut rand_core::OsRng, RSA_BITS)
            .map_err(|e| OpcUaError::certificate("generate key", host, e))?;
        let key_pem = rsa_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| OpcUaError::certificate("encode key", host, e))?;
        let key_pair =
            KeyPair::from_pem(&key_pem).map_err(|e| OpcUaError::certificate("load key", host, e))?;

        let mut params = CertificateParams::new(vec![host.to_string()])
            .map_err(|e| OpcUaError::certificate("build params", host, e))?;
        let uri = Ia5String::try_from(application_uri)
            .map_err(|e| OpcUaError::certificate("build params", application_uri, e))?;
        params.subject_alt_names.push(SanType::URI(uri));

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, APPLICATION_NAME);
        dn.push(DnType::OrganizationName, APPLICATION_NAME);
        params.distinguished_name = dn;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::ContentCommitment,
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::DataEncipherment,
            KeyUsagePurpose::KeyCertSign,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + time::Duration::days(VALIDITY_DAYS);

        let certificate = params
            .self_signed(&key_pair)
            .map_err(|e| OpcUaError::certificate("self-sign", host, e))?;

        Ok(GeneratedCertificate {
            certificate_pem: certificate.pem(),
            private_key_pem: key_pair.serialize_pem(),
        })
    }
}

/// 证书供应：优先使用配置的证书，缺失时生成
///
/// 临时目录中生成的证书在供应器生命周期内复用，重连不会重复生成。
#[derive(Clone)]
pub struct CertificateProvisioner {
    generator: Arc<dyn CertificateGenerator>,
    application_uri: String,
    generated: Arc<Mutex<Option<CertificatePair>>>,
}

impl Default for CertificateProvisioner {
    fn default() -> Self {
        Self::new(Arc::new(RcgenCertificateGenerator))
    }
}

impl CertificateProvisioner {
    pub fn new(generator: Arc<dyn CertificateGenerator>) -> Self {
        Self {
            generator,
            application_uri: APPLICATION_URI.to_string(),
            generated: Arc::new(Mutex::new(None)),
        }
    }

    fn cached(&self) -> Option<CertificatePair> {
        self.generated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn remember(&self, pair: &CertificatePair) {
        *self.generated.lock().unwrap_or_else(|e| e.into_inner()) = Some(pair.clone());
    }

    /// 返回可用的证书路径；`required` 为 false 且未配置时返回 `None`
    pub async fn provision(
        &self,
        config: &ClientConfig,
        required: bool,
        host: &str,
    ) -> OpcUaResult<Option<CertificatePair>> {
        let mut temporary = false;
        let target = match (&config.certificate, &config.private_key) {
            (Some(certificate), Some(private_key)) => {
                let pair = CertificatePair {
                    certificate: certificate.clone(),
                    private_key: private_key.clone(),
                };
                if file_exists(certificate).await && file_exists(private_key).await {
                    return Ok(Some(pair));
                }
                pair
            }
            (None, None) => {
                if !required {
                    return Ok(None);
                }
                if let Some(pair) = self.cached()
                    && file_exists(&pair.certificate).await
                    && file_exists(&pair.private_key).await
                {
                    return Ok(Some(pair));
                }
                temporary = true;
                let dir = std::env::temp_dir().join(format!("ssc-{}", uuid::Uuid::new_v4()));
                CertificatePair {
                    certificate: dir.join("cert.pem"),
                    private_key: dir.join("key.pem"),
                }
            }
            _ => {
                return Err(OpcUaError::config(
                    "certificate and private_key must be set together",
                ));
            }
        };

        let generator = Arc::clone(&self.generator);
        let uri = self.application_uri.clone();
        let host_owned = host.to_string();
        let generated = tokio::task::spawn_blocking(move || generator.generate(&uri, &host_owned))
            .await
            .map_err(|e| OpcUaError::certificate("generate", host, e))??;

        write_pem(&target.certificate, &generated.certificate_pem, false).await?;
        write_pem(&target.private_key, &generated.private_key_pem, true).await?;
        if temporary {
            self.remember(&target);
        }

        info!(
            certificate = %target.certificate.display(),
            private_key = %target.private_key.display(),
            "generated self-signed client certificate"
        );
        Ok(Some(target))
    }
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn write_pem(path: &Path, pem: &str, private: bool) -> OpcUaResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| OpcUaError::certificate("create directory", parent.display(), e))?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if private {
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options
        .open(path)
        .await
        .map_err(|e| OpcUaError::certificate("write", path.display(), e))?;
    file.write_all(pem.as_bytes())
        .await
        .map_err(|e| OpcUaError::certificate("write", path.display(), e))?;
    file.flush()
        .await
        .map_err(|e| OpcUaError::certificate("write", path.display(), e))?;
    Ok(())
}
