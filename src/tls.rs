/// TLS 身份与信任锚
///
/// 隧道核心只通过 [`CredentialProvider`] 获取 rustls 配置，
/// 证书的签发与分发不在本模块的职责范围内
use crate::config::TlsFiles;
use crate::error::{Result, TunnelError};
use rcgen::generate_simple_self_signed;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::rustls;
use tracing::{debug, warn};

/// 证书链与私钥
pub struct Identity {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Identity {
    pub fn new(certs: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { certs, key }
    }

    fn clone_parts(&self) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        (self.certs.clone(), self.key.clone_key())
    }
}

/// 安全传输能力的提供者
///
/// 监听端与拨号端的 TLS 变体通过它拿到握手所需的配置
pub trait CredentialProvider: Send + Sync {
    /// 服务端配置；`require_peer_auth` 为真时必须强制校验客户端证书
    fn server_config(&self, require_peer_auth: bool) -> Result<Arc<rustls::ServerConfig>>;

    /// 客户端配置，用于校验远端服务器证书
    fn client_config(&self) -> Result<Arc<rustls::ClientConfig>>;
}

/// 构建服务端配置；提供 `client_roots` 时强制要求客户端证书
pub fn build_server_config(
    identity: &Identity,
    client_roots: Option<RootCertStore>,
) -> Result<Arc<rustls::ServerConfig>> {
    let (certs, key) = identity.clone_parts();
    let builder = rustls::ServerConfig::builder();

    let config = match client_roots {
        Some(roots) => {
            debug!(
                "Configuring TLS server with mandatory client certificates ({} trust anchors)",
                roots.len()
            );
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| {
                    TunnelError::credentials(format!("Failed to build client verifier: {}", e))
                })?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
        }
        None => builder.with_no_client_auth().with_single_cert(certs, key),
    }
    .map_err(|e| TunnelError::credentials(format!("Failed to create server config: {}", e)))?;

    Ok(Arc::new(config))
}

/// 构建客户端配置；提供 `identity` 时在握手中出示客户端证书
pub fn build_client_config(
    roots: RootCertStore,
    identity: Option<&Identity>,
) -> Result<Arc<rustls::ClientConfig>> {
    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);

    let config = match identity {
        Some(identity) => {
            let (certs, key) = identity.clone_parts();
            builder.with_client_auth_cert(certs, key).map_err(|e| {
                TunnelError::credentials(format!("Failed to configure client certificate: {}", e))
            })?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

/// 加载系统 CA 证书
pub fn native_root_store() -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    let native_certs = rustls_native_certs::load_native_certs();
    for err in &native_certs.errors {
        warn!("Failed to load a native certificate: {}", err);
    }

    let (added, ignored) = root_store.add_parsable_certificates(native_certs.certs);
    debug!(
        "Loaded {} system trust anchors ({} ignored)",
        added, ignored
    );

    if root_store.is_empty() {
        return Err(TunnelError::credentials(
            "No usable system CA certificates found",
        ));
    }
    Ok(root_store)
}

/// 从 PEM 文件加载证书
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        TunnelError::credentials(format!("Failed to open cert file {:?}: {}", path, e))
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            TunnelError::credentials(format!("Failed to parse certificates in {:?}: {}", path, e))
        })?;

    if certs.is_empty() {
        return Err(TunnelError::credentials(format!(
            "No certificates found in {:?}",
            path
        )));
    }
    Ok(certs)
}

/// 从 PEM 文件加载私钥
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| {
        TunnelError::credentials(format!("Failed to open key file {:?}: {}", path, e))
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            TunnelError::credentials(format!("Failed to parse private key in {:?}: {}", path, e))
        })?
        .ok_or_else(|| TunnelError::credentials(format!("No private key found in {:?}", path)))
}

/// 从 PEM 文件加载信任锚
pub fn load_root_store(path: &Path) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    let (added, _ignored) = root_store.add_parsable_certificates(load_certs(path)?);
    if added == 0 {
        return Err(TunnelError::credentials(format!(
            "No usable CA certificates in {:?}",
            path
        )));
    }
    Ok(root_store)
}

/// 基于 PEM 文件的凭据提供者
///
/// 客户端方向始终使用系统 CA 校验远端证书
#[derive(Debug, Clone, Default)]
pub struct PemCredentials {
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    ca_cert_path: Option<PathBuf>,
}

impl PemCredentials {
    pub fn new(files: &TlsFiles) -> Self {
        Self {
            cert_path: files.cert_path.clone(),
            key_path: files.key_path.clone(),
            ca_cert_path: files.ca_cert_path.clone(),
        }
    }

    fn identity(&self) -> Result<Option<Identity>> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Ok(Some(Identity::new(
                load_certs(cert)?,
                load_private_key(key)?,
            ))),
            (None, None) => Ok(None),
            _ => Err(TunnelError::credentials(
                "cert_path and key_path must both be set",
            )),
        }
    }
}

impl CredentialProvider for PemCredentials {
    fn server_config(&self, require_peer_auth: bool) -> Result<Arc<rustls::ServerConfig>> {
        let identity = self.identity()?.ok_or_else(|| {
            TunnelError::credentials("Server mode requires a certificate and private key")
        })?;

        let client_roots = if require_peer_auth {
            let ca_path = self.ca_cert_path.as_deref().ok_or_else(|| {
                TunnelError::credentials("Peer authentication requires a CA certificate")
            })?;
            Some(load_root_store(ca_path)?)
        } else {
            None
        };

        build_server_config(&identity, client_roots)
    }

    fn client_config(&self) -> Result<Arc<rustls::ClientConfig>> {
        let identity = self.identity()?;
        build_client_config(native_root_store()?, identity.as_ref())
    }
}

/// 生成自签名证书（内存中）
pub fn generate_self_signed(names: &[String]) -> Result<Identity> {
    let certified = generate_simple_self_signed(names.to_vec()).map_err(|e| {
        TunnelError::credentials(format!("Failed to generate self-signed certificate: {}", e))
    })?;
    let cert = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        certified.signing_key.serialize_der(),
    ));
    Ok(Identity::new(vec![cert], key))
}

/// 生成自签名证书和私钥并写入指定路径
pub fn generate_self_signed_cert(
    common_name: &str,
    alt_names: &[String],
    cert_out: &Path,
    key_out: &Path,
) -> Result<()> {
    // rcgen 至少需要一个 SAN；确保包含 CN
    let mut names: Vec<String> = if alt_names.is_empty() {
        vec![common_name.to_string()]
    } else {
        alt_names.to_vec()
    };

    if !names.iter().any(|n| n == common_name) {
        names.push(common_name.to_string());
    }

    let cert = generate_simple_self_signed(names).map_err(|e| {
        TunnelError::credentials(format!("Failed to generate self-signed certificate: {}", e))
    })?;

    std::fs::write(cert_out, cert.cert.pem())?;
    std::fs::write(key_out, cert.signing_key.serialize_pem())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["localhost".to_string(), "127.0.0.1".to_string()]
    }

    #[test]
    fn test_server_config_without_peer_auth() {
        let identity = generate_self_signed(&names()).unwrap();
        assert!(build_server_config(&identity, None).is_ok());
    }

    #[test]
    fn test_server_config_with_peer_auth() {
        let identity = generate_self_signed(&names()).unwrap();
        let client = generate_self_signed(&["tunnel-client".to_string()]).unwrap();

        let mut roots = RootCertStore::empty();
        roots.add(client.certs[0].clone()).unwrap();
        assert!(build_server_config(&identity, Some(roots)).is_ok());
    }

    #[test]
    fn test_peer_auth_with_empty_roots_is_rejected() {
        let identity = generate_self_signed(&names()).unwrap();
        let err = build_server_config(&identity, Some(RootCertStore::empty())).unwrap_err();
        assert!(matches!(err, TunnelError::Credentials(_)));
    }

    #[test]
    fn test_pem_round_trip_through_files() {
        let dir = std::env::temp_dir();
        let unique = format!("{}-{}", std::process::id(), uuid::Uuid::new_v4());
        let cert_path = dir.join(format!("ttls-unit-cert-{}.pem", unique));
        let key_path = dir.join(format!("ttls-unit-key-{}.pem", unique));

        generate_self_signed_cert("localhost", &[], &cert_path, &key_path).unwrap();

        let certs = load_certs(&cert_path).unwrap();
        assert_eq!(certs.len(), 1);
        assert!(load_private_key(&key_path).is_ok());
        assert_eq!(load_root_store(&cert_path).unwrap().len(), 1);

        let creds = PemCredentials::new(&TlsFiles {
            cert_path: Some(cert_path.clone()),
            key_path: Some(key_path.clone()),
            ca_cert_path: Some(cert_path.clone()),
        });
        assert!(creds.server_config(true).is_ok());

        let _ = std::fs::remove_file(cert_path);
        let _ = std::fs::remove_file(key_path);
    }

    #[test]
    fn test_server_config_requires_identity() {
        let creds = PemCredentials::default();
        assert!(creds.server_config(false).is_err());
    }

    #[test]
    fn test_missing_cert_file() {
        let err = load_certs(Path::new("/nonexistent/ttls-cert.pem")).unwrap_err();
        assert!(err.to_string().contains("Failed to open cert file"));
    }
}
