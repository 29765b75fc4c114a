//! Common utilities for integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::rustls::{self, pki_types::ServerName, RootCertStore};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use ttls::tls::{self, build_client_config, build_server_config, CredentialProvider, Identity};
use ttls::{Result, TunnelConfig, TunnelService};

/// Names covered by every test certificate
pub fn test_names() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string()]
}

/// Self-signed identity that doubles as its own trust anchor
pub struct TestIdentity {
    pub identity: Identity,
}

impl Clone for TestIdentity {
    fn clone(&self) -> Self {
        Self {
            identity: Identity::new(self.identity.certs.clone(), self.identity.key.clone_key()),
        }
    }
}

impl TestIdentity {
    pub fn generate() -> Self {
        Self {
            identity: tls::generate_self_signed(&test_names())
                .expect("Failed to generate test certificate"),
        }
    }

    /// Root store trusting exactly this certificate
    pub fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots
            .add(self.identity.certs[0].clone())
            .expect("Failed to add test trust anchor");
        roots
    }
}

/// In-memory credential provider with explicit trust anchors
pub struct TestCredentials {
    /// Identity presented by the local end (server cert, or client cert when dialing)
    pub identity: Option<TestIdentity>,
    /// Anchors used to verify the remote TLS server
    pub server_roots: Option<RootCertStore>,
    /// Anchors used to verify client certificates
    pub client_roots: Option<RootCertStore>,
}

impl TestCredentials {
    /// Credentials for a ServerSide tunnel
    pub fn server(identity: TestIdentity) -> Self {
        Self {
            identity: Some(identity),
            server_roots: None,
            client_roots: None,
        }
    }

    /// ServerSide credentials that verify client certificates against `client_ca`
    pub fn server_with_client_ca(identity: TestIdentity, client_ca: &TestIdentity) -> Self {
        Self {
            identity: Some(identity),
            server_roots: None,
            client_roots: Some(client_ca.roots()),
        }
    }

    /// Credentials for a ClientSide tunnel trusting `server`
    pub fn client(server: &TestIdentity, identity: Option<TestIdentity>) -> Self {
        Self {
            identity,
            server_roots: Some(server.roots()),
            client_roots: None,
        }
    }
}

impl CredentialProvider for TestCredentials {
    fn server_config(&self, require_peer_auth: bool) -> Result<Arc<rustls::ServerConfig>> {
        let identity = self
            .identity
            .as_ref()
            .expect("server credentials need an identity");
        let client_roots = if require_peer_auth {
            self.client_roots.clone()
        } else {
            None
        };
        build_server_config(&identity.identity, client_roots)
    }

    fn client_config(&self) -> Result<Arc<rustls::ClientConfig>> {
        let roots = self.server_roots.clone().unwrap_or_else(RootCertStore::empty);
        build_client_config(roots, self.identity.as_ref().map(|id| &id.identity))
    }
}

/// Bind a service and run it in the background
pub async fn start_tunnel(
    config: TunnelConfig,
    credentials: &dyn CredentialProvider,
) -> (Arc<TunnelService>, tokio::task::JoinHandle<Result<()>>) {
    let service = Arc::new(
        TunnelService::bind(config, credentials)
            .await
            .expect("Failed to bind tunnel"),
    );
    let runner = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.run().await })
    };
    (service, runner)
}

/// Plaintext echo server; returns its address and a counter of accepted connections
pub async fn start_echo_server() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind echo server");
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    (addr, accepted)
}

/// TLS echo server using `identity`
pub async fn start_tls_echo_server(identity: &TestIdentity) -> SocketAddr {
    let config = build_server_config(&identity.identity, None).expect("Failed to build config");
    let acceptor = TlsAcceptor::from(config);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind TLS echo server");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(stream) = acceptor.accept(socket).await else {
                    return;
                };
                let (mut reader, mut writer) = tokio::io::split(stream);
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
                let _ = writer.shutdown().await;
            });
        }
    });

    addr
}

/// TLS client connection to a tunnel, optionally presenting `identity`
pub async fn connect_tls(
    addr: SocketAddr,
    trusted: &TestIdentity,
    identity: Option<&TestIdentity>,
) -> std::io::Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let config = build_client_config(trusted.roots(), identity.map(|id| &id.identity))
        .expect("Failed to build client config");
    let connector = TlsConnector::from(config);
    let stream = TcpStream::connect(addr).await?;
    let server_name = ServerName::try_from("localhost").unwrap();
    connector.connect(server_name, stream).await
}

/// Send `data` and read back the same number of bytes
pub async fn echo_roundtrip<S>(stream: &mut S, data: &[u8]) -> Vec<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(Duration::from_secs(5), async {
        stream.write_all(data).await.expect("Failed to write data");
        let mut response = vec![0u8; data.len()];
        stream
            .read_exact(&mut response)
            .await
            .expect("Failed to read response");
        response
    })
    .await
    .expect("Timeout waiting for response")
}

/// Wait until `condition` holds or the timeout elapses
pub async fn wait_until<F>(max_wait: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + max_wait;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Temporary PEM files removed on drop
pub struct TestCertFiles {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TestCertFiles {
    pub fn generate() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        let unique_id = format!(
            "{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        );
        let temp_dir = std::env::temp_dir();
        let cert_path = temp_dir.join(format!("ttls-test-cert-{}.pem", unique_id));
        let key_path = temp_dir.join(format!("ttls-test-key-{}.pem", unique_id));

        tls::generate_self_signed_cert("localhost", &test_names(), &cert_path, &key_path)
            .expect("Failed to generate test certificates");

        Self {
            cert_path,
            key_path,
        }
    }
}

impl Drop for TestCertFiles {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.cert_path);
        let _ = std::fs::remove_file(&self.key_path);
    }
}
