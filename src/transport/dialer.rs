use super::{Connection, ConnectionKind};
use crate::error::{Result, TunnelError};
use rustls::pki_types::ServerName;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::{rustls, TlsConnector};
use tracing::{debug, warn};

/// 出站方向的传输变体
#[derive(Clone)]
pub enum OutboundSecurity {
    /// 明文 TCP
    Plain,
    /// TLS 握手，按目标主机名校验服务器证书
    Tls(TlsConnector),
}

/// 出站拨号器
///
/// 每次调用 `connect` 只建立一条连接，不做重试
#[derive(Clone)]
pub struct Dialer {
    host: String,
    port: u16,
    security: OutboundSecurity,
    timeout: Option<Duration>,
}

impl Dialer {
    pub fn new(host: impl Into<String>, port: u16, security: OutboundSecurity) -> Self {
        Self {
            host: host.into(),
            port,
            security,
            timeout: None,
        }
    }

    /// 设置连接超时（包含 TLS 握手）
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// `host:port` 形式的目标地址
    pub fn target(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// 建立到目标的连接
    pub async fn connect(&self) -> Result<Connection> {
        let addr = self.target();
        match self.timeout {
            Some(duration) => match tokio::time::timeout(duration, self.connect_inner(&addr)).await
            {
                Ok(result) => result,
                Err(_) => Err(TunnelError::dial(
                    addr.clone(),
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect timed out after {:?}", duration),
                    ),
                )),
            },
            None => self.connect_inner(&addr).await,
        }
    }

    async fn connect_inner(&self, addr: &str) -> Result<Connection> {
        debug!("Connecting to {}", addr);

        let tcp_stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| TunnelError::dial(addr, e))?;

        if let Err(e) = tcp_stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let peer_addr = tcp_stream
            .peer_addr()
            .map_err(|e| TunnelError::dial(addr, e))?;
        let local_addr = tcp_stream
            .local_addr()
            .map_err(|e| TunnelError::dial(addr, e))?;

        match &self.security {
            OutboundSecurity::Plain => Ok(Connection::new(
                tcp_stream,
                ConnectionKind::Plain,
                peer_addr,
                local_addr,
            )),
            OutboundSecurity::Tls(connector) => {
                let server_name = ServerName::try_from(self.host.clone()).map_err(|e| {
                    TunnelError::dial(
                        addr,
                        io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("Invalid server name: {}", e),
                        ),
                    )
                })?;

                let tls_stream = connector
                    .connect(server_name, tcp_stream)
                    .await
                    .map_err(|e| TunnelError::dial(addr, e))?;

                debug!("TLS connection established to {}", addr);
                Ok(Connection::new(
                    tls_stream,
                    ConnectionKind::Tls,
                    peer_addr,
                    local_addr,
                ))
            }
        }
    }
}
