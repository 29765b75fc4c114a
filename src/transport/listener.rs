use super::{Connection, ConnectionKind};
use crate::error::{Result, TunnelError};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_rustls::{rustls, TlsAcceptor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 监听队列长度
pub const LISTEN_BACKLOG: i32 = 50;

/// 入站方向的传输变体
#[derive(Clone)]
pub enum InboundSecurity {
    /// 明文 TCP，不做认证
    Plain,
    /// TLS 握手；`require_peer_auth` 时握手配置必须强制校验客户端证书
    Tls {
        acceptor: TlsAcceptor,
        require_peer_auth: bool,
    },
}

impl InboundSecurity {
    fn kind(&self) -> ConnectionKind {
        match self {
            InboundSecurity::Plain => ConnectionKind::Plain,
            InboundSecurity::Tls { .. } => ConnectionKind::Tls,
        }
    }
}

/// 入站监听器
pub struct Listener {
    inner: Mutex<Option<TcpListener>>,
    security: InboundSecurity,
    local_addr: SocketAddr,
    handshake_timeout: Option<Duration>,
    closed: CancellationToken,
}

impl Listener {
    /// 绑定到 `endpoint`（`host:port`）
    pub async fn bind(endpoint: &str, security: InboundSecurity) -> Result<Self> {
        let addr = tokio::net::lookup_host(endpoint)
            .await
            .map_err(|e| TunnelError::bind(endpoint, e))?
            .next()
            .ok_or_else(|| {
                TunnelError::bind(
                    endpoint,
                    io::Error::new(io::ErrorKind::AddrNotAvailable, "address did not resolve"),
                )
            })?;

        let listener = bind_socket(addr).map_err(|e| TunnelError::bind(endpoint, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TunnelError::bind(endpoint, e))?;

        info!(
            "Listening on {} ({} transport)",
            local_addr,
            security.kind()
        );

        Ok(Self {
            inner: Mutex::new(Some(listener)),
            security,
            local_addr,
            handshake_timeout: None,
            closed: CancellationToken::new(),
        })
    }

    /// 设置入站 TLS 握手超时
    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// 等待下一个入站连接
    ///
    /// 监听器关闭后返回 [`TunnelError::ListenerClosed`]
    pub async fn accept(&self) -> Result<PendingConnection> {
        let guard = self.inner.lock().await;
        let listener = match guard.as_ref() {
            Some(listener) if !self.closed.is_cancelled() => listener,
            _ => return Err(TunnelError::ListenerClosed),
        };

        let (stream, peer_addr) = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(TunnelError::ListenerClosed),
            result = listener.accept() => result.map_err(TunnelError::Accept)?,
        };

        debug!("Accepted TCP connection from {}", peer_addr);

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }

        Ok(PendingConnection {
            stream,
            peer_addr,
            local_addr: self.local_addr,
            security: self.security.clone(),
            handshake_timeout: self.handshake_timeout,
        })
    }

    /// 关闭监听器，唤醒阻塞中的 `accept`
    pub async fn close(&self) {
        self.closed.cancel();
        if self.inner.lock().await.take().is_some() {
            info!("Listener on {} closed", self.local_addr);
        }
    }
}

fn bind_socket(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// 已接受、尚未完成握手的入站连接
///
/// 握手放在各连接自己的任务里完成，慢速对端不会阻塞 accept 循环
pub struct PendingConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    security: InboundSecurity,
    handshake_timeout: Option<Duration>,
}

impl PendingConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// 完成传输层协商；失败时连接随之关闭
    pub async fn establish(self) -> Result<Connection> {
        let Self {
            stream,
            peer_addr,
            local_addr,
            security,
            handshake_timeout,
        } = self;

        match security {
            InboundSecurity::Plain => Ok(Connection::new(
                stream,
                ConnectionKind::Plain,
                peer_addr,
                local_addr,
            )),
            InboundSecurity::Tls {
                acceptor,
                require_peer_auth,
            } => {
                let handshake = acceptor.accept(stream);
                let result = match handshake_timeout {
                    Some(duration) => match tokio::time::timeout(duration, handshake).await {
                        Ok(result) => result,
                        Err(_) => Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("handshake timed out after {:?}", duration),
                        )),
                    },
                    None => handshake.await,
                };

                let tls_stream = result
                    .map_err(|e| classify_handshake_error(peer_addr, require_peer_auth, e))?;

                debug!("TLS handshake completed with {}", peer_addr);
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

/// 区分客户端证书问题与其他握手失败
fn classify_handshake_error(
    peer: SocketAddr,
    require_peer_auth: bool,
    source: io::Error,
) -> TunnelError {
    let certificate_rejected = source
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .map(|e| {
            matches!(
                e,
                rustls::Error::NoCertificatesPresented | rustls::Error::InvalidCertificate(_)
            )
        })
        .unwrap_or(false);

    if require_peer_auth && certificate_rejected {
        TunnelError::PeerAuth { peer, source }
    } else {
        TunnelError::Handshake { peer, source }
    }
}
