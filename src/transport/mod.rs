mod dialer;
mod factory;
mod listener;

pub use dialer::{Dialer, OutboundSecurity};
pub use factory::{create_dialer, create_listener, TransportVariant};
pub use listener::{InboundSecurity, Listener, PendingConnection, LISTEN_BACKLOG};

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::debug;

/// 关闭连接时等待对端确认的最长时间
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// 传输层连接抽象
///
/// 统一封装明文 TCP 与 TLS 两种连接
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

// 为所有满足条件的类型自动实现 Transport
impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// 连接类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Plain,
    Tls,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionKind::Plain => write!(f, "plain"),
            ConnectionKind::Tls => write!(f, "tls"),
        }
    }
}

/// 一条已建立的双工连接
///
/// 由持有它的会话独占，`close` 可以重复调用
pub struct Connection {
    stream: Pin<Box<dyn Transport>>,
    kind: ConnectionKind,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    closed: bool,
}

impl Connection {
    pub fn new(
        stream: impl Transport,
        kind: ConnectionKind,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Self {
        Self {
            stream: Box::pin(stream),
            kind,
            peer_addr,
            local_addr,
            closed: false,
        }
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 关闭写方向（TLS 会发送 close_notify），只执行一次
    ///
    /// 底层套接字在连接被丢弃时释放
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        match tokio::time::timeout(CLOSE_TIMEOUT, self.stream.shutdown()).await {
            Ok(Ok(())) => debug!("Closed {} connection to {}", self.kind, self.peer_addr),
            Ok(Err(e)) => debug!(
                "Error while closing {} connection to {}: {}",
                self.kind, self.peer_addr, e
            ),
            Err(_) => debug!(
                "Timed out closing {} connection to {}",
                self.kind, self.peer_addr
            ),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.kind)
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .field("closed", &self.closed)
            .finish()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.stream.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_shutdown(cx)
    }
}
