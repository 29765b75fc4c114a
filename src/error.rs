/// 自定义错误类型
///
/// 按照隧道的故障域划分：启动期致命错误（绑定、配置、证书），
/// 以及只影响单个连接或单个会话的可恢复错误
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// 数据泵的读写方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOp {
    /// 从源端读取
    Read,
    /// 向目的端写入
    Write,
}

impl std::fmt::Display for BridgeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeOp::Read => write!(f, "read"),
            BridgeOp::Write => write!(f, "write"),
        }
    }
}

/// 传输过程中的 I/O 故障
#[derive(Error, Debug)]
#[error("{op} failed after {bytes} bytes: {source}")]
pub struct BridgeError {
    pub op: BridgeOp,
    /// 故障发生前已转发的字节数
    pub bytes: u64,
    #[source]
    pub source: io::Error,
}

/// TLS 隧道的主要错误类型
#[derive(Error, Debug)]
pub enum TunnelError {
    /// 无法绑定监听地址（致命）
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// accept 调用失败（可恢复）
    #[error("Failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// 监听器已关闭
    #[error("Listener closed")]
    ListenerClosed,

    /// 对端证书认证失败
    #[error("Peer authentication failed for {peer}: {source}")]
    PeerAuth {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// 其他 TLS 握手失败
    #[error("TLS handshake with {peer} failed: {source}")]
    Handshake {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// 出站连接失败
    #[error("Failed to connect to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 会话中的数据转发失败
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 证书、私钥或信任锚加载失败
    #[error("Credential error: {0}")]
    Credentials(String),

    /// 服务已经在运行
    #[error("Tunnel service is already running")]
    AlreadyRunning,

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 其他错误（保留与 anyhow 的兼容性）
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    pub fn bind(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    pub fn dial(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Dial {
            addr: addr.into(),
            source,
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn credentials(msg: impl Into<String>) -> Self {
        Self::Credentials(msg.into())
    }

    /// 是否只影响单个连接或会话，服务可以继续运行
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Accept(_)
                | Self::PeerAuth { .. }
                | Self::Handshake { .. }
                | Self::Dial { .. }
                | Self::Bridge(_)
        )
    }

    /// 检查是否为对端认证失败
    pub fn is_peer_auth(&self) -> bool {
        matches!(self, Self::PeerAuth { .. })
    }

    /// 检查是否为出站连接失败
    pub fn is_dial(&self) -> bool {
        matches!(self, Self::Dial { .. })
    }
}
