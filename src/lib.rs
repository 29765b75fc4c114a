/// 透明 TLS 隧道库入口
///
/// 将核心模块导出为库，方便测试和复用
pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod rate_limiter;
pub mod service;
pub mod session;
pub mod stats;
pub mod tls;
pub mod transport;

// 重新导出常用类型
pub use bridge::{bridge, BridgeOutcome};
pub use config::{AppConfig, TlsFiles, TunnelConfig, TunnelMode};
pub use error::{BridgeError, BridgeOp, Result, TunnelError};
pub use rate_limiter::RateLimiter;
pub use service::{ServiceState, TunnelService};
pub use session::{Session, SessionReport};
pub use stats::{StatsSnapshot, TunnelStats};
pub use tls::{CredentialProvider, Identity, PemCredentials};
pub use transport::{Connection, ConnectionKind, Dialer, Listener};
