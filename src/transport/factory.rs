// 传输层工厂 - 根据工作模式一次性选定入站/出站变体

use crate::config::{TunnelConfig, TunnelMode};
use crate::error::Result;
use crate::tls::CredentialProvider;
use crate::transport::{Dialer, InboundSecurity, Listener, OutboundSecurity};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// 一个隧道实例的传输变体
///
/// 客户端模式：明文入站、TLS 出站；服务端模式：TLS 入站、明文出站
#[derive(Clone)]
pub struct TransportVariant {
    pub inbound: InboundSecurity,
    pub outbound: OutboundSecurity,
}

impl TransportVariant {
    /// 按配置的模式从凭据提供者取得握手配置
    pub fn resolve(config: &TunnelConfig, credentials: &dyn CredentialProvider) -> Result<Self> {
        let variant = match config.mode {
            TunnelMode::ClientSide => Self {
                inbound: InboundSecurity::Plain,
                outbound: OutboundSecurity::Tls(TlsConnector::from(credentials.client_config()?)),
            },
            TunnelMode::ServerSide => Self {
                inbound: InboundSecurity::Tls {
                    acceptor: TlsAcceptor::from(
                        credentials.server_config(config.require_peer_auth)?,
                    ),
                    require_peer_auth: config.require_peer_auth,
                },
                outbound: OutboundSecurity::Plain,
            },
        };

        Ok(variant)
    }
}

/// 创建入站监听器
pub async fn create_listener(config: &TunnelConfig, security: InboundSecurity) -> Result<Listener> {
    let listener = Listener::bind(&config.bind_endpoint(), security).await?;
    Ok(listener.with_handshake_timeout(config.handshake_timeout()))
}

/// 创建出站拨号器
pub fn create_dialer(config: &TunnelConfig, security: OutboundSecurity) -> Dialer {
    Dialer::new(config.target_host.clone(), config.target_port, security)
        .with_timeout(config.dial_timeout())
}
