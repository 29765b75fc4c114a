use anyhow::{Context, Result};

use super::{
    validator::ConfigValidator, RateLimitConfig, TunnelConfig, TunnelMode, DEFAULT_BUFFER_SIZE,
};

/// TunnelConfig Builder
#[derive(Debug)]
pub struct TunnelConfigBuilder {
    mode: TunnelMode,
    bind_addr: Option<String>,
    bind_port: Option<u16>,
    target_host: Option<String>,
    target_port: Option<u16>,
    require_peer_auth: bool,
    buffer_size: usize,
    dial_timeout_secs: Option<u64>,
    handshake_timeout_secs: Option<u64>,
    max_sessions: Option<usize>,
    rate_limit: Option<RateLimitConfig>,
}

impl TunnelConfigBuilder {
    /// 创建新的 Builder
    pub fn new(mode: TunnelMode) -> Self {
        Self {
            mode,
            bind_addr: None,
            bind_port: None,
            target_host: None,
            target_port: None,
            require_peer_auth: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            dial_timeout_secs: None,
            handshake_timeout_secs: None,
            max_sessions: None,
            rate_limit: None,
        }
    }

    /// 设置绑定地址
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = Some(addr.into());
        self
    }

    /// 设置绑定端口
    pub fn bind_port(mut self, port: u16) -> Self {
        self.bind_port = Some(port);
        self
    }

    /// 设置转发目标
    pub fn target(mut self, host: impl Into<String>, port: u16) -> Self {
        self.target_host = Some(host.into());
        self.target_port = Some(port);
        self
    }

    /// 设置是否要求客户端证书
    pub fn require_peer_auth(mut self, require: bool) -> Self {
        self.require_peer_auth = require;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn dial_timeout_secs(mut self, secs: u64) -> Self {
        self.dial_timeout_secs = Some(secs);
        self
    }

    pub fn handshake_timeout_secs(mut self, secs: u64) -> Self {
        self.handshake_timeout_secs = Some(secs);
        self
    }

    /// 设置同时活跃会话上限
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    /// 设置新连接速率限制
    pub fn rate_limit(mut self, requests_per_second: u32, burst_size: u32) -> Self {
        self.rate_limit = Some(RateLimitConfig {
            requests_per_second,
            burst_size,
        });
        self
    }

    /// 构建 TunnelConfig 并验证
    pub fn build(self) -> Result<TunnelConfig> {
        let config = TunnelConfig {
            mode: self.mode,
            bind_addr: self.bind_addr,
            bind_port: self.bind_port.context("bind_port is required")?,
            target_host: self.target_host.context("target_host is required")?,
            target_port: self.target_port.context("target_port is required")?,
            require_peer_auth: self.require_peer_auth,
            buffer_size: self.buffer_size,
            dial_timeout_secs: self.dial_timeout_secs,
            handshake_timeout_secs: self.handshake_timeout_secs,
            max_sessions: self.max_sessions,
            rate_limit: self.rate_limit,
        };

        ConfigValidator::validate_tunnel_config(&config)?;

        Ok(config)
    }
}
