use anyhow::{bail, Result};

use super::{RateLimitConfig, TlsFiles, TunnelConfig, TunnelMode};

/// 配置验证器 - 负责所有配置验证逻辑
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证端口号
    pub fn validate_port(port: u16, context: &str) -> Result<()> {
        if port == 0 {
            bail!("{}: port cannot be 0", context);
        }
        Ok(())
    }

    /// 验证地址不为空
    pub fn validate_address(addr: &str, context: &str) -> Result<()> {
        if addr.trim().is_empty() {
            bail!("{}: address cannot be empty", context);
        }
        Ok(())
    }

    /// 验证隧道配置
    pub fn validate_tunnel_config(config: &TunnelConfig) -> Result<()> {
        if let Some(ref addr) = config.bind_addr {
            Self::validate_address(addr, "bind_addr")?;
        }

        // bind_port 允许为 0（由系统分配）
        Self::validate_address(&config.target_host, "target_host")?;
        Self::validate_port(config.target_port, "target_port")?;

        if config.require_peer_auth && config.mode != TunnelMode::ServerSide {
            bail!("require_peer_auth is only meaningful in server mode");
        }

        if config.buffer_size == 0 {
            bail!("buffer_size must be greater than 0");
        }

        if config.dial_timeout_secs == Some(0) {
            bail!("dial_timeout_secs must be greater than 0 when set");
        }

        if config.handshake_timeout_secs == Some(0) {
            bail!("handshake_timeout_secs must be greater than 0 when set");
        }

        if config.max_sessions == Some(0) {
            bail!("max_sessions must be greater than 0 when set");
        }

        if let Some(ref rate_limit) = config.rate_limit {
            Self::validate_rate_limit_config(rate_limit)?;
        }

        Ok(())
    }

    /// 验证速率限制配置
    pub fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<()> {
        if config.requests_per_second == 0 {
            bail!("rate_limit.requests_per_second must be greater than 0");
        }
        if config.burst_size == 0 {
            bail!("rate_limit.burst_size must be greater than 0");
        }
        Ok(())
    }

    /// 验证证书文件配置与模式是否匹配
    pub fn validate_tls_files(tunnel: &TunnelConfig, files: &TlsFiles) -> Result<()> {
        match (&files.cert_path, &files.key_path) {
            (Some(_), Some(_)) => {}
            (None, None) => {
                if tunnel.mode == TunnelMode::ServerSide {
                    bail!("server mode requires cert_path and key_path");
                }
            }
            _ => bail!("cert_path and key_path must both be set or both omitted"),
        }

        if tunnel.require_peer_auth && files.ca_cert_path.is_none() {
            bail!("require_peer_auth needs ca_cert_path to verify client certificates");
        }

        Ok(())
    }
}
