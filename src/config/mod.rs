// 配置管理模块 - 使用模块化设计

mod builder;
mod validator;

pub use builder::TunnelConfigBuilder;
pub use validator::ConfigValidator;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 默认单次转发缓冲区大小
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// 隧道工作模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunnelMode {
    /// 本地明文监听，TLS 连接远端
    #[serde(rename = "client")]
    ClientSide,
    /// TLS 监听，明文连接后端服务
    #[serde(rename = "server")]
    ServerSide,
}

impl TunnelMode {
    /// 未显式配置时的监听地址：客户端模式只暴露在回环接口
    pub fn default_bind_addr(self) -> &'static str {
        match self {
            TunnelMode::ClientSide => "127.0.0.1",
            TunnelMode::ServerSide => "0.0.0.0",
        }
    }
}

impl std::fmt::Display for TunnelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelMode::ClientSide => write!(f, "client"),
            TunnelMode::ServerSide => write!(f, "server"),
        }
    }
}

impl std::str::FromStr for TunnelMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "client" | "client-side" => Ok(Self::ClientSide),
            "server" | "server-side" | "listen" => Ok(Self::ServerSide),
            _ => bail!("Unknown tunnel mode: {}", s),
        }
    }
}

/// 速率限制配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 每秒允许的新连接数
    pub requests_per_second: u32,
    /// 突发容量（允许短时间内的峰值连接数）
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 100,
            burst_size: 200,
        }
    }
}

/// 隧道配置
///
/// 启动时创建一次，此后不再修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// 工作模式
    pub mode: TunnelMode,
    /// 监听地址（缺省时按模式选择）
    #[serde(default)]
    pub bind_addr: Option<String>,
    /// 监听端口（0 表示由系统分配）
    pub bind_port: u16,
    /// 转发目标主机
    pub target_host: String,
    /// 转发目标端口
    pub target_port: u16,
    /// 是否强制要求对端提供客户端证书（仅服务端模式有效）
    #[serde(default)]
    pub require_peer_auth: bool,
    /// 单次转发缓冲区大小
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// 出站连接超时（秒），缺省不限制
    #[serde(default)]
    pub dial_timeout_secs: Option<u64>,
    /// 入站 TLS 握手超时（秒），缺省不限制
    #[serde(default)]
    pub handshake_timeout_secs: Option<u64>,
    /// 同时活跃的最大会话数，缺省不限制
    #[serde(default)]
    pub max_sessions: Option<usize>,
    /// 新连接速率限制（可选）
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl TunnelConfig {
    /// 创建 Builder
    pub fn builder(mode: TunnelMode) -> TunnelConfigBuilder {
        TunnelConfigBuilder::new(mode)
    }

    /// 实际使用的监听地址
    pub fn bind_addr(&self) -> &str {
        self.bind_addr
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.mode.default_bind_addr())
    }

    /// `host:port` 形式的监听地址
    pub fn bind_endpoint(&self) -> String {
        join_host_port(self.bind_addr(), self.bind_port)
    }

    /// `host:port` 形式的目标地址
    pub fn target_endpoint(&self) -> String {
        join_host_port(&self.target_host, self.target_port)
    }

    pub fn dial_timeout(&self) -> Option<Duration> {
        self.dial_timeout_secs.map(Duration::from_secs)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_secs.map(Duration::from_secs)
    }

    /// 验证配置
    pub fn validate(&self) -> anyhow::Result<()> {
        ConfigValidator::validate_tunnel_config(self)
    }
}

/// 证书文件路径
///
/// 身份与信任锚的来源，由 [`crate::tls::PemCredentials`] 读取
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsFiles {
    /// 本端证书链（服务端模式必需；客户端模式可选，用于双向认证）
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// 本端私钥
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// 校验客户端证书的 CA（require_peer_auth 时必需）
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
}

impl TlsFiles {
    /// 展开路径中的 `~`
    pub fn expanded(&self) -> Self {
        Self {
            cert_path: self.cert_path.as_ref().map(expand_path),
            key_path: self.key_path.as_ref().map(expand_path),
            ca_cert_path: self.ca_cert_path.as_ref().map(expand_path),
        }
    }
}

fn expand_path(path: &PathBuf) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
}

/// 应用配置（配置文件格式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub tls: TlsFiles,
}

impl AppConfig {
    /// 从 TOML 文本解析并验证
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let mut config: AppConfig =
            toml::from_str(content).context("Failed to parse tunnel configuration")?;
        config.tls = config.tls.expanded();
        config
            .tunnel
            .validate()
            .context("Configuration validation failed")?;
        ConfigValidator::validate_tls_files(&config.tunnel, &config.tls)?;
        Ok(config)
    }

    /// 从文件加载配置
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let path = shellexpand::tilde(path);
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml(&content)
    }
}

/// 解析 `host:port` 或 `[v6addr]:port`
pub fn parse_target(target: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = target
        .rsplit_once(':')
        .with_context(|| format!("Target '{}' must be in host:port form", target))?;

    let host = if let Some(inner) = host.strip_prefix('[') {
        inner
            .strip_suffix(']')
            .with_context(|| format!("Unterminated IPv6 address in '{}'", target))?
    } else {
        if host.contains(':') {
            bail!(
                "Target '{}' must be in host:port form (wrap IPv6 addresses in brackets)",
                target
            );
        }
        host
    };

    if host.is_empty() {
        bail!("Target '{}' has an empty host", target);
    }

    let port: u16 = port
        .parse()
        .with_context(|| format!("Invalid port in target '{}'", target))?;

    Ok((host.to_string(), port))
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("127.0.0.1:9443").unwrap(),
            ("127.0.0.1".to_string(), 9443)
        );
        assert_eq!(
            parse_target("example.com:443").unwrap(),
            ("example.com".to_string(), 443)
        );
        assert_eq!(parse_target("[::1]:8080").unwrap(), ("::1".to_string(), 8080));
    }

    #[test]
    fn test_parse_target_rejects_malformed() {
        assert!(parse_target("localhost").is_err());
        assert!(parse_target(":80").is_err());
        assert!(parse_target("host:port").is_err());
        assert!(parse_target("::1:80").is_err());
        assert!(parse_target("[::1:80").is_err());
        assert!(parse_target("host:70000").is_err());
    }

    #[test]
    fn test_default_bind_addr_follows_mode() {
        let client = TunnelConfig::builder(TunnelMode::ClientSide)
            .bind_port(9000)
            .target("example.com", 443)
            .build()
            .unwrap();
        assert_eq!(client.bind_addr(), "127.0.0.1");
        assert_eq!(client.bind_endpoint(), "127.0.0.1:9000");

        let server = TunnelConfig::builder(TunnelMode::ServerSide)
            .bind_port(9000)
            .target("127.0.0.1", 9443)
            .build()
            .unwrap();
        assert_eq!(server.bind_addr(), "0.0.0.0");
        assert_eq!(server.target_endpoint(), "127.0.0.1:9443");
    }

    #[test]
    fn test_ipv6_endpoint_formatting() {
        let config = TunnelConfig::builder(TunnelMode::ClientSide)
            .bind_addr("::1")
            .bind_port(9000)
            .target("::1", 443)
            .build()
            .unwrap();
        assert_eq!(config.bind_endpoint(), "[::1]:9000");
        assert_eq!(config.target_endpoint(), "[::1]:443");
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("server".parse::<TunnelMode>().unwrap(), TunnelMode::ServerSide);
        assert_eq!("Client".parse::<TunnelMode>().unwrap(), TunnelMode::ClientSide);
        assert!("proxy".parse::<TunnelMode>().is_err());
    }

    #[test]
    fn test_load_from_toml() {
        let content = r#"
            [tunnel]
            mode = "server"
            bind_port = 9000
            target_host = "127.0.0.1"
            target_port = 9443
            dial_timeout_secs = 5

            [tunnel.rate_limit]
            requests_per_second = 10
            burst_size = 20

            [tls]
            cert_path = "/etc/ttls/cert.pem"
            key_path = "/etc/ttls/key.pem"
        "#;

        let config = AppConfig::from_toml(content).unwrap();
        assert_eq!(config.tunnel.mode, TunnelMode::ServerSide);
        assert_eq!(config.tunnel.bind_addr(), "0.0.0.0");
        assert_eq!(config.tunnel.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.tunnel.dial_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.tunnel.handshake_timeout(), None);
        assert!(!config.tunnel.require_peer_auth);
        assert_eq!(config.tunnel.rate_limit.unwrap().burst_size, 20);
        assert_eq!(
            config.tls.cert_path,
            Some(PathBuf::from("/etc/ttls/cert.pem"))
        );
    }

    #[test]
    fn test_load_rejects_server_without_identity() {
        let content = r#"
            [tunnel]
            mode = "server"
            bind_port = 9000
            target_host = "127.0.0.1"
            target_port = 9443
        "#;

        let err = AppConfig::from_toml(content).unwrap_err();
        assert!(format!("{:#}", err).contains("cert_path"));
    }

    #[test]
    fn test_load_rejects_peer_auth_without_ca() {
        let content = r#"
            [tunnel]
            mode = "server"
            bind_port = 9000
            target_host = "127.0.0.1"
            target_port = 9443
            require_peer_auth = true

            [tls]
            cert_path = "cert.pem"
            key_path = "key.pem"
        "#;

        let err = AppConfig::from_toml(content).unwrap_err();
        assert!(format!("{:#}", err).contains("ca_cert_path"));
    }
}
