use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::config::{parse_target, AppConfig, TlsFiles, TunnelConfig, TunnelMode};

#[derive(Parser, Debug)]
#[command(name = "ttls")]
#[command(author, version, about = "Transparent TLS TCP tunnel", long_about = None)]
pub struct Cli {
    /// 本地监听端口
    #[arg(required_unless_present = "config")]
    pub bind_port: Option<u16>,

    /// 转发目标（host:port 或 [v6addr]:port）
    #[arg(value_name = "TARGET_HOST:TARGET_PORT", required_unless_present = "config")]
    pub target: Option<String>,

    /// 服务端模式：接受 TLS 连接并以明文转发
    #[arg(long)]
    pub listen: bool,

    /// 要求客户端证书（仅服务端模式）
    #[arg(long, requires = "listen")]
    pub client_auth: bool,

    /// 覆盖默认监听地址
    #[arg(long, value_name = "ADDR")]
    pub bind_addr: Option<String>,

    /// PEM 证书链
    #[arg(long, value_name = "PATH")]
    pub cert: Option<PathBuf>,

    /// PEM 私钥
    #[arg(long, value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// 校验客户端证书的 CA
    #[arg(long, value_name = "PATH")]
    pub ca_cert: Option<PathBuf>,

    /// 出站连接超时（秒）
    #[arg(long, value_name = "SECS")]
    pub dial_timeout: Option<u64>,

    /// 同时活跃的最大会话数
    #[arg(long, value_name = "N")]
    pub max_sessions: Option<usize>,

    /// 配置文件路径
    #[arg(short, long, value_name = "PATH", conflicts_with_all = ["bind_port", "target"])]
    pub config: Option<String>,

    /// 日志详细程度 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// 合并配置文件与命令行参数
    pub fn app_config(&self) -> Result<AppConfig> {
        if let Some(ref path) = self.config {
            let mut config = AppConfig::load(path)?;
            self.apply_overrides(&mut config.tunnel, &mut config.tls);
            return Ok(config);
        }

        let (Some(bind_port), Some(target)) = (self.bind_port, self.target.as_deref()) else {
            bail!("BIND_PORT and TARGET_HOST:TARGET_PORT are required without --config");
        };
        let (target_host, target_port) = parse_target(target)?;

        let mode = if self.listen {
            TunnelMode::ServerSide
        } else {
            TunnelMode::ClientSide
        };

        let mut builder = TunnelConfig::builder(mode)
            .bind_port(bind_port)
            .target(target_host, target_port)
            .require_peer_auth(self.client_auth);
        if let Some(ref addr) = self.bind_addr {
            builder = builder.bind_addr(addr.clone());
        }
        if let Some(secs) = self.dial_timeout {
            builder = builder.dial_timeout_secs(secs);
        }
        if let Some(max) = self.max_sessions {
            builder = builder.max_sessions(max);
        }

        let tls = TlsFiles {
            cert_path: self.cert.clone(),
            key_path: self.key.clone(),
            ca_cert_path: self.ca_cert.clone(),
        }
        .expanded();

        Ok(AppConfig {
            tunnel: builder.build()?,
            tls,
        })
    }

    fn apply_overrides(&self, tunnel: &mut TunnelConfig, tls: &mut TlsFiles) {
        if self.listen {
            tunnel.mode = TunnelMode::ServerSide;
        }
        if self.client_auth {
            tunnel.require_peer_auth = true;
        }
        if self.bind_addr.is_some() {
            tunnel.bind_addr = self.bind_addr.clone();
        }
        if self.dial_timeout.is_some() {
            tunnel.dial_timeout_secs = self.dial_timeout;
        }
        if self.max_sessions.is_some() {
            tunnel.max_sessions = self.max_sessions;
        }
        if self.cert.is_some() {
            tls.cert_path = self.cert.clone();
        }
        if self.key.is_some() {
            tls.key_path = self.key.clone();
        }
        if self.ca_cert.is_some() {
            tls.ca_cert_path = self.ca_cert.clone();
        }
        *tls = tls.expanded();
    }

    /// 未设置 RUST_LOG 时使用的日志级别
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
