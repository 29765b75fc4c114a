/// 隧道服务：accept 循环与任务池
use crate::config::TunnelConfig;
use crate::error::{Result, TunnelError};
use crate::rate_limiter::RateLimiter;
use crate::session::Session;
use crate::stats::{StatsSnapshot, TunnelStats};
use crate::tls::CredentialProvider;
use crate::transport::{create_dialer, create_listener, Dialer, Listener, PendingConnection, TransportVariant};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// accept 连续失败时的初始退避
const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(50);
/// accept 连续失败时的最大退避
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// 服务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Running,
    Stopped,
}

/// 一个隧道实例
///
/// 多个实例可以在同一进程中共存，彼此不共享状态
pub struct TunnelService {
    config: Arc<TunnelConfig>,
    listener: Listener,
    dialer: Arc<Dialer>,
    state: Mutex<ServiceState>,
    shutdown: CancellationToken,
    loop_exited: CancellationToken,
    tasks: TaskTracker,
    session_limit: Option<Arc<Semaphore>>,
    rate_limiter: Option<RateLimiter>,
    stats: TunnelStats,
}

impl TunnelService {
    /// 按配置选定传输变体并绑定监听地址
    pub async fn bind(config: TunnelConfig, credentials: &dyn CredentialProvider) -> Result<Self> {
        config
            .validate()
            .map_err(|e| TunnelError::config_error(format!("{:#}", e)))?;

        let variant = TransportVariant::resolve(&config, credentials)?;
        let listener = create_listener(&config, variant.inbound).await?;
        let dialer = create_dialer(&config, variant.outbound);

        let rate_limiter = config.rate_limit.clone().map(RateLimiter::new).transpose()?;
        let session_limit = config.max_sessions.map(|max| Arc::new(Semaphore::new(max)));

        info!(
            "Tunnel created in {} mode: {} -> {}",
            config.mode,
            listener.local_addr(),
            dialer.target()
        );

        Ok(Self {
            config: Arc::new(config),
            listener,
            dialer: Arc::new(dialer),
            state: Mutex::new(ServiceState::Created),
            shutdown: CancellationToken::new(),
            loop_exited: CancellationToken::new(),
            tasks: TaskTracker::new(),
            session_limit,
            rate_limiter,
            stats: TunnelStats::new(),
        })
    }

    /// 实际监听的地址
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 运行 accept 循环，直到 `stop` 被调用
    pub async fn run(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ServiceState::Created => *state = ServiceState::Running,
                ServiceState::Running => return Err(TunnelError::AlreadyRunning),
                ServiceState::Stopped => return Ok(()),
            }
        }

        // 无论以何种方式退出循环，都通知等待中的 stop
        let _exited = self.loop_exited.clone().drop_guard();

        info!(
            "Waiting for connections on {} (forwarding to {})",
            self.local_addr(),
            self.dialer.target()
        );

        let mut consecutive_errors: u32 = 0;

        loop {
            // 达到会话上限时先等待空位，再接受新连接
            let permit = match self.acquire_session_slot().await {
                Some(permit) => permit,
                None => break,
            };

            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                result = self.listener.accept() => result,
            };

            match accepted {
                Ok(pending) => {
                    consecutive_errors = 0;

                    if let Some(ref limiter) = self.rate_limiter {
                        if let Err(wait_time) = limiter.try_admit() {
                            warn!(
                                "Rate limit exceeded, rejecting connection from {} (retry after {:?})",
                                pending.peer_addr(),
                                wait_time
                            );
                            self.stats.rate_limited();
                            continue;
                        }
                    }

                    self.spawn_connection(pending, permit);
                }
                Err(TunnelError::ListenerClosed) => break,
                Err(e) => {
                    self.stats.accept_failed();
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let delay = accept_backoff(consecutive_errors);
                    error!("{} (retrying in {:?})", e, delay);

                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("Accept loop on {} stopped", self.local_addr());
        Ok(())
    }

    /// 停止服务：关闭监听器，取消所有会话，等待它们退出
    ///
    /// 重复调用直接返回
    pub async fn stop(&self) {
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, ServiceState::Stopped)
        };

        if previous == ServiceState::Stopped {
            debug!("Tunnel on {} already stopped", self.local_addr());
            return;
        }

        info!("Stopping tunnel on {}...", self.local_addr());

        self.listener.close().await;
        self.shutdown.cancel();

        if previous == ServiceState::Running {
            self.loop_exited.cancelled().await;
        }

        self.tasks.close();
        self.tasks.wait().await;

        let stats = self.stats.snapshot();
        info!(
            "Tunnel stopped: {} sessions, {} bytes in, {} bytes out, {} failed dials, {} rejected handshakes",
            stats.total_sessions,
            stats.bytes_inbound,
            stats.bytes_outbound,
            stats.failed_dials,
            stats.rejected_handshakes
        );
    }

    async fn acquire_session_slot(&self) -> Option<Option<OwnedSemaphorePermit>> {
        let Some(ref limit) = self.session_limit else {
            return Some(None);
        };

        if limit.available_permits() == 0 {
            debug!("Session limit reached, waiting for a free slot");
        }

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            permit = Arc::clone(limit).acquire_owned() => permit.ok().map(Some),
        }
    }

    fn spawn_connection(&self, pending: PendingConnection, permit: Option<OwnedSemaphorePermit>) {
        let dialer = Arc::clone(&self.dialer);
        let cancel = self.shutdown.child_token();
        let stats = self.stats.clone();
        let buffer_size = self.config.buffer_size;

        self.tasks.spawn(async move {
            serve_connection(pending, dialer, cancel, stats, buffer_size).await;
            drop(permit);
        });
    }
}

/// 单个入站连接的完整生命周期：握手、拨号、会话
async fn serve_connection(
    pending: PendingConnection,
    dialer: Arc<Dialer>,
    cancel: CancellationToken,
    stats: TunnelStats,
    buffer_size: usize,
) {
    let peer = pending.peer_addr();

    let established = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = pending.establish() => result,
    };

    let mut accepted = match established {
        Ok(conn) => conn,
        Err(e) => {
            stats.handshake_rejected();
            warn!("Rejected connection from {}: {}", peer, e);
            return;
        }
    };

    let dialed = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(None),
        result = dialer.connect() => result.map_err(Some),
    };

    let dialed = match dialed {
        Ok(conn) => conn,
        Err(e) => {
            if let Some(e) = e {
                stats.dial_failed();
                warn!("Closing connection from {}: {}", peer, e);
            }
            accepted.close().await;
            return;
        }
    };

    let _guard = stats.session_started();
    let report = Session::new(accepted, dialed, cancel)
        .with_buffer_size(buffer_size)
        .run()
        .await;
    stats.add_bytes(report.inbound.bytes(), report.outbound.bytes());
}

fn accept_backoff(consecutive_errors: u32) -> Duration {
    let shift = consecutive_errors.saturating_sub(1).min(5);
    (ACCEPT_BACKOFF_INITIAL * (1u32 << shift)).min(ACCEPT_BACKOFF_MAX)
}
