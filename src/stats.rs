use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Point-in-time statistics for one tunnel instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Sessions created since start
    pub total_sessions: u64,
    /// Sessions currently bridging data
    pub active_sessions: u64,
    /// Bytes forwarded from accepted connections to dialed connections
    pub bytes_inbound: u64,
    /// Bytes forwarded from dialed connections back to accepted connections
    pub bytes_outbound: u64,
    /// Outbound connection attempts that failed
    pub failed_dials: u64,
    /// Inbound TLS handshakes that failed (including peer authentication)
    pub rejected_handshakes: u64,
    /// Connections dropped by the admission rate limit
    pub rate_limited: u64,
    /// Accept calls that failed
    pub accept_errors: u64,
    /// Unix timestamp when the tunnel was created
    pub start_time: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_sessions: AtomicU64,
    active_sessions: AtomicU64,
    bytes_inbound: AtomicU64,
    bytes_outbound: AtomicU64,
    failed_dials: AtomicU64,
    rejected_handshakes: AtomicU64,
    rate_limited: AtomicU64,
    accept_errors: AtomicU64,
}

/// Statistics tracker shared by the accept loop and all sessions
#[derive(Debug, Clone)]
pub struct TunnelStats {
    counters: Arc<Counters>,
    start_time: u64,
}

impl TunnelStats {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            start_time: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }

    /// Count a new session; the returned guard marks it inactive when dropped
    pub fn session_started(&self) -> SessionGuard {
        self.counters.total_sessions.fetch_add(1, Ordering::Relaxed);
        self.counters.active_sessions.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            stats: self.clone(),
        }
    }

    /// Add bytes moved by a finished session
    pub fn add_bytes(&self, inbound: u64, outbound: u64) {
        self.counters
            .bytes_inbound
            .fetch_add(inbound, Ordering::Relaxed);
        self.counters
            .bytes_outbound
            .fetch_add(outbound, Ordering::Relaxed);
    }

    pub fn dial_failed(&self) {
        self.counters.failed_dials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_rejected(&self) {
        self.counters
            .rejected_handshakes
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_limited(&self) {
        self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accept_failed(&self) {
        self.counters.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of stats
    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            total_sessions: c.total_sessions.load(Ordering::Relaxed),
            active_sessions: c.active_sessions.load(Ordering::Relaxed),
            bytes_inbound: c.bytes_inbound.load(Ordering::Relaxed),
            bytes_outbound: c.bytes_outbound.load(Ordering::Relaxed),
            failed_dials: c.failed_dials.load(Ordering::Relaxed),
            rejected_handshakes: c.rejected_handshakes.load(Ordering::Relaxed),
            rate_limited: c.rate_limited.load(Ordering::Relaxed),
            accept_errors: c.accept_errors.load(Ordering::Relaxed),
            start_time: self.start_time,
        }
    }
}

impl Default for TunnelStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a session counted as active for as long as it lives
#[derive(Debug)]
pub struct SessionGuard {
    stats: TunnelStats,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.stats
            .counters
            .active_sessions
            .fetch_sub(1, Ordering::Relaxed);
    }
}
