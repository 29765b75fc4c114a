/// 新连接准入限速
///
/// 基于 token bucket，超出配额的新连接直接关闭，不进入握手和拨号
use crate::config::RateLimitConfig;
use crate::error::{Result, TunnelError};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// 连接准入限速器，克隆后共享同一个令牌桶
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        let per_second = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            TunnelError::config_error("rate_limit.requests_per_second must be > 0")
        })?;
        let burst = NonZeroU32::new(config.burst_size)
            .ok_or_else(|| TunnelError::config_error("rate_limit.burst_size must be > 0"))?;

        let quota = Quota::per_second(per_second).allow_burst(burst);

        Ok(Self {
            inner: Arc::new(GovernorLimiter::direct(quota)),
            config,
        })
    }

    /// 尝试为一个新连接取得令牌
    ///
    /// 被限流时返回下一个令牌可用前需要等待的时间
    pub fn try_admit(&self) -> std::result::Result<(), Duration> {
        self.inner
            .check()
            .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
