use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{error::AppError, state::AppState};

/// How often idle client entries are dropped from the limiter.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

/// Fixed hourly quota per client IP.
pub struct IpRateLimiter {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
}

impl IpRateLimiter {
    pub fn per_hour(max: u32) -> anyhow::Result<Self> {
        let max = NonZeroU32::new(max)
            .ok_or_else(|| anyhow::anyhow!("RATE_LIMIT_PER_HOUR must be positive"))?;
        Ok(Self::with_quota(Quota::per_hour(max)))
    }

    fn with_quota(quota: Quota) -> Self {
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    pub fn check(&self, ip: IpAddr) -> bool {
        self.limiter.check_key(&ip).is_ok()
    }

    /// Drops clients whose quota has fully replenished.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    pub fn tracked_ips(&self) -> usize {
        self.limiter.len()
    }

    /// Prunes every `every` until the last handle to the limiter is dropped.
    pub fn spawn_pruner(limiter: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::downgrade(limiter);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                limiter.prune();
                debug!(tracked = limiter.tracked_ips(), "rate limiter pruned");
            }
        })
    }
}

/// Rejects with 429 once a client IP exhausts its quota. Requests without
/// connection info (e.g. in-process tests) share one bucket.
pub async fn limit_by_ip(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(limiter) = &state.rate_limiter {
        let ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        if !limiter.check(ip) {
            warn!(%ip, "rate limit exceeded");
            return AppError::TooManyRequests.into_response();
        }
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_is_tracked_per_ip() {
        let limiter = IpRateLimiter::per_hour(2).unwrap();
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        assert!(limiter.check(a));
        assert!(limiter.check(a));
        assert!(!limiter.check(a));
        assert!(limiter.check(b));
    }

    fn short_lived() -> IpRateLimiter {
        let quota = Quota::with_period(Duration::from_millis(1)).unwrap();
        IpRateLimiter::with_quota(quota)
    }

    fn nth_ip(n: u32) -> IpAddr {
        IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + n))
    }

    #[test]
    fn prune_drops_replenished_clients() {
        let limiter = short_lived();
        for n in 0..1_000 {
            assert!(limiter.check(nth_ip(n)));
        }
        assert_eq!(limiter.tracked_ips(), 1_000);

        std::thread::sleep(Duration::from_millis(50));
        limiter.prune();
        assert_eq!(limiter.tracked_ips(), 0);
    }

    #[test]
    fn prune_keeps_clients_still_limited() {
        let limiter = IpRateLimiter::per_hour(1).unwrap();
        let ip = nth_ip(1);
        assert!(limiter.check(ip));
        limiter.prune();
        assert_eq!(limiter.tracked_ips(), 1);
        assert!(!limiter.check(ip));
    }

    #[tokio::test]
    async fn pruner_runs_until_limiter_dropped() {
        let limiter = Arc::new(short_lived());
        for n in 0..100 {
            limiter.check(nth_ip(n));
        }
        let task = IpRateLimiter::spawn_pruner(&limiter, Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(limiter.tracked_ips(), 0);

        drop(limiter);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("pruner exits")
            .unwrap();
    }

    #[test]
    fn zero_quota_is_a_config_error() {
        assert!(IpRateLimiter::per_hour(0).is_err());
    }
}
