use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::{config::RateLimitConfig, error::AppError};

type KeyedLimiter = DefaultKeyedRateLimiter<String>;

/// RateLimits
///
/// Per-caller token buckets: one for every route, a tighter one for login.
/// Each bucket holds `max` requests and refills one request every
/// `window / max`, so a caller can never exceed `max` per `window` on average.
#[derive(Clone)]
pub struct RateLimits {
    global: Arc<KeyedLimiter>,
    login: Arc<KeyedLimiter>,
}

fn keyed(max: u32, window: Duration) -> KeyedLimiter {
    let burst = NonZeroU32::new(max).unwrap_or(NonZeroU32::MIN);
    let period = window / burst.get();
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst);
    RateLimiter::keyed(quota)
}

impl RateLimits {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            global: Arc::new(keyed(config.max_requests, config.window)),
            login: Arc::new(keyed(config.login_max_requests, config.window)),
        }
    }

    /// Drops the buckets of callers that have fully refilled (indistinguishable
    /// from a fresh bucket) and returns how many keys are still tracked.
    pub fn prune(&self) -> usize {
        [&self.global, &self.login]
            .into_iter()
            .map(|limiter| {
                limiter.retain_recent();
                limiter.shrink_to_fit();
                limiter.len()
            })
            .sum()
    }

    /// Keys currently held across both limiters.
    pub fn tracked_keys(&self) -> usize {
        self.global.len() + self.login.len()
    }

    /// cleanup_task
    ///
    /// Prunes both limiters every `every`. Runs until the runtime shuts down.
    pub async fn cleanup_task(self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let remaining = self.prune();
            tracing::debug!(remaining, "rate limiter buckets pruned");
        }
    }

    fn check(limiter: &KeyedLimiter, key: &str) -> Result<(), AppError> {
        limiter.check_key(&key.to_string()).map_err(|_| {
            tracing::warn!(caller = %key, "rate limit exceeded");
            AppError::RateLimited
        })
    }
}

/// caller_key
///
/// The peer address when the server was started with connect info, otherwise
/// the first `x-forwarded-for` entry.
pub fn caller_key(peer: Option<SocketAddr>, headers: &HeaderMap) -> String {
    if let Some(addr) = peer {
        return addr.ip().to_string();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn request_key(request: &Request) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    caller_key(peer, request.headers())
}

pub async fn limit_global(
    State(limits): State<RateLimits>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    RateLimits::check(&limits.global, &request_key(&request))?;
    Ok(next.run(request).await)
}

pub async fn limit_login(
    State(limits): State<RateLimits>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    RateLimits::check(&limits.login, &request_key(&request))?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bucket_allows_exactly_max_then_refuses() {
        let limiter = keyed(5, Duration::from_secs(900));
        for _ in 0..5 {
            assert!(RateLimits::check(&limiter, "10.0.0.1").is_ok());
        }
        assert!(matches!(
            RateLimits::check(&limiter, "10.0.0.1"),
            Err(AppError::RateLimited)
        ));
        // Other callers have their own bucket.
        assert!(RateLimits::check(&limiter, "10.0.0.2").is_ok());
    }

    #[test]
    fn refilled_buckets_are_pruned() {
        let limits = RateLimits::new(&RateLimitConfig {
            max_requests: 2,
            login_max_requests: 2,
            window: Duration::from_millis(20),
        });
        for n in 0..500 {
            let key = format!("203.0.113.{n}");
            assert!(RateLimits::check(&limits.global, &key).is_ok());
        }
        assert_eq!(limits.tracked_keys(), 500);

        // Each bucket refills one cell every 10ms.
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(limits.prune(), 0);
        assert_eq!(limits.tracked_keys(), 0);
    }

    #[test]
    fn recently_used_buckets_survive_pruning() {
        let limits = RateLimits::new(&RateLimitConfig {
            max_requests: 5,
            login_max_requests: 5,
            window: Duration::from_secs(900),
        });
        assert!(RateLimits::check(&limits.login, "10.0.0.1").is_ok());
        assert_eq!(limits.prune(), 1);
    }

    #[test]
    fn caller_key_prefers_peer_then_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));

        let peer: SocketAddr = "192.0.2.4:5555".parse().unwrap();
        assert_eq!(caller_key(Some(peer), &headers), "192.0.2.4");
        assert_eq!(caller_key(None, &headers), "203.0.113.9");
        assert_eq!(caller_key(None, &HeaderMap::new()), "unknown");
    }
}
