//! Per client IP request limits.
//!
//! Clients are keyed by the peer address from [`ConnectInfo`]. Requests
//! without one (in-process tests, for instance) share a single bucket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::Error;

const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
const DEFAULT_API_REQUESTS: u32 = 100;
const DEFAULT_AUTH_REQUESTS: u32 = 5;

/// `requests` per client within `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: NonZeroU32,
    pub window: Duration,
}

impl RateLimit {
    /// `None` when `requests` is zero, which disables the limit.
    pub fn new(requests: u32, window: Duration) -> Option<RateLimit> {
        NonZeroU32::new(requests).map(|requests| RateLimit { requests, window })
    }

    /// The full allowance is available up front and refills evenly across
    /// the window.
    fn quota(&self) -> Quota {
        Quota::with_period(self.window / self.requests.get())
            .unwrap_or_else(|| Quota::per_second(self.requests))
            .allow_burst(self.requests)
    }
}

/// Limits for the whole `/api` tree and the stricter `/api/auth` subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub api: Option<RateLimit>,
    pub auth: Option<RateLimit>,
}

impl RateLimits {
    pub fn new(api_requests: u32, auth_requests: u32, window: Duration) -> Self {
        RateLimits {
            api: RateLimit::new(api_requests, window),
            auth: RateLimit::new(auth_requests, window),
        }
    }

    pub fn disabled() -> Self {
        RateLimits { api: None, auth: None }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        RateLimits::new(DEFAULT_API_REQUESTS, DEFAULT_AUTH_REQUESTS, DEFAULT_WINDOW)
    }
}

// TODO: prune idle keys with `retain_recent` on a timer; the map grows with
// every distinct client address.
#[derive(Clone)]
pub struct IpLimiter(Arc<DefaultKeyedRateLimiter<IpAddr>>);

impl IpLimiter {
    pub fn new(limit: RateLimit) -> Self {
        IpLimiter(Arc::new(RateLimiter::keyed(limit.quota())))
    }
}

/// Middleware answering `429` with `Retry-After` once a client has spent
/// its allowance.
pub async fn enforce(State(limiter): State<IpLimiter>, request: Request, next: Next) -> Response {
    let ip = client_ip(&request);
    match limiter.0.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(not_until) => {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            tracing::warn!(%ip, path = %request.uri().path(), retry_after = wait.as_secs(), "rate limit exceeded");

            let mut response = Error::RateLimited.into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(wait.as_secs().max(1)));
            response
        }
    }
}

fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_requests_disables_the_limit() {
        assert_eq!(RateLimit::new(0, DEFAULT_WINDOW), None);
        assert_eq!(RateLimits::new(0, 0, DEFAULT_WINDOW), RateLimits::disabled());
    }

    #[test]
    fn defaults_allow_a_hundred_api_and_five_auth_requests() {
        let limits = RateLimits::default();
        assert_eq!(limits.api.map(|l| l.requests.get()), Some(100));
        assert_eq!(limits.auth.map(|l| l.requests.get()), Some(5));
        assert_eq!(limits.auth.map(|l| l.window), Some(Duration::from_secs(900)));
    }

    #[test]
    fn allowance_is_per_address() {
        let limiter = IpLimiter::new(RateLimit::new(2, DEFAULT_WINDOW).unwrap());
        let a = IpAddr::from([10, 0, 0, 1]);
        let b = IpAddr::from([10, 0, 0, 2]);

        assert!(limiter.0.check_key(&a).is_ok());
        assert!(limiter.0.check_key(&a).is_ok());
        assert!(limiter.0.check_key(&a).is_err());
        assert!(limiter.0.check_key(&b).is_ok());
    }
}
