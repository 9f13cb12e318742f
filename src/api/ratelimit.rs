//! Request Admission Control
//!
//! Fixed-window rate limiting per client address, applied as a warp filter
//! before any other component runs. The create-intent endpoint gets its own
//! stricter limiter instance than the read endpoints.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::warn;
use warp::Filter;

use crate::config::RateLimitSettings;

/// Windows are pruned once the map grows past this many clients.
const PRUNE_THRESHOLD: usize = 1_024;

/// One client's current window.
struct WindowSlot {
    window_start: Instant,
    count: u32,
}

/// Fixed-window counter shared across request handlers.
#[derive(Clone)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    slots: Arc<RwLock<HashMap<IpAddr, WindowSlot>>>,
}

impl RateLimiter {
    /// Creates a limiter from configured settings.
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            window: Duration::from_millis(settings.window_ms),
            max_requests: settings.max_requests,
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Counts one request from `addr` and reports whether it is admitted.
    pub async fn check(&self, addr: IpAddr) -> bool {
        let now = Instant::now();
        let mut slots = self.slots.write().await;

        if slots.len() > PRUNE_THRESHOLD {
            let window = self.window;
            slots.retain(|_, slot| now.duration_since(slot.window_start) < window);
        }

        let slot = slots.entry(addr).or_insert(WindowSlot {
            window_start: now,
            count: 0,
        });
        if now.duration_since(slot.window_start) >= self.window {
            slot.window_start = now;
            slot.count = 0;
        }
        slot.count += 1;
        slot.count <= self.max_requests
    }
}

/// Rejection raised for over-threshold clients.
#[derive(Debug)]
pub struct RateLimited;

impl warp::reject::Reject for RateLimited {}

/// Wraps a limiter as a composable filter.
///
/// Requests without a resolvable remote address (e.g. behind a unix
/// socket) are counted against the loopback bucket.
pub fn with_rate_limit(
    limiter: RateLimiter,
) -> impl Filter<Extract = (), Error = warp::Rejection> + Clone {
    warp::addr::remote()
        .and_then(move |addr: Option<SocketAddr>| {
            let limiter = limiter.clone();
            async move {
                let ip = addr
                    .map(|a| a.ip())
                    .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
                if limiter.check(ip).await {
                    Ok(())
                } else {
                    warn!(client = %ip, "Rate limit exceeded");
                    Err(warp::reject::custom(RateLimited))
                }
            }
        })
        .untuple_one()
}
