//! Per-client token-bucket rate limiting.
//!
//! One bucket per client key (source IP, port stripped). A fresh key starts
//! with a full bucket of `burst` tokens; tokens refill continuously at
//! `refill_rate` per second. A background sweep evicts keys idle longer than
//! the idle window so the map stays bounded.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::RateLimitConfig;
use crate::http::error::ApiError;
use crate::observability::metrics;

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct ClientEntry {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Outcome of [`RateLimiter::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Throttled,
}

/// Owned limiter instance; construct once and share through an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    clients: Mutex<HashMap<String, ClientEntry>>,
    refill_rate: f64,
    burst: f64,
    idle_window: Duration,
}

impl RateLimiter {
    pub fn new(refill_rate: f64, burst: u32, idle_window: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            refill_rate,
            burst: f64::from(burst),
            idle_window,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.requests_per_second,
            config.burst_size,
            Duration::from_secs(config.idle_secs),
        )
    }

    pub fn admit(&self, key: &str) -> Admission {
        self.admit_at(key, Instant::now())
    }

    pub fn admit_at(&self, key: &str, now: Instant) -> Admission {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = clients.entry(key.to_string()).or_insert_with(|| ClientEntry {
            bucket: TokenBucket::new(self.burst, now),
            last_seen: now,
        });

        if entry.bucket.try_acquire(self.burst, self.refill_rate, now) {
            entry.last_seen = now;
            Admission::Allowed
        } else {
            Admission::Throttled
        }
    }

    /// Evict clients idle longer than the window; returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let before = clients.len();
        clients.retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= self.idle_window);
        metrics::set_tracked_clients(clients.len());
        before - clients.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = limiter.sweep();
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = limiter.tracked_clients(), "Evicted idle clients");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Rate limiter sweep stopped");
                        break;
                    }
                }
            }
        })
    }
}

/// Middleware keyed on the peer IP. A request without a transport address
/// cannot be attributed to a client and is refused as a server error.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>().copied() else {
        return ApiError::Internal(anyhow::anyhow!("client address unavailable for rate limiting"))
            .into_response();
    };
    let key = addr.ip().to_string();

    match limiter.admit(&key) {
        Admission::Allowed => next.run(request).await,
        Admission::Throttled => {
            tracing::warn!(client = %key, "Rate limit exceeded");
            metrics::record_throttled();
            ApiError::Throttled.into_response()
        }
    }
}
