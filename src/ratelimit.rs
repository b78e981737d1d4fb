//! Fixed-window rate limiter keyed by client id (typically the peer IP).
//! Guarded by the crate's three-state mutex, same discipline as the
//! session store and connection pool: the critical section only ever
//! touches the in-memory map, never a blocking I/O call.

use crate::config::RateLimitConfig;
use crate::context::Context;
use crate::errors::RateLimitError;
use crate::http::types::StatusCode;
use crate::middleware::{Middleware, Outcome};
use crate::sync::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

struct Window {
    count: u32,
    window_start: u64,
}

/// Tracks one fixed window per client id and admits/denies requests
/// against `config.max_requests` within `config.window`.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Admits or denies one request from `id`. Resets the client's
    /// window when it has expired, otherwise increments the counter
    /// and denies once `max_requests` is reached.
    pub fn is_allowed(&self, id: &str) -> bool {
        let now = now_ms();
        let mut windows = self.windows.lock();
        match windows.get_mut(id) {
            Some(window) if now.saturating_sub(window.window_start) < self.config.window.as_millis() as u64 => {
                if window.count < self.config.max_requests {
                    window.count += 1;
                    true
                } else {
                    false
                }
            }
            _ => {
                windows.insert(
                    id.to_string(),
                    Window {
                        count: 1,
                        window_start: now,
                    },
                );
                true
            }
        }
    }

    /// Removes every tracked client whose window has already ended.
    /// Called by `spawn_sweeper`'s loop.
    pub fn sweep_expired(&self) {
        let now = now_ms();
        let window_ms = self.config.window.as_millis() as u64;
        self.windows
            .lock()
            .retain(|_, w| now.saturating_sub(w.window_start) < window_ms);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Spawns the periodic sweep task at `config.cleanup_interval`. The
/// limiter is cheap to share via `Arc` from the call site.
pub fn spawn_sweeper(limiter: std::sync::Arc<RateLimiter>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            limiter.sweep_expired();
        }
    })
}

/// Global middleware that keys [`RateLimiter`] off the peer address and
/// rejects with 429 once a client's window is exhausted. Installed by
/// `ServerBuilder::with_rate_limit`.
pub struct RateLimitMiddleware {
    limiter: RateLimiter,
}

impl RateLimitMiddleware {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config),
        }
    }
}

impl Middleware for RateLimitMiddleware {
    fn process<'a>(&'a self, ctx: &'a mut Context) -> Pin<Box<dyn Future<Output = Outcome> + Send + 'a>> {
        Box::pin(async move {
            let id = ctx.peer_addr.clone().unwrap_or_default();
            if self.limiter.is_allowed(&id) {
                return Outcome::Continue;
            }
            let err = RateLimitError::Denied(id);
            tracing::debug!(%err, "rate limit denied");
            ctx.response.status(StatusCode::TooManyRequests);
            let _ = ctx.response.write_json(&serde_json::json!({
                "error": err.to_string(),
                "code": "RATE_LIMITED",
            }));
            Outcome::Respond
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(60),
            max_requests,
            cleanup_interval: Duration::from_secs(60),
        })
    }

    #[test]
    fn admits_up_to_the_limit_then_denies() {
        let limiter = limiter(3);
        assert!(limiter.is_allowed("client-a"));
        assert!(limiter.is_allowed("client-a"));
        assert!(limiter.is_allowed("client-a"));
        assert!(!limiter.is_allowed("client-a"));
    }

    #[test]
    fn separate_clients_have_independent_windows() {
        let limiter = limiter(1);
        assert!(limiter.is_allowed("a"));
        assert!(limiter.is_allowed("b"));
        assert!(!limiter.is_allowed("a"));
    }

    #[test]
    fn expired_window_resets_the_counter() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_millis(50),
            max_requests: 1,
            cleanup_interval: Duration::from_secs(60),
        });
        assert!(limiter.is_allowed("a"));
        assert!(!limiter.is_allowed("a"));
        std::thread::sleep(Duration::from_millis(80));
        assert!(limiter.is_allowed("a"));
    }

    #[test]
    fn sweep_expired_drops_stale_entries() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_millis(50),
            max_requests: 5,
            cleanup_interval: Duration::from_secs(60),
        });
        limiter.is_allowed("a");
        std::thread::sleep(Duration::from_millis(80));
        limiter.sweep_expired();
        assert_eq!(limiter.windows.lock().len(), 0);
    }
}
