//! Outbound connection pool, keyed by `"host:port"`. Acquire/release
//! bookkeeping is a short, lock-held map operation; the actual TCP
//! connect happens after the lock is dropped, per the no-lock-across-I/O
//! discipline spec.md §5 requires of every shared-state guard in this
//! crate.

use crate::config::PoolConfig;
use crate::errors::PoolError;
use crate::sync::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// A pooled outbound TCP connection. Ownership moves out of the pool on
/// `acquire` and back in on `release` — this crate doesn't need the
/// shared, ref-counted handle a connection multiplexer would.
#[derive(Debug)]
pub struct PooledConnection {
    pub stream: TcpStream,
    pub host: String,
    pub port: u16,
    created_at: Instant,
    last_used: Instant,
}

impl PooledConnection {
    fn is_expired(&self, config: &PoolConfig, now: Instant) -> bool {
        now.duration_since(self.last_used) >= config.max_idle_time
            || now.duration_since(self.created_at) >= config.max_lifetime
    }
}

#[derive(Default)]
struct KeyState {
    idle: Vec<PooledConnection>,
    total: usize,
}

/// Pools outbound connections grouped by destination. Cheaply shared via
/// `Arc` by callers and by the cleanup task.
pub struct ConnectionPool {
    keys: Mutex<HashMap<String, KeyState>>,
    config: PoolConfig,
}

fn pool_key(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Returns an idle connection for `host:port` if one is available and
    /// unexpired; otherwise opens a new one, failing with
    /// `PoolError::Exhausted` once `max_connections` for that key is hit.
    pub async fn acquire(&self, host: &str, port: u16) -> Result<PooledConnection, PoolError> {
        let key = pool_key(host, port);
        let now = Instant::now();

        {
            let mut keys = self.keys.lock();
            let state = keys.entry(key.clone()).or_default();
            while let Some(conn) = state.idle.pop() {
                if conn.is_expired(&self.config, now) {
                    state.total -= 1;
                    continue;
                }
                return Ok(conn);
            }
            if state.total >= self.config.max_connections {
                return Err(PoolError::Exhausted(key));
            }
            state.total += 1;
        }

        let addr = format!("{host}:{port}");
        let connect = TcpStream::connect(&addr);
        let stream = match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                self.rollback_reservation(&key);
                return Err(PoolError::Connect {
                    host: host.to_string(),
                    port,
                    source,
                });
            }
            Err(_) => {
                self.rollback_reservation(&key);
                return Err(PoolError::Connect {
                    host: host.to_string(),
                    port,
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                });
            }
        };
        let _ = stream.set_nodelay(true);

        let now = Instant::now();
        Ok(PooledConnection {
            stream,
            host: host.to_string(),
            port,
            created_at: now,
            last_used: now,
        })
    }

    fn rollback_reservation(&self, key: &str) {
        if let Some(state) = self.keys.lock().get_mut(key) {
            state.total = state.total.saturating_sub(1);
        }
    }

    /// Returns `conn` to its key's idle list, refreshing `last_used`, or
    /// closes it (dropping the stream) if the idle list is already at
    /// `max_idle_connections`.
    pub fn release(&self, mut conn: PooledConnection) {
        conn.last_used = Instant::now();
        let key = pool_key(&conn.host, conn.port);
        let mut keys = self.keys.lock();
        let state = keys.entry(key).or_default();
        if state.idle.len() < self.config.max_idle_connections {
            state.idle.push(conn);
        } else {
            state.total = state.total.saturating_sub(1);
            drop(conn);
        }
    }

    /// Closes and removes every expired idle connection across all keys.
    /// Called by `spawn_cleanup`'s loop.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        for state in keys.values_mut() {
            let before = state.idle.len();
            state.idle.retain(|conn| !conn.is_expired(&self.config, now));
            state.total -= before - state.idle.len();
        }
    }

    pub fn idle_count(&self, host: &str, port: u16) -> usize {
        self.keys
            .lock()
            .get(&pool_key(host, port))
            .map(|s| s.idle.len())
            .unwrap_or(0)
    }
}

/// Spawns the periodic idle-connection sweep at `config.cleanup_interval`.
pub fn spawn_cleanup(pool: std::sync::Arc<ConnectionPool>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            pool.sweep_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn echo_listener() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    use tokio::io::{AsyncReadExt, AsyncWriteExt};
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 || socket.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    fn config(max_connections: usize, max_idle_connections: usize) -> PoolConfig {
        PoolConfig {
            max_connections,
            max_idle_connections,
            max_idle_time: Duration::from_secs(90),
            max_lifetime: Duration::from_secs(30 * 60),
            connect_timeout: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn acquire_then_release_reuses_the_connection() {
        let addr = echo_listener().await;
        let pool = ConnectionPool::new(config(10, 10));

        let conn = pool.acquire(&addr.ip().to_string(), addr.port()).await.unwrap();
        pool.release(conn);
        assert_eq!(pool.idle_count(&addr.ip().to_string(), addr.port()), 1);

        let conn2 = pool.acquire(&addr.ip().to_string(), addr.port()).await.unwrap();
        assert_eq!(pool.idle_count(&addr.ip().to_string(), addr.port()), 0);
        pool.release(conn2);
    }

    #[tokio::test]
    async fn exhausted_pool_denies_further_acquires() {
        let addr = echo_listener().await;
        let pool = ConnectionPool::new(config(1, 1));
        let host = addr.ip().to_string();

        let conn = pool.acquire(&host, addr.port()).await.unwrap();
        let err = pool.acquire(&host, addr.port()).await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted(_)));
        pool.release(conn);
    }

    #[tokio::test]
    async fn release_beyond_max_idle_closes_the_connection() {
        let addr = echo_listener().await;
        let pool = ConnectionPool::new(config(10, 0));
        let host = addr.ip().to_string();

        let conn = pool.acquire(&host, addr.port()).await.unwrap();
        pool.release(conn);
        assert_eq!(pool.idle_count(&host, addr.port()), 0);
    }

    #[tokio::test]
    async fn sweep_expired_removes_stale_idle_connections() {
        let addr = echo_listener().await;
        let mut cfg = config(10, 10);
        cfg.max_idle_time = Duration::from_millis(10);
        let pool = ConnectionPool::new(cfg);
        let host = addr.ip().to_string();

        let conn = pool.acquire(&host, addr.port()).await.unwrap();
        pool.release(conn);
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.sweep_expired();
        assert_eq!(pool.idle_count(&host, addr.port()), 0);
    }
}
