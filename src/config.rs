//! Server configuration.
//!
//! `ServerConfig` is the public entry point; it decomposes into the
//! teacher's fine-grained limit groups (`ConnLimits`, `ReqLimits`,
//! `RespLimits`) plus the groups this crate's additional subsystems need
//! (`SessionConfig`, `PoolConfig`, `RateLimitConfig`). Every group follows
//! the teacher's "unwrap to a sane default" `Default` convention.

use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub conn: ConnLimits,
    pub req: ReqLimits,
    pub resp: RespLimits,
    pub session: SessionConfig,
    pub pool: PoolConfig,
    pub rate_limit: RateLimitConfig,
    pub static_root: Option<PathBuf>,
    pub static_prefix: String,
    pub enable_logging: bool,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 8080,
            conn: ConnLimits::default(),
            req: ReqLimits::default(),
            resp: RespLimits::default(),
            session: SessionConfig::default(),
            pool: PoolConfig::default(),
            rate_limit: RateLimitConfig::default(),
            static_root: None,
            static_prefix: "/static".to_string(),
            enable_logging: true,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Loads overrides from the environment variables named in the
    /// external-interfaces contract, falling back to `Default` on
    /// absence or parse failure — the teacher's convention for every
    /// limit group's own `Default` impl.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(host) = env_parse::<IpAddr>("SERVER_HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse::<u16>("SERVER_PORT") {
            config.port = port;
        }
        if let Some(max) = env_parse::<usize>("MAX_CONNECTIONS") {
            config.conn.max_connections = max;
        }
        if let Some(ms) = env_parse::<u64>("REQUEST_TIMEOUT_MS") {
            config.conn.request_timeout = Duration::from_millis(ms);
        }
        if let Ok(root) = env::var("STATIC_ROOT") {
            config.static_root = Some(PathBuf::from(root));
        }
        if let Ok(prefix) = env::var("STATIC_PREFIX") {
            config.static_prefix = prefix;
        }
        if let Some(enabled) = env_parse::<bool>("ENABLE_LOGGING") {
            config.enable_logging = enabled;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Per-connection timeouts and concurrency limits.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    pub max_connections: usize,
    pub request_timeout: Duration,
    pub connection_timeout: Duration,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub shutdown_drain_timeout: Duration,
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            request_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(60),
            read_buffer_size: 8 * 1024,
            write_buffer_size: 8 * 1024,
            shutdown_drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Request-side size limits.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    pub max_header_size: usize,
    pub max_header_count: usize,
    pub max_body_size: usize,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            max_header_size: 8 * 1024,
            max_header_count: 100,
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Response buffer sizing.
#[derive(Debug, Clone)]
pub struct RespLimits {
    pub default_capacity: usize,
    pub max_capacity: usize,
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 4 * 1024,
            max_capacity: 16 * 1024 * 1024,
        }
    }
}

/// Session cookie and store configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub max_age: Duration,
    pub cleanup_interval: Duration,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: &'static str,
    pub file_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session_id".to_string(),
            max_age: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(300),
            secure: true,
            http_only: true,
            same_site: "Lax",
            file_dir: None,
        }
    }
}

/// Outbound connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub max_idle_connections: usize,
    pub max_idle_time: Duration,
    pub max_lifetime: Duration,
    pub connect_timeout: Duration,
    pub cleanup_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_idle_connections: 10,
            max_idle_time: Duration::from_secs(90),
            max_lifetime: Duration::from_secs(30 * 60),
            connect_timeout: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

/// Fixed-window rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 100,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.req.max_body_size, 10 * 1024 * 1024);
    }

    #[test]
    fn from_env_falls_back_on_missing_vars() {
        env::remove_var("SERVER_PORT_TEST_UNSET");
        assert_eq!(env_parse::<u16>("SERVER_PORT_TEST_UNSET"), None);
    }
}
