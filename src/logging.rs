//! Structured logging init, ambient stack per the corpus (`tracing` +
//! `tracing-subscriber`'s `env-filter`), even though spec's Non-goals
//! exclude the higher-level logging middleware that would normally be
//! the primary consumer.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber driven by `RUST_LOG`, falling
/// back to `default_level` (e.g. `"info"`) when unset.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
