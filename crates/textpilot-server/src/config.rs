//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::time::Duration;

use textpilot_shared::constants::{
    APP_NAME, DEFAULT_DEDUP_WINDOW, DEFAULT_HTTP_PORT, LOOKUP_CACHE_TTL_SECS,
    QR_POLL_INTERVAL_MS, READY_POLL_INTERVAL_MS, SSE_KEEPALIVE_SECS,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8082`
    pub http_addr: SocketAddr,

    /// Human-readable name for this instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Env: `QR_POLL_INTERVAL_MS`
    pub qr_poll_interval: Duration,

    /// Env: `READY_POLL_INTERVAL_MS`
    pub ready_poll_interval: Duration,

    /// How many recent message ids the broker remembers for dedup.
    /// Env: `DEDUP_WINDOW`
    pub dedup_window: usize,

    /// Env: `SSE_KEEPALIVE_SECS`
    pub sse_keepalive: Duration,

    /// Env: `LOOKUP_CACHE_TTL_SECS`
    pub lookup_cache_ttl: chrono::Duration,

    // -- Simulated account --

    /// Delay before the simulated account pairs on its own (0 = never).
    /// Env: `SIM_PAIRING_DELAY_MS`
    pub sim_pairing_delay: Option<Duration>,

    /// Env: `SIM_ECHO_SENT` (true/false)
    pub sim_echo_sent: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            instance_name: APP_NAME.to_string(),
            qr_poll_interval: Duration::from_millis(QR_POLL_INTERVAL_MS),
            ready_poll_interval: Duration::from_millis(READY_POLL_INTERVAL_MS),
            dedup_window: DEFAULT_DEDUP_WINDOW,
            sse_keepalive: Duration::from_secs(SSE_KEEPALIVE_SECS),
            lookup_cache_ttl: chrono::Duration::seconds(LOOKUP_CACHE_TTL_SECS),
            sim_pairing_delay: Some(Duration::from_millis(5_000)),
            sim_echo_sent: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(name) = var("INSTANCE_NAME") {
            if !name.is_empty() {
                config.instance_name = name;
            }
        }

        if let Some(ms) = parse_number::<u64>(&var, "QR_POLL_INTERVAL_MS") {
            config.qr_poll_interval = Duration::from_millis(ms.max(1));
        }

        if let Some(ms) = parse_number::<u64>(&var, "READY_POLL_INTERVAL_MS") {
            config.ready_poll_interval = Duration::from_millis(ms.max(1));
        }

        if let Some(n) = parse_number::<usize>(&var, "DEDUP_WINDOW") {
            config.dedup_window = n.max(1);
        }

        if let Some(secs) = parse_number::<u64>(&var, "SSE_KEEPALIVE_SECS") {
            config.sse_keepalive = Duration::from_secs(secs.max(1));
        }

        if let Some(secs) = parse_number::<i64>(&var, "LOOKUP_CACHE_TTL_SECS") {
            match chrono::TimeDelta::try_seconds(secs.max(0)) {
                Some(ttl) => config.lookup_cache_ttl = ttl,
                None => tracing::warn!(
                    value = secs,
                    "LOOKUP_CACHE_TTL_SECS out of range, using default"
                ),
            }
        }

        if let Some(ms) = parse_number::<u64>(&var, "SIM_PAIRING_DELAY_MS") {
            config.sim_pairing_delay = (ms > 0).then(|| Duration::from_millis(ms));
        }

        if let Some(val) = var("SIM_ECHO_SENT") {
            config.sim_echo_sent = parse_bool(&val);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_number<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse::<T>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid number, using default");
            None
        }
    }
}

fn parse_bool(val: &str) -> bool {
    val != "false" && val != "0"
}
