//! Server configuration module
//!
//! Process-level settings come from environment variables with defaults. The
//! wallet provider itself is configured by the JSON file named in
//! `WALLET_PROVIDER_CONFIG`.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 8080)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: [u8; 4],
    /// Allowed CORS origins, comma-separated (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request body limit in KiB (default: 256)
    pub body_limit_kb: usize,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// How often expired challenges are swept, in seconds (default: 60)
    pub challenge_sweep_interval_secs: u64,
    /// Per-IP rate limiting (default: false here, true from the environment)
    pub rate_limit_enabled: bool,
    /// Seconds after which one request of the quota is replenished (default: 1)
    pub rate_limit_per_sec: u64,
    /// Requests a client may make in a burst (default: 20)
    pub rate_limit_burst: u32,
    /// Path of the wallet provider JSON configuration
    pub wallet_provider_config: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            host: [127, 0, 0, 1],
            allowed_origins: None,
            body_limit_kb: 256,
            timeout_secs: 30,
            challenge_sweep_interval_secs: 60,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 1,
            rate_limit_burst: 20,
            wallet_provider_config: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|h| h.parse::<Ipv4Addr>().ok())
            .map(|ip| ip.octets())
            .unwrap_or(defaults.host);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS").ok().map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        let body_limit_kb = std::env::var("BODY_LIMIT_KB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.body_limit_kb);

        let timeout_secs = std::env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.timeout_secs);

        let challenge_sweep_interval_secs = std::env::var("CHALLENGE_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .unwrap_or(defaults.challenge_sweep_interval_secs);

        let rate_limit_per_sec = std::env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .unwrap_or(defaults.rate_limit_per_sec);

        let rate_limit_burst = std::env::var("RATE_LIMIT_BURST")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|burst: &u32| *burst > 0)
            .unwrap_or(defaults.rate_limit_burst);

        // Enabled unless RATE_LIMIT_ENABLED=false
        let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let wallet_provider_config = std::env::var("WALLET_PROVIDER_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Self {
            port,
            host,
            allowed_origins,
            body_limit_kb,
            timeout_secs,
            challenge_sweep_interval_secs,
            rate_limit_enabled,
            rate_limit_per_sec,
            rate_limit_burst,
            wallet_provider_config,
        }
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }
}
