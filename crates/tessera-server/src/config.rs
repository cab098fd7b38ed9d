//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::time::Duration;

use tessera_proto::constants::DEFAULT_HISTORY_LIMIT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the WebSocket + HTTP endpoint.
    /// Env: `WS_ADDR`
    /// Default: `0.0.0.0:8080`
    pub ws_addr: SocketAddr,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Tessera"`
    pub instance_name: String,

    /// How long a pending authentication challenge may stay unanswered
    /// before the session is evicted and its socket closed.
    /// Env: `CHALLENGE_TIMEOUT_SECS`
    /// Default: 60
    pub challenge_timeout: Duration,

    /// History ring size for user-created channels that do not specify one.
    /// Env: `HISTORY_LIMIT`
    /// Default: 5
    pub history_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_addr: ([0, 0, 0, 0], 8080).into(),
            instance_name: "Tessera".to_string(),
            challenge_timeout: Duration::from_secs(60),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("WS_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.ws_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid WS_ADDR, using default");
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Ok(val) = std::env::var("CHALLENGE_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.challenge_timeout = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("HISTORY_LIMIT") {
            if let Ok(n) = val.parse::<usize>() {
                config.history_limit = n;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.ws_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.challenge_timeout, Duration::from_secs(60));
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
    }
}
