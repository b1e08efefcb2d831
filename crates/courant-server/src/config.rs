//! Hub configuration.
//!
//! Everything is read from environment variables with working defaults, so
//! a bare `courant-server` starts for local development. A malformed value
//! logs a warning and falls back rather than aborting startup.

use std::net::SocketAddr;
use std::str::FromStr;

/// Runtime settings for the hub.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WebSocket listener (`HTTP_ADDR`).
    pub http_addr: SocketAddr,
    /// Per-connection outbox depth (`CHANNEL_CAPACITY`). A connection that
    /// falls this many frames behind starts dropping pushes; snapshot
    /// semantics and the reconciliation fetch recover the state.
    pub channel_capacity: usize,
    /// Human-readable instance name reported on `/info` (`INSTANCE_NAME`).
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            channel_capacity: 64,
            instance_name: "Courant Hub".to_string(),
        }
    }
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "unparseable setting, using default");
                default
            }
        },
        Err(_) => default,
    }
}

impl ServerConfig {
    /// Load settings from the environment. `RUST_LOG` is consumed directly
    /// by the tracing `EnvFilter` and is not tracked here.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut config = Self {
            http_addr: env_parsed("HTTP_ADDR", defaults.http_addr),
            channel_capacity: env_parsed("CHANNEL_CAPACITY", defaults.channel_capacity),
            instance_name: std::env::var("INSTANCE_NAME").unwrap_or(defaults.instance_name),
        };

        if config.channel_capacity == 0 {
            tracing::warn!("CHANNEL_CAPACITY must be positive, using default");
            config.channel_capacity = Self::default().channel_capacity;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.channel_capacity, 64);
        assert_eq!(config.instance_name, "Courant Hub");
    }

    #[test]
    fn test_env_parsed_falls_back_on_garbage() {
        std::env::set_var("COURANT_TEST_CAP", "not-a-number");
        assert_eq!(env_parsed("COURANT_TEST_CAP", 64usize), 64);
        std::env::remove_var("COURANT_TEST_CAP");
    }
}
