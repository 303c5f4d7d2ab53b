use std::env;
use std::time::Duration;

use crate::transcript::GroupPolicy;

/// Tidepool application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// The runner server address (defaults to "127.0.0.1:8000")
    pub server: String,
    /// Delay before a reconnect attempt after channel loss
    pub reconnect_delay: Duration,
    /// Output grouping thresholds
    pub grouping: GroupPolicy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let server =
            env::var("TIDEPOOL_SERVER").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
        // Normalize localhost to IPv4 to avoid IPv6 (::1) preference on macOS
        let server = if server.starts_with("localhost:") {
            server.replacen("localhost", "127.0.0.1", 1)
        } else {
            server
        };
        let reconnect_delay =
            Duration::from_millis(env_parse("TIDEPOOL_RECONNECT_DELAY_MS", 10_000));
        let grouping = GroupPolicy::from_rate_per_second(
            env_parse("TIDEPOOL_GROUP_MIN_SIZE", 10),
            env_parse("TIDEPOOL_GROUP_RATE", 10.0),
            env_parse("TIDEPOOL_GROUP_SEPARATION_MS", 1000),
        );
        Self {
            server,
            reconnect_delay,
            grouping,
        }
    }

    /// Websocket endpoint derived from the server address
    pub fn endpoint(&self) -> String {
        format!("ws://{}/ws", self.server)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:8000".to_string(),
            reconnect_delay: Duration::from_millis(10_000),
            grouping: GroupPolicy::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
