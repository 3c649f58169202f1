use std::env;
use std::time::Duration;

use crate::broker::topic::PublishPolicy;

// --- CONFIG AGGREGATOR ---

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
}

impl Config {
    /// Load configuration from the environment (after sourcing `.env`).
    /// Malformed values fall back to their defaults.
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Self {
            server: ServerConfig::load(),
            broker: BrokerConfig::load(),
        }
    }
}

// --- MODULES ---

// SERVER
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
    pub log_level: String,
}

impl ServerConfig {
    fn load() -> Self {
        Self {
            host:          get_env("SERVER_HOST", "0.0.0.0"),
            port:          get_env("SERVER_PORT", "8080"),
            write_timeout: Duration::from_secs(get_env("WRITE_TIMEOUT_SECS", "30")),
            read_timeout:  Duration::from_secs(get_env("READ_TIMEOUT_SECS", "60")),
            log_level:     get_env("LOG_LEVEL", "info"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            write_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            log_level: "info".to_string(),
        }
    }
}

// BROKER
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// History slots per new topic.
    pub history_capacity: usize,
    /// Outbound queue slots per subscriber pipeline.
    pub queue_capacity: usize,
    /// Overflow handling applied at fan-out.
    pub publish_policy: PublishPolicy,
}

impl BrokerConfig {
    fn load() -> Self {
        Self {
            history_capacity: get_env("HISTORY_CAPACITY", "1000"),
            queue_capacity:   get_env("SUBSCRIBER_QUEUE_CAPACITY", "100"),
            publish_policy:   PublishPolicy::parse(&get_env::<String>("PUBLISH_POLICY", "DROP_OLDEST")),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            queue_capacity: 100,
            publish_policy: PublishPolicy::DropOldest,
        }
    }
}

// --- PRIVATE HELPER ---

fn get_env<T: std::str::FromStr>(key: &str, default: &str) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| {
            default
                .parse()
                .map_err(|_| format!("Config error: default for {} must be valid", key))
                .unwrap()
        })
}
