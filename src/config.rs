use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Games replayed in parallel during cache warm-up.
    pub warmup_concurrency: usize,
}

/// PostgreSQL configuration. `configured` is false when no DB_HOST was
/// provided; the binary then falls back to the in-memory repository.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub sslmode: String,
    pub configured: bool,
}

/// Broker and pipeline configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub brokers: Vec<String>,
    pub scores_topic: String,
    pub consumer_group_base: String,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    /// Unique id of this process instance; every instance forms its own
    /// consumer group so each cache sees the full stream.
    pub instance_id: String,
}

impl BrokerConfig {
    pub fn consumer_group(&self) -> String {
        format!("{}-{}", self.consumer_group_base, self.instance_id)
    }
}

/// Background compaction configuration.
#[derive(Debug, Clone)]
pub struct CompactionSettings {
    pub enabled: bool,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub compaction: CompactionSettings,
}

impl AppConfig {
    /// Reads the configuration from environment variables, defaulting
    /// every value so a bare `cargo run` works.
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: get_env("SERVER_HOST", "127.0.0.1"),
                port: get_env_as("SERVER_PORT", 8080),
                warmup_concurrency: get_env_as("CACHE_WARMUP_CONCURRENCY", 8),
            },
            database: DatabaseConfig {
                host: get_env("DB_HOST", "localhost"),
                port: get_env_as("DB_PORT", 5432),
                user: get_env("DB_USER", "postgres"),
                password: get_env("DB_PASSWORD", "postgres"),
                name: get_env("DB_NAME", "leaderboard"),
                sslmode: get_env("DB_SSLMODE", "disable"),
                configured: std::env::var("DB_HOST").is_ok(),
            },
            broker: BrokerConfig {
                brokers: get_env("BROKER_ADDRS", "localhost:9092")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                scores_topic: get_env("BROKER_SCORES_TOPIC", "leaderboard-scores"),
                consumer_group_base: get_env("BROKER_CONSUMER_GROUP", "score-processor"),
                batch_size: get_env_as("BROKER_BATCH_SIZE", 5000),
                batch_timeout: Duration::from_secs(get_env_as("BROKER_BATCH_TIMEOUT_SECS", 5)),
                instance_id: instance_id(),
            },
            compaction: CompactionSettings {
                enabled: get_env_as("COMPACTION_ENABLED", false),
                interval: Duration::from_secs(get_env_as("COMPACTION_INTERVAL_SECS", 300)),
            },
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_as<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!(key, value = %value, "Environment variable failed to parse, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Identity of this process instance: `SERVICE_ID`, then the host name,
/// then a timestamp as a last resort.
fn instance_id() -> String {
    if let Ok(id) = std::env::var("SERVICE_ID") {
        if !id.is_empty() {
            return id;
        }
    }
    if let Ok(hostname) = std::env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }
    format!("service-{}", Utc::now().timestamp_millis())
}
