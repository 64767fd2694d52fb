use std::{env, str::FromStr, time::Duration};

use crate::{
    circuit_breaker::CircuitBreakerConfig,
    db::DEFAULT_MEMORY_DATABASE_URL,
    error_handling::ConfigError,
    health::HealthMonitorConfig,
    payment_processors::service::{PAYMENT_PROCESSOR_DEFAULT_URL, PAYMENT_PROCESSOR_FALLBACK_URL},
    router::{RouterConfig, RoutingPolicy},
    worker::WorkerConfig,
};

/// Value of `MEMORY_DATABASE_URL` that selects the in-process store.
pub const IN_MEMORY_URL: &str = "memory://";

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub memory_database_url: String,
    /// When set, payment records go to Postgres instead of Redis.
    pub database_url: Option<String>,
    pub default_processor_url: String,
    pub fallback_processor_url: String,
    pub num_workers: usize,
    pub circuit: CircuitBreakerConfig,
    pub health: HealthMonitorConfig,
    pub router: RouterConfig,
    pub worker: WorkerConfig,
}

/// Source of raw configuration values, keyed by variable name.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|value| !value.trim().is_empty())
    }
}

impl<F: Fn(&str) -> Option<String>> ConfigSource for F {
    fn get(&self, key: &str) -> Option<String> {
        self(key)
    }
}

fn parse<T>(source: &impl ConfigSource, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match source.get(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value,
            reason: e.to_string(),
        }),
    }
}

fn millis(source: &impl ConfigSource, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    parse(source, key, default).map(Duration::from_millis)
}

fn string(source: &impl ConfigSource, key: &str, default: &str) -> String {
    source.get(key).unwrap_or_else(|| default.to_string())
}

impl Settings {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_source(&EnvSource)
    }

    pub fn from_source(source: &impl ConfigSource) -> Result<Self, ConfigError> {
        let policy = match string(source, "ROUTING_POLICY", "circuit").as_str() {
            "circuit" => RoutingPolicy::CircuitAware,
            "latency" => RoutingPolicy::LatencyWeighted {
                tolerance: parse(source, "LATENCY_TOLERANCE", 0.5)?,
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "ROUTING_POLICY",
                    value: other.to_string(),
                    reason: "expected \"circuit\" or \"latency\"".to_string(),
                })
            }
        };

        let batch_size: usize = parse(source, "QUEUE_BATCH_SIZE", 5)?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "QUEUE_BATCH_SIZE",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let failure_threshold: u32 = parse(source, "CIRCUIT_FAILURE_THRESHOLD", 1)?;
        if failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                key: "CIRCUIT_FAILURE_THRESHOLD",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            port: parse(source, "PORT", 9999)?,
            memory_database_url: string(source, "MEMORY_DATABASE_URL", DEFAULT_MEMORY_DATABASE_URL),
            database_url: source.get("DATABASE_URL"),
            default_processor_url: string(
                source,
                "PAYMENT_PROCESSOR_DEFAULT_URL",
                PAYMENT_PROCESSOR_DEFAULT_URL,
            ),
            fallback_processor_url: string(
                source,
                "PAYMENT_PROCESSOR_FALLBACK_URL",
                PAYMENT_PROCESSOR_FALLBACK_URL,
            ),
            num_workers: parse(source, "NUM_WORKERS", 4)?,
            circuit: CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout: millis(source, "CIRCUIT_RECOVERY_TIMEOUT_MS", 6000)?,
            },
            health: HealthMonitorConfig {
                ttl: millis(source, "HEALTH_CACHE_TTL_MS", 5000)?,
                probe_timeout: millis(source, "HEALTH_PROBE_TIMEOUT_MS", 500)?,
                designated_refresher: string(source, "INSTANCE", "MASTER") == "MASTER",
                wait_interval: millis(source, "HEALTH_WAIT_MS", 50)?,
            },
            router: RouterConfig {
                timeout_ceiling: millis(source, "DELIVERY_TIMEOUT_CEILING_MS", 500)?,
                timeout_floor: millis(source, "DELIVERY_TIMEOUT_FLOOR_MS", 100)?,
                timeout_multiplier: parse(source, "DELIVERY_TIMEOUT_MULTIPLIER", 1.5)?,
                policy,
            },
            worker: WorkerConfig {
                batch_size,
                retry_ceiling: parse(source, "QUEUE_RETRY_CEILING", 5)?,
                timeout_retries: parse(source, "TIMEOUT_RETRIES", 3)?,
                timeout_retry_delay: millis(source, "TIMEOUT_RETRY_DELAY_MS", 50)?,
                idle_backoff: millis(source, "IDLE_BACKOFF_MS", 1)?,
                failure_backoff: millis(source, "FAILURE_BACKOFF_MS", 20)?,
                selection_window: millis(source, "SELECTION_CACHE_MS", 2000)?,
            },
        })
    }
}
