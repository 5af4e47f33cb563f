use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

// Top-level configuration, one section per concern
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub store: StoreConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub reservation: ReservationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub pool_size: u32,
    pub acquire_timeout_seconds: u64,
}

// Redis is optional: without it availability reads go straight to the store
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub capacity_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationConfig {
    pub lock_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    /// 0 disables the periodic ledger audit.
    pub ledger_audit_interval_seconds: u64,
    pub verify_ledger_on_startup: bool,
}

impl ReservationConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            app: AppConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                environment: "development".to_string(),
                rust_log: "room_reservations=debug,tower_http=debug".to_string(),
                log_format: LogFormat::Pretty,
                request_timeout_seconds: 60,
            },
            store: StoreConfig {
                backend: StoreBackend::Postgres,
            },
            database: DatabaseConfig {
                url: None,
                pool_size: 20,
                acquire_timeout_seconds: 5,
            },
            redis: RedisConfig {
                url: None,
                capacity_ttl_seconds: 5,
            },
            reservation: ReservationConfig {
                lock_timeout_ms: 2000,
                max_attempts: 3,
                retry_backoff_ms: 50,
                ledger_audit_interval_seconds: 300,
                verify_ledger_on_startup: true,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let config = Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or(defaults.app.host),
                port: parse_var("PORT", defaults.app.port)?,
                environment: env::var("ENVIRONMENT").unwrap_or(defaults.app.environment),
                rust_log: env::var("RUST_LOG").unwrap_or(defaults.app.rust_log),
                log_format: parse_var("LOG_FORMAT", defaults.app.log_format)?,
                request_timeout_seconds: parse_var(
                    "REQUEST_TIMEOUT_SECONDS",
                    defaults.app.request_timeout_seconds,
                )?,
            },
            store: StoreConfig {
                backend: parse_var("STORE_BACKEND", defaults.store.backend)?,
            },
            database: DatabaseConfig {
                url: optional_var("DATABASE_URL"),
                pool_size: parse_var("DB_POOL_SIZE", defaults.database.pool_size)?,
                acquire_timeout_seconds: parse_var(
                    "DB_ACQUIRE_TIMEOUT_SECONDS",
                    defaults.database.acquire_timeout_seconds,
                )?,
            },
            redis: RedisConfig {
                url: optional_var("REDIS_URL"),
                capacity_ttl_seconds: parse_var(
                    "CAPACITY_CACHE_TTL_SECONDS",
                    defaults.redis.capacity_ttl_seconds,
                )?,
            },
            reservation: ReservationConfig {
                lock_timeout_ms: parse_var("LOCK_TIMEOUT_MS", defaults.reservation.lock_timeout_ms)?,
                max_attempts: parse_var(
                    "RESERVE_MAX_ATTEMPTS",
                    defaults.reservation.max_attempts,
                )?,
                retry_backoff_ms: parse_var(
                    "RESERVE_RETRY_BACKOFF_MS",
                    defaults.reservation.retry_backoff_ms,
                )?,
                ledger_audit_interval_seconds: parse_var(
                    "LEDGER_AUDIT_INTERVAL_SECONDS",
                    defaults.reservation.ledger_audit_interval_seconds,
                )?,
                verify_ledger_on_startup: parse_var(
                    "VERIFY_LEDGER_ON_STARTUP",
                    defaults.reservation.verify_ledger_on_startup,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.backend == StoreBackend::Postgres && self.database.url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        if self.reservation.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "RESERVE_MAX_ATTEMPTS",
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        if self.reservation.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "LOCK_TIMEOUT_MS",
                value: "0".to_string(),
                reason: "a zero timeout would reject every contended reservation".to_string(),
            });
        }
        Ok(())
    }
}

fn optional_var(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        None => Ok(default),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        },
    }
}
