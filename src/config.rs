//! Configuration loaded from environment variables
//!
//! Every binary gets its own validated struct. `from_env()` reads the process
//! environment; `from_lookup()` takes any key lookup so tests can supply a map
//! instead of mutating process-wide state.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP port for the service
pub const DEFAULT_PORT: u16 = 8080;

/// Default simulated startup work
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(5);

/// Default simulated cleanup work during shutdown
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_secs(75);

/// Default deadline for the HTTP server to stop
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Default lower bound of the simulated per-message work
pub const DEFAULT_MIN_SLEEP_SECONDS: u64 = 3;

/// Default upper bound of the simulated per-message work
pub const DEFAULT_MAX_SLEEP_SECONDS: u64 = 5;

/// Default idle window before the consumer gives up
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause before terminating a consumer that saw no messages
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Default prefix for produced messages
pub const DEFAULT_MESSAGE_PREFIX: &str = "Message";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("Invalid {var} value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings for the probe/estimator HTTP service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub port: u16,
    pub warmup: Duration,
    pub cleanup_delay: Duration,
    pub shutdown_timeout: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            port: optional(&lookup, "PORT")?.unwrap_or(DEFAULT_PORT),
            warmup: optional_seconds(&lookup, "WARMUP_SECONDS")?.unwrap_or(DEFAULT_WARMUP),
            cleanup_delay: optional_seconds(&lookup, "CLEANUP_SECONDS")?
                .unwrap_or(DEFAULT_CLEANUP_DELAY),
            shutdown_timeout: optional_seconds(&lookup, "SHUTDOWN_TIMEOUT_SECONDS")?
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
        })
    }
}

/// Settings for the batch consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub amqp_url: String,
    pub queue_name: String,
    /// Batch limit, also announced to the broker as the prefetch count
    pub batch_size: u16,
    pub min_sleep: Duration,
    pub max_sleep: Duration,
    pub idle_timeout: Duration,
    pub grace_period: Duration,
    /// Port for an optional `/metrics` endpoint
    pub metrics_port: Option<u16>,
}

impl ConsumerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let batch_size: u16 = required(&lookup, "BATCH_SIZE")?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                var: "BATCH_SIZE",
                value: batch_size.to_string(),
                reason: "must be a positive integer".to_string(),
            });
        }

        let min_sleep = optional(&lookup, "MIN_SLEEP_TIME")?.unwrap_or(DEFAULT_MIN_SLEEP_SECONDS);
        let max_sleep = optional(&lookup, "MAX_SLEEP_TIME")?.unwrap_or(DEFAULT_MAX_SLEEP_SECONDS);
        if max_sleep < min_sleep {
            return Err(ConfigError::Invalid {
                var: "MAX_SLEEP_TIME",
                value: max_sleep.to_string(),
                reason: format!("must be at least MIN_SLEEP_TIME ({})", min_sleep),
            });
        }

        let idle_timeout =
            optional_seconds(&lookup, "TIMEOUT_DURATION")?.unwrap_or(DEFAULT_IDLE_TIMEOUT);
        if idle_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "TIMEOUT_DURATION",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            amqp_url: required_string(&lookup, "RABBITMQ_URL")?,
            queue_name: required_string(&lookup, "QUEUE_NAME")?,
            batch_size,
            min_sleep: Duration::from_secs(min_sleep),
            max_sleep: Duration::from_secs(max_sleep),
            idle_timeout,
            grace_period: optional_seconds(&lookup, "GRACE_PERIOD")?
                .unwrap_or(DEFAULT_GRACE_PERIOD),
            metrics_port: optional(&lookup, "METRICS_PORT")?,
        })
    }
}

/// Settings for the queue producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    pub amqp_url: String,
    pub queue_name: String,
    pub message_count: u32,
    pub message_prefix: String,
}

impl ProducerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            amqp_url: required_string(&lookup, "RABBITMQ_URL")?,
            queue_name: required_string(&lookup, "QUEUE_NAME")?,
            message_count: required(&lookup, "MESSAGE_COUNT")?,
            message_prefix: lookup("MESSAGE_PREFIX")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_MESSAGE_PREFIX.to_string()),
        })
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Empty values count as unset
fn required_string(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<String, ConfigError> {
    lookup(var)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn required<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = required_string(lookup, var)?;
    parse(var, value)
}

fn optional<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var).filter(|v| !v.is_empty()) {
        Some(value) => parse(var, value).map(Some),
        None => Ok(None),
    }
}

fn optional_seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(optional::<u64>(lookup, var)?.map(Duration::from_secs))
}

fn parse<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        })
}
