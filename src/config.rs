//! Configuration module for the live metrics agent.
//!
//! This module provides environment-based configuration for the agent:
//! the collection endpoint, the coordinator's ping/post/error intervals,
//! the HTTP request timeout and the telemetry buffer capacity.

use std::env;
use std::time::Duration;

/// Default collection service URL
const DEFAULT_ENDPOINT: &str = "http://localhost:8000";

/// Default instance name reported in pings and batches
const DEFAULT_INSTANCE: &str = "live-metrics-agent";

/// Default wait between pings while nobody is watching
const DEFAULT_PING_INTERVAL_MS: u64 = 5_000;

/// Default wait between posts while streaming
const DEFAULT_POST_INTERVAL_MS: u64 = 1_000;

/// Default wait after a failed ping or post
const DEFAULT_ERROR_INTERVAL_MS: u64 = 40_000;

/// Default HTTP request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Default number of telemetry items held between posts
const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

/// Upper bound for any coordinator interval
const MAX_INTERVAL_MS: u64 = 600_000;

/// Upper bound for the request timeout
const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Upper bound for the buffer capacity to prevent memory issues
const MAX_BUFFER_CAPACITY: usize = 100_000;

/// Wait intervals driving the coordinator loop.
///
/// All three must be strictly positive; [`IntervalConfig::validate`] is
/// checked when a coordinator is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalConfig {
    /// Wait between pings while the service is idle
    pub ping_interval: Duration,

    /// Wait between fetch+send cycles while the service is active
    pub post_interval: Duration,

    /// Wait after any failed ping, fetch or send
    pub error_interval: Duration,
}

impl IntervalConfig {
    pub fn new(ping_interval: Duration, post_interval: Duration, error_interval: Duration) -> Self {
        Self {
            ping_interval,
            post_interval,
            error_interval,
        }
    }

    /// Convenience constructor taking milliseconds.
    pub fn from_millis(ping_ms: u64, post_ms: u64, error_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(ping_ms),
            Duration::from_millis(post_ms),
            Duration::from_millis(error_ms),
        )
    }

    /// Reject zero intervals.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("ping interval", self.ping_interval),
            ("post interval", self.post_interval),
            ("error interval", self.error_interval),
        ];

        for (name, interval) in checks {
            if interval.is_zero() {
                return Err(ConfigError {
                    message: format!("{} must be greater than 0", name),
                    env_var: None,
                });
            }
        }

        Ok(())
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self::from_millis(
            DEFAULT_PING_INTERVAL_MS,
            DEFAULT_POST_INTERVAL_MS,
            DEFAULT_ERROR_INTERVAL_MS,
        )
    }
}

/// Configuration for the live metrics agent.
///
/// All settings can be configured via environment variables:
/// - `LIVE_METRICS_ENDPOINT`: collection service URL (default: http://localhost:8000)
/// - `LIVE_METRICS_INSTANCE`: instance name (default: live-metrics-agent)
/// - `LIVE_METRICS_PING_INTERVAL_MS`: wait between pings (default: 5000)
/// - `LIVE_METRICS_POST_INTERVAL_MS`: wait between posts (default: 1000)
/// - `LIVE_METRICS_ERROR_INTERVAL_MS`: wait after failures (default: 40000)
/// - `LIVE_METRICS_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 5)
/// - `LIVE_METRICS_BUFFER_CAPACITY`: items kept between posts (default: 10000)
#[derive(Debug, Clone)]
pub struct Config {
    /// Default base URL of the collection service
    pub endpoint: String,

    /// Name this agent reports itself under
    pub instance: String,

    /// Coordinator intervals
    pub intervals: IntervalConfig,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// Maximum number of telemetry items carried into one batch
    pub buffer_capacity: usize,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but is not a valid number,
    /// is outside its allowed range, or if the endpoint is not an http(s) URL.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use live_metrics_agent::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Endpoint: {}", config.endpoint);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = Self::parse_endpoint()?;

        let instance = env::var("LIVE_METRICS_INSTANCE")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|_| DEFAULT_INSTANCE.to_string());
        if instance.is_empty() {
            return Err(ConfigError {
                message: "instance name must not be empty".to_string(),
                env_var: Some("LIVE_METRICS_INSTANCE".to_string()),
            });
        }

        let intervals = IntervalConfig::from_millis(
            parse_ranged(
                "LIVE_METRICS_PING_INTERVAL_MS",
                DEFAULT_PING_INTERVAL_MS,
                1,
                MAX_INTERVAL_MS,
            )?,
            parse_ranged(
                "LIVE_METRICS_POST_INTERVAL_MS",
                DEFAULT_POST_INTERVAL_MS,
                1,
                MAX_INTERVAL_MS,
            )?,
            parse_ranged(
                "LIVE_METRICS_ERROR_INTERVAL_MS",
                DEFAULT_ERROR_INTERVAL_MS,
                1,
                MAX_INTERVAL_MS,
            )?,
        );

        let request_timeout = Duration::from_secs(parse_ranged(
            "LIVE_METRICS_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
            1,
            MAX_REQUEST_TIMEOUT_SECS,
        )?);

        let buffer_capacity = parse_ranged(
            "LIVE_METRICS_BUFFER_CAPACITY",
            DEFAULT_BUFFER_CAPACITY as u64,
            1,
            MAX_BUFFER_CAPACITY as u64,
        )? as usize;

        Ok(Self {
            endpoint,
            instance,
            intervals,
            request_timeout,
            buffer_capacity,
        })
    }

    /// Load and normalize the endpoint URL.
    fn parse_endpoint() -> Result<String, ConfigError> {
        let env_var = "LIVE_METRICS_ENDPOINT";
        let endpoint = env::var(env_var).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let endpoint = endpoint.trim().trim_end_matches('/').to_string();

        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError {
                message: format!("'{}' is not an http(s) URL", endpoint),
                env_var: Some(env_var.to_string()),
            });
        }

        Ok(endpoint)
    }
}

/// Parse an optional numeric variable and check it against `min..=max`.
fn parse_ranged(env_var: &str, default: u64, min: u64, max: u64) -> Result<u64, ConfigError> {
    match env::var(env_var) {
        Ok(value) => {
            let parsed: u64 = value.trim().parse().map_err(|_| ConfigError {
                message: format!("'{}' is not a valid number", value),
                env_var: Some(env_var.to_string()),
            })?;

            if parsed < min {
                return Err(ConfigError {
                    message: format!("{} is below minimum ({})", parsed, min),
                    env_var: Some(env_var.to_string()),
                });
            }

            if parsed > max {
                return Err(ConfigError {
                    message: format!("{} exceeds maximum ({})", parsed, max),
                    env_var: Some(env_var.to_string()),
                });
            }

            Ok(parsed)
        }
        Err(_) => Ok(default),
    }
}

impl Default for Config {
    /// Create a default configuration using default values.
    ///
    /// This is useful for testing or when environment variables are not set.
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            instance: DEFAULT_INSTANCE.to_string(),
            intervals: IntervalConfig::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}
