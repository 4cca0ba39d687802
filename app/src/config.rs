// Application Configuration

use anyhow::{bail, Context, Result};
use std::time::Duration;

/// Recognized environment variables and their defaults (spec §6). Every variable is parsed once
/// at startup; an unset variable silently falls back to its default, but a variable the operator
/// *did* set that fails to parse is a fatal configuration error — failing fast beats silently
/// masking a typo with a default.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub sweep_binary_path: String,
    pub max_buffer_size: usize,
    pub max_consecutive_errors: u32,
    pub max_failures_per_minute: usize,
    pub window_seconds: u64,
    pub heartbeat_interval: Duration,
    pub subscriber_max_queue: usize,
    pub stale_timeout: Duration,
    pub tstop: Duration,
    pub recovery_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            sweep_binary_path: "hackrf_sweep".to_string(),
            max_buffer_size: 1024 * 1024,
            max_consecutive_errors: 8,
            max_failures_per_minute: 5,
            window_seconds: 30,
            heartbeat_interval: Duration::from_secs(30),
            subscriber_max_queue: 1_000,
            stale_timeout: Duration::from_secs(10),
            tstop: Duration::from_secs(3),
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    /// Parses every recognized `SWEEP_*` variable from the process environment, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            bind_addr: env_string("SWEEP_BIND_ADDR", &defaults.bind_addr),
            sweep_binary_path: env_string("SWEEP_BINARY_PATH", &defaults.sweep_binary_path),
            max_buffer_size: env_parsed("maxBufferSize", defaults.max_buffer_size)?,
            max_consecutive_errors: env_parsed("maxConsecutiveErrors", defaults.max_consecutive_errors)?,
            max_failures_per_minute: env_parsed("maxFailuresPerMinute", defaults.max_failures_per_minute)?,
            window_seconds: env_parsed("windowSeconds", defaults.window_seconds)?,
            heartbeat_interval: Duration::from_millis(env_parsed(
                "heartbeatInterval",
                defaults.heartbeat_interval.as_millis() as u64,
            )?),
            subscriber_max_queue: env_parsed("subscriberMaxQueue", defaults.subscriber_max_queue)?,
            stale_timeout: Duration::from_millis(env_parsed(
                "SWEEP_STALE_TIMEOUT_MS",
                defaults.stale_timeout.as_millis() as u64,
            )?),
            tstop: Duration::from_millis(env_parsed("SWEEP_TSTOP_MS", defaults.tstop.as_millis() as u64)?),
            recovery_timeout: Duration::from_millis(env_parsed(
                "SWEEP_RECOVERY_TIMEOUT_MS",
                defaults.recovery_timeout.as_millis() as u64,
            )?),
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(std::env::VarError::NotUnicode(_)) => bail!("{key} is not valid unicode"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = AppConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8000");
        assert_eq!(config.sweep_binary_path, "hackrf_sweep");
        assert_eq!(config.max_buffer_size, 1024 * 1024);
        assert_eq!(config.subscriber_max_queue, 1_000);
    }

    #[test]
    fn env_parsed_falls_back_when_unset() {
        std::env::remove_var("SWEEP_TEST_UNSET_VALUE");
        let value: u64 = env_parsed("SWEEP_TEST_UNSET_VALUE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn env_parsed_rejects_malformed_value() {
        std::env::set_var("SWEEP_TEST_MALFORMED_VALUE", "not-a-number");
        let result: Result<u64> = env_parsed("SWEEP_TEST_MALFORMED_VALUE", 42);
        assert!(result.is_err());
        std::env::remove_var("SWEEP_TEST_MALFORMED_VALUE");
    }
}
