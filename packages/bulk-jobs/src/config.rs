use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use dotenvy::dotenv;

use crate::types::job::DEFAULT_MAX_ATTEMPTS;

/// Engine configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_attempts: i32,
    /// Items claimed per job per dispatch
    pub batch_size: usize,
    /// Items generated at once across all jobs
    pub concurrency: usize,
    pub lease_duration: Duration,
    pub heartbeat_interval: Duration,
    pub generation_timeout: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub reclaim_interval: Duration,
    pub min_poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub database_url: Option<String>,
    pub generator_url: Option<String>,
    pub generator_token: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            batch_size: 5,
            concurrency: 5,
            lease_duration: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(60),
            generation_timeout: Duration::from_secs(120),
            retry_base: Duration::from_secs(2),
            retry_max: Duration::from_secs(300),
            reclaim_interval: Duration::from_secs(30),
            min_poll_interval: Duration::from_millis(2000),
            max_poll_interval: Duration::from_millis(5000),
            database_url: None,
            generator_url: None,
            generator_token: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source. Unset keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            max_attempts: parse_or(&lookup, "BULK_MAX_ATTEMPTS", defaults.max_attempts)?,
            batch_size: parse_or(&lookup, "BULK_BATCH_SIZE", defaults.batch_size)?,
            concurrency: parse_or(&lookup, "BULK_CONCURRENCY", defaults.concurrency)?,
            lease_duration: secs_or(&lookup, "BULK_LEASE_SECS", defaults.lease_duration)?,
            heartbeat_interval: secs_or(&lookup, "BULK_HEARTBEAT_SECS", defaults.heartbeat_interval)?,
            generation_timeout: secs_or(
                &lookup,
                "BULK_GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout,
            )?,
            retry_base: secs_or(&lookup, "BULK_RETRY_BASE_SECS", defaults.retry_base)?,
            retry_max: secs_or(&lookup, "BULK_RETRY_MAX_SECS", defaults.retry_max)?,
            reclaim_interval: secs_or(
                &lookup,
                "BULK_RECLAIM_INTERVAL_SECS",
                defaults.reclaim_interval,
            )?,
            min_poll_interval: millis_or(&lookup, "BULK_POLL_MIN_MS", defaults.min_poll_interval)?,
            max_poll_interval: millis_or(&lookup, "BULK_POLL_MAX_MS", defaults.max_poll_interval)?,
            database_url: lookup("DATABASE_URL").filter(|v| !v.is_empty()),
            generator_url: lookup("GENERATOR_URL").filter(|v| !v.is_empty()),
            generator_token: lookup("GENERATOR_TOKEN").filter(|v| !v.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check relationships between settings.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_attempts >= 1, "BULK_MAX_ATTEMPTS must be at least 1");
        ensure!(self.batch_size >= 1, "BULK_BATCH_SIZE must be at least 1");
        ensure!(self.concurrency >= 1, "BULK_CONCURRENCY must be at least 1");
        ensure!(
            !self.heartbeat_interval.is_zero(),
            "BULK_HEARTBEAT_SECS must be at least 1"
        );
        ensure!(
            !self.reclaim_interval.is_zero(),
            "BULK_RECLAIM_INTERVAL_SECS must be at least 1"
        );
        ensure!(
            self.heartbeat_interval < self.lease_duration,
            "BULK_HEARTBEAT_SECS must be shorter than BULK_LEASE_SECS"
        );
        ensure!(
            self.retry_base <= self.retry_max,
            "BULK_RETRY_BASE_SECS must not exceed BULK_RETRY_MAX_SECS"
        );
        ensure!(
            self.min_poll_interval <= self.max_poll_interval,
            "BULK_POLL_MIN_MS must not exceed BULK_POLL_MAX_MS"
        );
        Ok(())
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}

fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    parse_or(lookup, key, default.as_millis() as u64).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.lease_duration, Duration::from_secs(300));
        assert_eq!(config.min_poll_interval, Duration::from_millis(2000));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("BULK_MAX_ATTEMPTS", "5"),
            ("BULK_CONCURRENCY", " 8 "),
            ("BULK_LEASE_SECS", "90"),
            ("GENERATOR_URL", "http://localhost:8000/generate"),
        ]))
        .unwrap();

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.lease_duration, Duration::from_secs(90));
        assert_eq!(
            config.generator_url.as_deref(),
            Some("http://localhost:8000/generate")
        );
    }

    #[test]
    fn parse_error_names_the_variable() {
        let err = EngineConfig::from_lookup(lookup(&[("BULK_BATCH_SIZE", "many")])).unwrap_err();
        assert!(err.to_string().contains("BULK_BATCH_SIZE"));
    }

    #[test]
    fn heartbeat_must_fit_in_lease() {
        let err = EngineConfig::from_lookup(lookup(&[
            ("BULK_LEASE_SECS", "30"),
            ("BULK_HEARTBEAT_SECS", "60"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("BULK_HEARTBEAT_SECS"));
    }

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }
}
