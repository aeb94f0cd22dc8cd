use std::env;
use std::time::Duration;

use crate::telemetry::command::DEFAULT_COMMAND_RETENTION_MS;
use crate::telemetry::{ChannelConfig, HubConfig};

/// Relay configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address (0.0.0.0 for LAN, 127.0.0.1 for localhost)
    pub bind_addr: String,
    pub emg: ChannelConfig,
    pub thermal: ChannelConfig,
    /// Interval between push heartbeats
    pub push_heartbeat_interval_ms: u64,
    /// Updates buffered per push subscriber before samples are skipped
    pub subscriber_queue_capacity: usize,
    /// How often the liveness monitor checks every channel
    pub liveness_check_interval_seconds: u64,
    /// How long a posted device command stays pending
    pub command_retention_ms: u64,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            bind_addr: "0.0.0.0".to_string(),
            emg: ChannelConfig::emg_default(),
            thermal: ChannelConfig::thermal_default(),
            push_heartbeat_interval_ms: 5_000,
            subscriber_queue_capacity: 256,
            liveness_check_interval_seconds: 5,
            command_retention_ms: DEFAULT_COMMAND_RETENTION_MS,
            max_body_size: 1024 * 1024,
        }
    }
}

impl RelayConfig {
    /// Load configuration from `.env` and the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup, falling back to defaults
    /// for missing keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let vars = Vars(&lookup);

        let port = match lookup("RELAY_PORT") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidPort)?,
            None => defaults.port,
        };

        let max_age = vars.number("SAMPLE_MAX_AGE_MS", 120_000u64)?;
        let max_sample_age_ms = (max_age > 0).then_some(max_age);

        let emg = channel_config(&vars, "EMG", &defaults.emg, max_sample_age_ms)?;
        let thermal = channel_config(&vars, "THERMAL", &defaults.thermal, max_sample_age_ms)?;

        Ok(Self {
            port,
            bind_addr: lookup("RELAY_BIND_ADDR").unwrap_or(defaults.bind_addr),
            emg,
            thermal,
            push_heartbeat_interval_ms: vars
                .positive("PUSH_HEARTBEAT_INTERVAL_MS", defaults.push_heartbeat_interval_ms)?,
            subscriber_queue_capacity: vars
                .positive("SUBSCRIBER_QUEUE_CAPACITY", defaults.subscriber_queue_capacity)?,
            liveness_check_interval_seconds: vars.positive(
                "LIVENESS_CHECK_INTERVAL_SECONDS",
                defaults.liveness_check_interval_seconds,
            )?,
            command_retention_ms: vars
                .positive("COMMAND_RETENTION_MS", defaults.command_retention_ms)?,
            max_body_size: vars.positive("MAX_BODY_SIZE", defaults.max_body_size)?,
        })
    }

    /// Get the full bind address (addr:port)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            emg: self.emg.clone(),
            thermal: self.thermal.clone(),
            subscriber_queue_capacity: self.subscriber_queue_capacity,
            command_retention_ms: self.command_retention_ms,
        }
    }

    pub fn push_heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.push_heartbeat_interval_ms)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_check_interval_seconds)
    }
}

fn channel_config(
    vars: &Vars<'_>,
    prefix: &str,
    defaults: &ChannelConfig,
    max_sample_age_ms: Option<u64>,
) -> Result<ChannelConfig, ConfigError> {
    let capacity = vars.positive(&format!("{}_BUFFER_CAPACITY", prefix), defaults.capacity)?;
    let recent_window =
        vars.positive(&format!("{}_RECENT_WINDOW", prefix), defaults.recent_window)?;

    Ok(ChannelConfig {
        capacity,
        recent_window: recent_window.min(capacity),
        connection_timeout_ms: vars.positive(
            &format!("{}_CONNECTION_TIMEOUT_MS", prefix),
            defaults.connection_timeout_ms,
        )?,
        max_sample_age_ms,
    })
}

struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    fn number<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match (self.0)(key) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber(key.to_string(), value)),
            None => Ok(default),
        }
    }

    fn positive<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr + PartialOrd + Default,
    {
        let value = self.number(key, default)?;
        if value > T::default() {
            Ok(value)
        } else {
            Err(ConfigError::InvalidValue(format!("{} must be greater than 0", key)))
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid number for {0}: {1:?}")]
    InvalidNumber(String, String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.bind_address(), "0.0.0.0:3001");
        assert_eq!(config.emg.recent_window, 50);
        assert_eq!(config.thermal.connection_timeout_ms, 30_000);
        assert_eq!(config.push_heartbeat_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("RELAY_PORT", "8088"),
            ("RELAY_BIND_ADDR", "127.0.0.1"),
            ("EMG_BUFFER_CAPACITY", "200"),
            ("THERMAL_CONNECTION_TIMEOUT_MS", "15000"),
            ("SAMPLE_MAX_AGE_MS", "0"),
            ("COMMAND_RETENTION_MS", "3000"),
        ])
        .unwrap();

        assert_eq!(config.bind_address(), "127.0.0.1:8088");
        assert_eq!(config.emg.capacity, 200);
        assert_eq!(config.thermal.connection_timeout_ms, 15_000);
        assert_eq!(config.emg.max_sample_age_ms, None);
        assert_eq!(config.hub_config().thermal.max_sample_age_ms, None);
        assert_eq!(config.hub_config().command_retention_ms, 3_000);
    }

    #[test]
    fn test_window_clamped_to_capacity() {
        let config = from_pairs(&[("EMG_BUFFER_CAPACITY", "10"), ("EMG_RECENT_WINDOW", "50")])
            .unwrap();
        assert_eq!(config.emg.recent_window, 10);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            from_pairs(&[("RELAY_PORT", "70000")]),
            Err(ConfigError::InvalidPort)
        ));

        let err = from_pairs(&[("EMG_BUFFER_CAPACITY", "lots")]).unwrap_err();
        assert!(err.to_string().contains("EMG_BUFFER_CAPACITY"));

        let err = from_pairs(&[("PUSH_HEARTBEAT_INTERVAL_MS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }
}
