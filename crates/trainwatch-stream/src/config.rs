//! Client configuration
//!
//! Everything is optional in the file; missing keys take the defaults
//! below.
//!
//! ```toml
//! origin = "https://monitor.example.com"
//! retention = { last_n = 500 }
//!
//! [session]
//! backoff_ms = 2000
//! idle_timeout_secs = 90
//! connect_timeout_secs = 30
//! clear_history_on_reconnect = false
//!
//! [axes]
//! series = ["loss", "accuracy", "grad_norm"]
//! window = 200
//!
//! [axes.bounds.loss]
//! min = 0.0
//! max = 2.0
//! ```

use crate::address::Origin;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use trainwatch_core::{AxisConfig, RetentionPolicy};

/// Reconnect and liveness settings for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fixed delay before reconnecting, in milliseconds
    pub backoff_ms: u64,
    /// Silence tolerated on an open connection, in seconds; `0` disables
    pub idle_timeout_secs: u64,
    /// Limit on the connect and upgrade handshake, in seconds; `0` disables
    pub connect_timeout_secs: u64,
    /// Empty history when a reconnect starts instead of keeping it
    pub clear_history_on_reconnect: bool,
}

impl SessionConfig {
    #[inline]
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    #[inline]
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backoff_ms: 2_000,
            // Server pings after 60s of silence
            idle_timeout_secs: 90,
            connect_timeout_secs: 30,
            clear_history_on_reconnect: false,
        }
    }
}

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Page origin the stream addresses derive from
    pub origin: String,
    /// History retention per subscription
    pub retention: RetentionPolicy,
    /// Reconnect behaviour
    pub session: SessionConfig,
    /// Chart series and scale bounds
    pub axes: AxisConfig,
}

impl WatchConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With origin
    #[inline]
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// With retention policy
    #[inline]
    #[must_use]
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// With reconnect delay
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.session.backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With axis configuration
    #[inline]
    #[must_use]
    pub fn with_axes(mut self, axes: AxisConfig) -> Self {
        self.axes = axes;
        self
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// - `ConfigError::Toml` for syntax or schema errors
    /// - any error from [`WatchConfig::validate`]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - any error from [`WatchConfig::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    /// - `ConfigError::InvalidOrigin` for a bad origin
    /// - `ConfigError::Axis` for bad axes
    /// - `ConfigError::Invalid` for a zero backoff
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parsed_origin()?;
        self.axes.validate()?;
        if self.session.backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.backoff_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Origin as a usable address base
    ///
    /// # Errors
    /// - `ConfigError::InvalidOrigin` for a bad origin
    pub fn parsed_origin(&self) -> Result<Origin, ConfigError> {
        Origin::parse(&self.origin)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8000".to_string(),
            retention: RetentionPolicy::Unbounded,
            session: SessionConfig::default(),
            axes: AxisConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainwatch_core::{AxisRange, MetricKey};

    #[test]
    fn empty_file_is_default() {
        let config = WatchConfig::from_toml_str("").unwrap();
        assert_eq!(config, WatchConfig::default());
        assert_eq!(config.session.backoff(), Duration::from_secs(2));
        assert_eq!(config.session.idle_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.session.connect_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn full_file_parses() {
        let config = WatchConfig::from_toml_str(
            r#"
            origin = "https://monitor.example.com"
            retention = { last_n = 10 }

            [session]
            backoff_ms = 500
            idle_timeout_secs = 0
            connect_timeout_secs = 0
            clear_history_on_reconnect = true

            [axes]
            series = ["loss", "grad_norm"]
            window = 50

            [axes.bounds.loss]
            min = 0.0
            max = 4.0
            "#,
        )
        .unwrap();

        assert_eq!(config.retention, RetentionPolicy::last_n(10));
        assert_eq!(config.session.backoff(), Duration::from_millis(500));
        assert_eq!(config.session.idle_timeout(), None);
        assert_eq!(config.session.connect_timeout(), None);
        assert!(config.session.clear_history_on_reconnect);
        assert_eq!(
            config.axes.series,
            vec![MetricKey::Loss, MetricKey::Custom("grad_norm".to_string())]
        );
        assert_eq!(config.axes.window.map(|w| w.get()), Some(50));
        assert_eq!(config.axes.bounds[&MetricKey::Loss], AxisRange::fixed(0.0, 4.0));
        assert!(config.parsed_origin().unwrap().is_secure());
    }

    #[test]
    fn unbounded_retention_by_name() {
        let config = WatchConfig::from_toml_str(r#"retention = "unbounded""#).unwrap();
        assert_eq!(config.retention, RetentionPolicy::Unbounded);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            WatchConfig::from_toml_str(r#"origin = "gopher://x""#),
            Err(ConfigError::InvalidOrigin { .. })
        ));
        assert!(matches!(
            WatchConfig::from_toml_str("[session]\nbackoff_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            WatchConfig::from_toml_str("retention = { last_n = 0 }"),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            WatchConfig::from_toml_str("[axes.bounds.loss]\nmin = 3.0\nmax = 1.0"),
            Err(ConfigError::Axis(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = WatchConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
