//! Sync configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Timeouts and limits shared by every view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Deadline for save, delete and list responses
    pub pending_timeout_ms: u64,
    /// Deadline for postal-code lookups
    pub lookup_timeout_ms: u64,
    /// Digits in a complete postal code
    pub postal_code_len: usize,
    /// Outbound command queue capacity
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pending_timeout_ms: 10_000,
            lookup_timeout_ms: 8_000,
            postal_code_len: 8,
            channel_capacity: 64,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a TOML document
    ///
    /// Missing keys take their defaults.
    ///
    /// # Errors
    /// `ConfigError::Parse` on bad TOML, `ConfigError::InvalidValue` on a
    /// zero timeout, length or capacity
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Same as [`SyncConfig::from_toml_str`], plus `ConfigError::Io`
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject values that would wedge a controller
    ///
    /// # Errors
    /// `ConfigError::InvalidValue` naming the first offending key
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("pending_timeout_ms", self.pending_timeout_ms == 0),
            ("lookup_timeout_ms", self.lookup_timeout_ms == 0),
            ("postal_code_len", self.postal_code_len == 0),
            ("channel_capacity", self.channel_capacity == 0),
        ];
        match checks.into_iter().find(|(_, zero)| *zero) {
            Some((field, _)) => Err(ConfigError::InvalidValue {
                field,
                reason: "must be greater than zero".into(),
            }),
            None => Ok(()),
        }
    }

    /// Set the save/delete/list deadline
    #[must_use]
    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the lookup deadline
    #[must_use]
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the postal-code length
    #[must_use]
    pub fn with_postal_code_len(mut self, len: usize) -> Self {
        self.postal_code_len = len;
        self
    }

    /// Set the outbound queue capacity
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Save/delete/list deadline
    #[inline]
    #[must_use]
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_millis(self.pending_timeout_ms)
    }

    /// Lookup deadline
    #[inline]
    #[must_use]
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.pending_timeout(), Duration::from_secs(10));
        assert_eq!(config.lookup_timeout(), Duration::from_secs(8));
        assert_eq!(config.postal_code_len, 8);
        assert_eq!(config.channel_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str("pending_timeout_ms = 2500\n").unwrap();
        assert_eq!(config.pending_timeout_ms, 2500);
        assert_eq!(config.lookup_timeout_ms, 8_000);
    }

    #[test]
    fn zero_values_rejected() {
        let err = SyncConfig::from_toml_str("channel_capacity = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "channel_capacity",
                ..
            }
        ));

        let config = SyncConfig::default().with_lookup_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let err = SyncConfig::from_toml_str("pending_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn builders() {
        let config = SyncConfig::default()
            .with_pending_timeout(Duration::from_millis(1500))
            .with_postal_code_len(5)
            .with_channel_capacity(4);
        assert_eq!(config.pending_timeout_ms, 1500);
        assert_eq!(config.postal_code_len, 5);
        assert_eq!(config.channel_capacity, 4);
    }
}
