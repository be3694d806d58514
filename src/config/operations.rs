//! Operation limits and read retry settings.

use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;

/// Default maximum content length in characters.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 10_000;
/// Default comment edit window (15 minutes).
pub const DEFAULT_EDIT_WINDOW_SECS: u64 = 900;
/// Longest accepted edit window (one year).
pub const MAX_EDIT_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Limits applied by the built-in operations before any pipeline runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    /// Maximum length of comment and chapter content, in characters.
    pub max_content_length: usize,
    /// How long after creation a comment may still be edited.
    pub edit_window_secs: u64,
    /// Backoff for idempotent read steps that opt into retry.
    pub read_retry: RetrySettings,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            edit_window_secs: DEFAULT_EDIT_WINDOW_SECS,
            read_retry: RetrySettings::default(),
        }
    }
}

impl OperationsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_content_length == 0 {
            return Err(ConfigError::Invalid(
                "operations.max_content_length must be positive".to_string(),
            ));
        }
        if self.edit_window_secs > MAX_EDIT_WINDOW_SECS {
            return Err(ConfigError::Invalid(format!(
                "operations.edit_window_secs must be at most {}",
                MAX_EDIT_WINDOW_SECS
            )));
        }
        self.read_retry.validate()
    }

    /// `None` when the window does not fit a `TimeDelta`.
    pub fn edit_window(&self) -> Option<chrono::TimeDelta> {
        i64::try_from(self.edit_window_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
    }
}

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_times: usize,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            min_delay_ms: 10,
            max_delay_ms: 200,
            max_times: 3,
        }
    }
}

impl RetrySettings {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(
                "read_retry.min_delay_ms exceeds max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_window_bounds() {
        let mut config = OperationsConfig::default();
        assert_eq!(config.edit_window(), chrono::TimeDelta::try_seconds(900));

        config.edit_window_secs = MAX_EDIT_WINDOW_SECS;
        config.validate().unwrap();

        config.edit_window_secs = u64::MAX / 2;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(config.edit_window(), None);

        config.edit_window_secs = u64::MAX;
        assert_eq!(config.edit_window(), None);
    }
}
