//! Configuration loading and validation.
//!
//! The poller's timing knobs and the initial device list come from one JSON
//! config file. Defaults are deliberately conservative; in particular the
//! silence threshold defaults to 3 ticks so that a single dropped poll never
//! fragments a broadcast into multiple sessions.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::DeviceConfig;
use crate::error::{Error, Result};

/// Environment variable naming an alternate config file path.
pub const CONFIG_PATH_ENV: &str = "STREAMWATCH_CONFIG";

fn default_poll_interval() -> u64 {
    5
}

fn default_fetch_timeout() -> u64 {
    3
}

fn default_silence_threshold() -> u32 {
    3
}

fn default_shutdown_timeout() -> u64 {
    5
}

fn default_age_history_window() -> u64 {
    120
}

/// Timing configuration for the poller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollerConfig {
    /// Default polling interval per device, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Timeout for a single status fetch; must stay below the poll interval
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Consecutive unreachable ticks tolerated before a live session closes
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: u32,
    /// How long `stop()` waits for in-flight cycles before giving up
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// Sliding window of last-sample-age observations kept per device
    #[serde(default = "default_age_history_window")]
    pub age_history_window_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            silence_threshold: default_silence_threshold(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            age_history_window_secs: default_age_history_window(),
        }
    }
}

impl PollerConfig {
    /// Check invariants between the timing knobs.
    ///
    /// A fetch timeout at or above the poll interval would let one hung
    /// call starve the next tick, and a zero silence threshold would close
    /// a session on the very first missed poll.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be > 0".into()));
        }
        if self.fetch_timeout_secs >= self.poll_interval_secs {
            return Err(Error::Config(format!(
                "fetch_timeout_secs ({}) must be strictly less than poll_interval_secs ({})",
                self.fetch_timeout_secs, self.poll_interval_secs
            )));
        }
        if self.silence_threshold == 0 {
            return Err(Error::Config("silence_threshold must be > 0".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn age_history_window(&self) -> Duration {
        Duration::from_secs(self.age_history_window_secs)
    }
}

/// Top-level configuration: poller timing plus the initial device set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    /// Load and validate a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&contents)?;
        config.poller.validate()?;
        Ok(config)
    }

    /// Devices the poller should actually schedule.
    pub fn enabled_devices(&self) -> impl Iterator<Item = &DeviceConfig> {
        self.devices.iter().filter(|d| d.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        PollerConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn test_fetch_timeout_must_undercut_interval() {
        let config = PollerConfig {
            poll_interval_secs: 5,
            fetch_timeout_secs: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_silence_threshold_rejected() {
        let config = PollerConfig {
            silence_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{
                "poller": {{ "poll_interval_secs": 2, "fetch_timeout_secs": 1 }},
                "devices": [
                    {{ "id": "hub-1", "name": "Hub", "base_url": "http://10.0.0.2:8893" }},
                    {{ "id": "hub-2", "name": "Spare", "base_url": "http://10.0.0.3:8893", "enabled": false }}
                ]
            }}"#
        )
        .expect("write config");

        let config = Config::from_file(file.path()).expect("load config");
        assert_eq!(config.poller.poll_interval_secs, 2);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.enabled_devices().count(), 1);
    }
}
