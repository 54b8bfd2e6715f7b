//! Device configuration and registry events.
//!
//! Devices are owned by an external registry; the poller only holds a
//! read-only copy of each configuration plus its own runtime bookkeeping.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for one remote transmitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Unique device identifier
    pub id: String,
    /// Human-readable device name
    pub name: String,
    /// Base URL of the vendor REST API (e.g. `https://hub.example:8896`)
    pub base_url: String,
    /// API key appended to every request, if the endpoint requires one
    #[serde(default)]
    pub api_token: Option<String>,
    /// Per-device polling interval override in seconds
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    /// Disabled devices are kept in the registry but never polled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl DeviceConfig {
    /// Create a minimal device configuration.
    pub fn new(id: impl Into<String>, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            base_url: base_url.into(),
            api_token: None,
            poll_interval_secs: None,
            enabled: true,
        }
    }

    /// Set the API token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Set a per-device polling interval.
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = Some(secs);
        self
    }

    /// Effective polling interval, falling back to the global default.
    pub fn poll_interval(&self, default: Duration) -> Duration {
        self.poll_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(default)
    }
}

/// Change notification emitted by the external device registry.
///
/// The scheduler consumes these to start or stop exactly one device's
/// polling loop without disturbing the others.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A device was added to (or re-enabled in) the registry.
    Added(DeviceConfig),
    /// The device with this id was removed or disabled.
    Removed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_fallback() {
        let device = DeviceConfig::new("d1", "Field unit", "http://10.0.0.2:8893");
        assert_eq!(
            device.poll_interval(Duration::from_secs(5)),
            Duration::from_secs(5)
        );

        let device = device.with_poll_interval(2);
        assert_eq!(
            device.poll_interval(Duration::from_secs(5)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_enabled_defaults_to_true() {
        let parsed: DeviceConfig = serde_json::from_str(
            r#"{"id":"d1","name":"Unit","base_url":"http://10.0.0.2:8893"}"#,
        )
        .expect("valid config");
        assert!(parsed.enabled);
        assert!(parsed.api_token.is_none());
    }
}
