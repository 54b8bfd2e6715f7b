//! Operational health reporting.
//!
//! The aggregator derives a [`HealthSnapshot`] from the poller's runtime
//! bookkeeping and the session store at the moment it is asked. Nothing is
//! cached; a snapshot always reflects the current state, including devices
//! added or removed since the last one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use streamwatch_core::SessionId;
use streamwatch_storage::SessionStore;

use crate::scheduler::Poller;

/// One observation of how stale a device's newest sample was.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgePoint {
    pub observed_at: DateTime<Utc>,
    /// Seconds since the device's newest stored sample; `None` before
    /// the device has ever produced one
    pub age_secs: Option<f64>,
}

/// Health of a single scheduled device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceHealth {
    pub device_id: String,
    pub name: String,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Age of the newest stored sample, in seconds
    pub last_sample_age_secs: Option<f64>,
    pub consecutive_failures: u32,
    pub current_session: Option<SessionId>,
    pub age_history: Vec<AgePoint>,
}

/// Point-in-time view of the whole deployment.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub generated_at: DateTime<Utc>,
    pub poller_running: bool,
    pub open_sessions: usize,
    pub devices: Vec<DeviceHealth>,
}

/// Computes health snapshots on demand.
pub struct HealthAggregator {
    poller: Arc<Poller>,
    store: Arc<SessionStore>,
}

impl HealthAggregator {
    pub fn new(poller: Arc<Poller>, store: Arc<SessionStore>) -> Self {
        Self { poller, store }
    }

    /// Assemble the current health picture.
    pub fn snapshot(&self) -> HealthSnapshot {
        let generated_at = Utc::now();
        let devices = self
            .poller
            .device_runtimes()
            .into_iter()
            .map(|runtime| {
                let last_sample_age_secs = self
                    .store
                    .last_sample_time(&runtime.device_id)
                    .map(|t| ((generated_at - t).num_milliseconds().max(0) as f64) / 1000.0);
                DeviceHealth {
                    device_id: runtime.device_id,
                    name: runtime.name,
                    last_poll_at: runtime.last_poll_at,
                    last_success_at: runtime.last_success_at,
                    last_sample_age_secs,
                    consecutive_failures: runtime.consecutive_failures,
                    current_session: runtime.current_session,
                    age_history: runtime.age_history.into_iter().collect(),
                }
            })
            .collect();

        HealthSnapshot {
            generated_at,
            poller_running: self.poller.is_running(),
            open_sessions: self.store.open_session_count(),
            devices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use streamwatch_client::{FetchError, FetchResult, RawPayload, TelemetryClient};
    use streamwatch_core::DeviceConfig;

    use crate::scheduler::PollerSettings;

    struct DarkClient;

    #[async_trait]
    impl TelemetryClient for DarkClient {
        async fn fetch(&self, _device: &DeviceConfig) -> FetchResult<RawPayload> {
            Err(FetchError::Unreachable("test endpoint".into()))
        }
    }

    #[test]
    fn test_snapshot_of_stopped_poller() {
        let store = Arc::new(SessionStore::new());
        let poller = Arc::new(Poller::new(
            PollerSettings::default(),
            Arc::new(DarkClient),
            Arc::clone(&store),
        ));
        let health = HealthAggregator::new(poller, store);

        let snapshot = health.snapshot();
        assert!(!snapshot.poller_running);
        assert_eq!(snapshot.open_sessions, 0);
        assert!(snapshot.devices.is_empty());
    }

    #[test]
    fn test_open_sessions_counted_from_store() {
        let store = Arc::new(SessionStore::new());
        store.open_session("d1", Utc::now()).unwrap();
        store.open_session("d2", Utc::now()).unwrap();

        let poller = Arc::new(Poller::new(
            PollerSettings::default(),
            Arc::new(DarkClient),
            Arc::clone(&store),
        ));
        let health = HealthAggregator::new(poller, store);
        assert_eq!(health.snapshot().open_sessions, 2);
    }

    #[test]
    fn test_snapshot_serializes() {
        let store = Arc::new(SessionStore::new());
        let poller = Arc::new(Poller::new(
            PollerSettings::default(),
            Arc::new(DarkClient),
            Arc::clone(&store),
        ));
        let health = HealthAggregator::new(poller, store);

        let json = serde_json::to_value(health.snapshot()).unwrap();
        assert_eq!(json["poller_running"], serde_json::Value::Bool(false));
        assert!(json["devices"].as_array().unwrap().is_empty());
    }
}
