//! Background poll scheduler.
//!
//! One tokio task per enabled device. Each loop fetches the device's
//! status, normalizes it, feeds the result to the device's
//! [`SessionTracker`] and records runtime bookkeeping for health
//! reporting, then sleeps until the next tick. Loops are independent: a
//! hung or slow device never delays the others.
//!
//! Shutdown is cooperative. `stop()` flips a per-device watch channel,
//! waits for the loops to wind down within the shutdown timeout and
//! aborts any that do not. A loop that exits for any reason closes its
//! open session with the shutdown reason so no session is left dangling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use streamwatch_client::{FetchError, TelemetryClient};
use streamwatch_core::{
    DeviceConfig, FailureKind, PollOutcome, PollResult, PollerConfig, RegistryEvent, SessionId,
};
use streamwatch_storage::SessionStore;

use crate::health::AgePoint;
use crate::normalize::normalize;
use crate::state::SessionTracker;

/// Resolved timing knobs the scheduler runs with.
///
/// [`PollerConfig`] speaks whole seconds because that is what the config
/// file holds; this struct speaks `Duration` so callers can run the
/// scheduler at any granularity.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub silence_threshold: u32,
    pub shutdown_timeout: Duration,
    pub age_history_window: Duration,
}

impl PollerSettings {
    pub fn from_config(config: &PollerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            fetch_timeout: config.fetch_timeout(),
            silence_threshold: config.silence_threshold,
            shutdown_timeout: config.shutdown_timeout(),
            age_history_window: config.age_history_window(),
        }
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self::from_config(&PollerConfig::default())
    }
}

/// Live bookkeeping for one scheduled device.
#[derive(Debug, Clone)]
pub struct DeviceRuntime {
    pub device_id: String,
    pub name: String,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub current_session: Option<SessionId>,
    /// Sliding window of last-sample-age observations
    pub age_history: VecDeque<AgePoint>,
    /// Which spawned loop owns this entry. A removed device's loop may
    /// still be winding down when the device is re-added; the stale loop
    /// must neither overwrite nor delete the new loop's entry.
    generation: u64,
}

impl DeviceRuntime {
    fn new(device: &DeviceConfig, generation: u64) -> Self {
        Self {
            device_id: device.id.clone(),
            name: device.name.clone(),
            last_poll_at: None,
            last_success_at: None,
            consecutive_failures: 0,
            current_session: None,
            age_history: VecDeque::new(),
            generation,
        }
    }
}

struct DeviceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the per-device poll loops.
pub struct Poller {
    settings: PollerSettings,
    client: Arc<dyn TelemetryClient>,
    store: Arc<SessionStore>,
    devices: DashMap<String, DeviceHandle>,
    runtime: Arc<DashMap<String, DeviceRuntime>>,
    running: AtomicBool,
    next_generation: AtomicU64,
}

impl Poller {
    pub fn new(
        settings: PollerSettings,
        client: Arc<dyn TelemetryClient>,
        store: Arc<SessionStore>,
    ) -> Self {
        Self {
            settings,
            client,
            store,
            devices: DashMap::new(),
            runtime: Arc::new(DashMap::new()),
            running: AtomicBool::new(false),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Start polling the enabled devices among those given. Idempotent:
    /// devices already scheduled keep their existing loop.
    pub fn start(&self, devices: impl IntoIterator<Item = DeviceConfig>) {
        self.running.store(true, Ordering::SeqCst);
        for device in devices {
            if !device.enabled {
                debug!(device_id = %device.id, "device disabled; not scheduled");
                continue;
            }
            self.spawn_device(device);
        }
    }

    /// Whether `start()` has been called and `stop()` has not.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Begin polling one more device.
    pub fn add_device(&self, device: DeviceConfig) {
        if !self.is_running() {
            warn!(device_id = %device.id, "poller not running; device not scheduled");
            return;
        }
        if !device.enabled {
            debug!(device_id = %device.id, "device disabled; not scheduled");
            return;
        }
        self.spawn_device(device);
    }

    /// Stop polling a device. Its loop closes any open session with the
    /// shutdown reason and cleans up its runtime entry on exit.
    pub fn remove_device(&self, device_id: &str) -> bool {
        match self.devices.remove(device_id) {
            Some((_, handle)) => {
                let _ = handle.shutdown.send(true);
                true
            }
            None => false,
        }
    }

    /// Apply a device registry change.
    pub fn apply_registry_event(&self, event: RegistryEvent) {
        match event {
            RegistryEvent::Added(device) => self.add_device(device),
            RegistryEvent::Removed(device_id) => {
                self.remove_device(&device_id);
            }
        }
    }

    /// Signal every device loop and wait for them to finish, bounded by
    /// the shutdown timeout. Loops still running past the deadline are
    /// aborted.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let ids: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, handle)) = self.devices.remove(&id) {
                let _ = handle.shutdown.send(true);
                tasks.push((id, handle.task));
            }
        }

        let deadline = tokio::time::Instant::now() + self.settings.shutdown_timeout;
        for (id, mut task) in tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(device_id = %id, "device loop exceeded shutdown timeout, aborting");
                    task.abort();
                }
            }
        }
        info!("poller stopped");
    }

    /// Snapshot of every scheduled device's runtime state.
    pub fn device_runtimes(&self) -> Vec<DeviceRuntime> {
        let mut runtimes: Vec<DeviceRuntime> =
            self.runtime.iter().map(|e| e.value().clone()).collect();
        runtimes.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        runtimes
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    fn spawn_device(&self, device: DeviceConfig) {
        if self.devices.contains_key(&device.id) {
            debug!(device_id = %device.id, "device already scheduled");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.runtime
            .insert(device.id.clone(), DeviceRuntime::new(&device, generation));

        let task = tokio::spawn(device_loop(
            device.clone(),
            generation,
            self.settings.clone(),
            Arc::clone(&self.client),
            Arc::clone(&self.store),
            Arc::clone(&self.runtime),
            shutdown_rx,
        ));
        self.devices.insert(
            device.id,
            DeviceHandle {
                shutdown: shutdown_tx,
                task,
            },
        );
    }
}

async fn device_loop(
    device: DeviceConfig,
    generation: u64,
    settings: PollerSettings,
    client: Arc<dyn TelemetryClient>,
    store: Arc<SessionStore>,
    runtime: Arc<DashMap<String, DeviceRuntime>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = device.poll_interval(settings.poll_interval);
    let mut tracker =
        SessionTracker::new(&device.id, settings.silence_threshold, Arc::clone(&store));
    info!(device_id = %device.id, interval_ms = interval.as_millis() as u64, "device poll loop started");

    loop {
        let outcome = tokio::select! {
            _ = shutdown.changed() => break,
            outcome = poll_once(client.as_ref(), &device, settings.fetch_timeout) => outcome,
        };

        let now = Utc::now();
        let result = PollResult::new(&device.id, now, outcome);
        tracker.on_result(&result);
        record_tick(
            &runtime, &store, &device.id, generation, &result, &tracker, &settings, now,
        );

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracker.shutdown();
    // A re-added device already has a successor loop and a fresh runtime
    // entry under the same id; only the owning loop may remove it.
    runtime.remove_if(&device.id, |_, rt| rt.generation == generation);
    info!(device_id = %device.id, "device poll loop stopped");
}

/// One fetch-normalize cycle. Fetch errors become unreachable outcomes;
/// the session state machine decides what silence means.
async fn poll_once(
    client: &dyn TelemetryClient,
    device: &DeviceConfig,
    fetch_timeout: Duration,
) -> PollOutcome {
    match tokio::time::timeout(fetch_timeout, client.fetch(device)).await {
        Err(_) => PollOutcome::Unreachable(FailureKind::Timeout, None),
        Ok(Err(err)) => {
            let kind = match err {
                FetchError::Timeout => FailureKind::Timeout,
                FetchError::Unreachable(_) => FailureKind::Unreachable,
                FetchError::Protocol(_) => FailureKind::Protocol,
            };
            debug!(device_id = %device.id, ?kind, "fetch failed");
            PollOutcome::Unreachable(kind, None)
        }
        Ok(Ok(payload)) => normalize(&device.id, &payload),
    }
}

#[allow(clippy::too_many_arguments)]
fn record_tick(
    runtime: &DashMap<String, DeviceRuntime>,
    store: &SessionStore,
    device_id: &str,
    generation: u64,
    result: &PollResult,
    tracker: &SessionTracker,
    settings: &PollerSettings,
    now: DateTime<Utc>,
) {
    let Some(mut entry) = runtime.get_mut(device_id) else {
        return;
    };
    if entry.generation != generation {
        // A stale loop finishing its last cycle after the device was
        // re-added; the entry belongs to the successor now.
        return;
    }
    entry.last_poll_at = Some(now);
    if result.is_failure() {
        entry.consecutive_failures += 1;
    } else {
        entry.consecutive_failures = 0;
        entry.last_success_at = Some(now);
    }
    entry.current_session = tracker.current_session();

    let age_secs = store
        .last_sample_time(device_id)
        .map(|t| ((now - t).num_milliseconds().max(0) as f64) / 1000.0);
    entry.age_history.push_back(AgePoint {
        observed_at: now,
        age_secs,
    });
    if let Ok(window) = chrono::Duration::from_std(settings.age_history_window) {
        let cutoff = now - window;
        while entry
            .age_history
            .front()
            .is_some_and(|p| p.observed_at < cutoff)
        {
            entry.age_history.pop_front();
        }
    }
}
