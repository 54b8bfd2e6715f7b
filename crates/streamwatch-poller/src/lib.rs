//! Background polling and session engine for StreamWatch.
//!
//! This crate is the heart of the platform:
//!
//! - [`normalize`]: turns raw vendor payloads into canonical samples
//! - [`state`]: the per-device Idle/Live session state machine
//! - [`scheduler`]: one independent polling loop per device
//! - [`health`]: derived operational snapshots for monitoring
//!
//! Devices are fully independent: a slow or unreachable device never
//! delays another device's polling cadence. The only shared resource is
//! the session store, and each device's loop is the sole writer to that
//! device's open session.

pub mod health;
pub mod normalize;
pub mod scheduler;
pub mod state;

pub use health::{AgePoint, DeviceHealth, HealthAggregator, HealthSnapshot};
pub use normalize::normalize;
pub use scheduler::{DeviceRuntime, Poller, PollerSettings};
pub use state::{SessionTracker, Transition};
