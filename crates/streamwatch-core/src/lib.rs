//! Core data model and configuration for the StreamWatch platform.
//!
//! This crate defines the types shared by every other StreamWatch crate:
//!
//! - **Device**: read-only reference to a configured transmitter
//! - **Sample**: one normalized telemetry snapshot (GPS + link metrics)
//! - **Session**: the contiguous record of one live broadcast
//! - **PollResult**: the transient outcome of a single poll cycle
//!
//! Heavier concerns (HTTP, storage, scheduling) live in the dedicated
//! crates; nothing here spawns tasks or performs I/O beyond config loading.

pub mod config;
pub mod device;
pub mod error;
pub mod poll;
pub mod sample;
pub mod session;

pub use config::{Config, PollerConfig, CONFIG_PATH_ENV};
pub use device::{DeviceConfig, RegistryEvent};
pub use error::{Error, Result};
pub use poll::{FailureKind, PollOutcome, PollResult};
pub use sample::{GpsFix, InterfaceKind, InterfaceReading, Sample};
pub use session::{CloseReason, Session, SessionId};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
