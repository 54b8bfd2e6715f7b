//! Time-series session storage for StreamWatch.
//!
//! Append-only, per-session ordered storage of telemetry samples plus
//! session metadata. Supports two read paths simultaneously:
//!
//! - **tail**: a lazy stream of samples from a given index, unbounded
//!   while the session stays open ("follow live")
//! - **range**: the finite ordered slice of samples within a closed time
//!   window (historical scrubbing)
//!
//! Sessions live in an arena keyed by generated ids; devices and sessions
//! never hold references to each other.

pub mod error;
pub mod store;

pub use error::{Error, Result};
pub use store::SessionStore;
