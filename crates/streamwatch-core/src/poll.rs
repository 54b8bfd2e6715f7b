//! Poll results.
//!
//! One `PollResult` is produced per device per tick and consumed
//! synchronously by the session state machine; results are never persisted.

use chrono::{DateTime, Utc};

use crate::sample::Sample;

/// Why a poll tick yielded no usable telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The fetch did not complete within its timeout.
    Timeout,
    /// The endpoint could not be reached at all.
    Unreachable,
    /// The endpoint answered with something other than a status payload.
    Protocol,
    /// The payload arrived but required fields could not be parsed.
    Malformed,
}

/// Outcome of a single fetch-normalize cycle.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// The device is broadcasting; carries the normalized sample.
    Live(Sample),
    /// The device answered and explicitly reported no active broadcast.
    Idle,
    /// No usable answer this tick. A partial sample may still be present
    /// when the payload parsed far enough to yield one (malformed case);
    /// it is appended to an open session to preserve timeline continuity.
    Unreachable(FailureKind, Option<Sample>),
}

/// The transient result of one poll tick for one device.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub device_id: String,
    /// Wall-clock time the tick completed
    pub timestamp: DateTime<Utc>,
    pub outcome: PollOutcome,
}

impl PollResult {
    pub fn new(device_id: impl Into<String>, timestamp: DateTime<Utc>, outcome: PollOutcome) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            outcome,
        }
    }

    /// Whether this tick counts toward the consecutive-failure tally.
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, PollOutcome::Unreachable(..))
    }
}
