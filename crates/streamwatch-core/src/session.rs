//! Broadcast sessions.
//!
//! A session is the contiguous record of one live broadcast for one device:
//! opened when the device transitions to live, closed when it reports idle
//! or falls silent past the configured threshold. At most one session per
//! device is open at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque session identifier, generated at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a fresh id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The device explicitly reported idle.
    Graceful,
    /// The device fell silent past the silence threshold.
    Timeout,
    /// The poller was stopped while the session was open.
    Shutdown,
}

/// Session metadata; the samples themselves live in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub device_id: String,
    pub started_at: DateTime<Utc>,
    /// Absent while the session is open
    pub ended_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
    /// Operator-assigned label, set after the fact
    pub title: Option<String>,
}

impl Session {
    /// Create an open session starting at `started_at`.
    pub fn open(device_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::generate(),
            device_id: device_id.into(),
            started_at,
            ended_at: None,
            close_reason: None,
            title: None,
        }
    }

    /// Whether the session is still accepting samples.
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_open_state() {
        let session = Session::open("d1", Utc::now());
        assert!(session.is_open());
        assert!(session.close_reason.is_none());
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
