//! Error types for the storage crate.

use streamwatch_core::SessionId;
use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum Error {
    /// No session with this id exists.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The session exists but is closed; appends are rejected.
    #[error("session closed: {0}")]
    SessionClosed(SessionId),

    /// A device may have at most one open session.
    #[error("device {device_id} already has open session {session_id}")]
    SessionAlreadyOpen {
        device_id: String,
        session_id: SessionId,
    },
}
