//! Telemetry client adapter for StreamWatch.
//!
//! The poller treats status fetching as a pluggable capability: anything
//! implementing [`TelemetryClient`] can stand in for the vendor REST API.
//! The shipped implementation, [`StreamHubClient`], polls StreamHub-style
//! endpoints over HTTP with a hard per-call timeout.
//!
//! The adapter owns exactly one HTTP call per tick. Retrying is the
//! scheduler's job (it simply polls again next tick), so no retry logic
//! lives here.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use streamwatch_core::DeviceConfig;

/// Result type for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Typed failure of a single status fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The call did not complete within the configured timeout.
    #[error("fetch timed out")]
    Timeout,

    /// The endpoint could not be reached (DNS, connect, reset).
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// The endpoint answered, but not with a status payload
    /// (redirect to login, HTTP error status, non-JSON body).
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Raw status payload as returned by the vendor API.
///
/// The body is kept as loosely-typed JSON on purpose: vendor firmwares
/// disagree on field names and types, and the normalizer is the single
/// place that interprets them.
#[derive(Debug, Clone)]
pub struct RawPayload {
    /// When the fetch completed, by our clock
    pub fetched_at: DateTime<Utc>,
    /// The decoded response body
    pub body: Value,
}

impl RawPayload {
    pub fn new(fetched_at: DateTime<Utc>, body: Value) -> Self {
        Self { fetched_at, body }
    }
}

/// One "fetch status" call per device per poll tick.
#[async_trait]
pub trait TelemetryClient: Send + Sync {
    /// Fetch the current status document for `device`.
    ///
    /// Must not block past the adapter's configured timeout; a hung
    /// endpoint surfaces as [`FetchError::Timeout`].
    async fn fetch(&self, device: &DeviceConfig) -> FetchResult<RawPayload>;
}

pub use http::{StreamHubClient, StreamHubClientConfig};
