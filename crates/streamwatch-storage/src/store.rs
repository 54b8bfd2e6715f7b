//! The in-memory session store.
//!
//! Concurrency model: one writer per session (the owning device's polling
//! loop), any number of concurrent readers. Sample vectors sit behind
//! short-lived `parking_lot` read-write locks, so a reader is never held
//! up by a concurrent append for longer than one sample copy. Tail readers
//! park on a `tokio::sync::watch` channel that the writer bumps after
//! every append and on close.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

use streamwatch_core::{CloseReason, Sample, Session, SessionId};

use crate::error::{Error, Result};

/// Progress signal for tail readers: sample count and terminal flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Progress {
    len: u64,
    closed: bool,
}

/// One session's metadata, samples and wakeup channel.
struct SessionEntry {
    meta: RwLock<Session>,
    samples: RwLock<Vec<Sample>>,
    progress: watch::Sender<Progress>,
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        let (progress, _) = watch::channel(Progress {
            len: 0,
            closed: false,
        });
        Self {
            meta: RwLock::new(session),
            samples: RwLock::new(Vec::new()),
            progress,
        }
    }
}

/// Append-only store of broadcast sessions and their samples.
///
/// Cheap to clone via `Arc`; all methods take `&self`.
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<SessionEntry>>,
    /// Currently open session per device, if any
    open_by_device: DashMap<String, SessionId>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            open_by_device: DashMap::new(),
        }
    }

    /// Open a new session for a device.
    ///
    /// Fails if the device already has an open session; at most one
    /// session per device may be open at any time.
    pub fn open_session(
        &self,
        device_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Session> {
        if let Some(existing) = self.open_by_device.get(device_id) {
            return Err(Error::SessionAlreadyOpen {
                device_id: device_id.to_string(),
                session_id: *existing.value(),
            });
        }

        let session = Session::open(device_id, started_at);
        let id = session.id;
        self.sessions
            .insert(id, Arc::new(SessionEntry::new(session.clone())));
        self.open_by_device.insert(device_id.to_string(), id);
        info!(device_id, session_id = %id, "session opened");
        Ok(session)
    }

    /// Append a sample to an open session.
    ///
    /// The store assigns the sample's sequence index (contiguous from 0)
    /// and makes it immediately visible to tail and range readers.
    /// Returns the assigned index.
    pub fn append(&self, session_id: SessionId, mut sample: Sample) -> Result<u64> {
        let entry = self.entry(session_id)?;
        if !entry.meta.read().is_open() {
            return Err(Error::SessionClosed(session_id));
        }

        let len = {
            let mut samples = entry.samples.write();
            sample.seq = samples.len() as u64;
            samples.push(sample);
            samples.len() as u64
        };
        let _ = entry.progress.send(Progress { len, closed: false });
        Ok(len - 1)
    }

    /// Mark a session terminal. Subsequent appends fail with
    /// [`Error::SessionClosed`]; active tails run dry and terminate.
    pub fn close_session(
        &self,
        session_id: SessionId,
        end_time: DateTime<Utc>,
        reason: CloseReason,
    ) -> Result<Session> {
        let entry = self.entry(session_id)?;

        let session = {
            let mut meta = entry.meta.write();
            if !meta.is_open() {
                return Err(Error::SessionClosed(session_id));
            }
            meta.ended_at = Some(end_time);
            meta.close_reason = Some(reason);
            meta.clone()
        };
        self.open_by_device.remove(&session.device_id);

        let len = entry.samples.read().len() as u64;
        let _ = entry.progress.send(Progress { len, closed: true });
        info!(session_id = %session_id, ?reason, "session closed");
        Ok(session)
    }

    /// Follow a session's samples from `from_seq` onward.
    ///
    /// The stream yields every existing sample with index >= `from_seq`,
    /// then waits for appends; it terminates when the session closes (or
    /// is deleted). Restartable: call again with any index to resume.
    pub fn tail(
        &self,
        session_id: SessionId,
        from_seq: u64,
    ) -> Result<impl Stream<Item = Sample> + Send + 'static> {
        let entry = self.entry(session_id)?;
        let mut rx = entry.progress.subscribe();
        let mut next = from_seq;

        Ok(async_stream::stream! {
            loop {
                let batch: Vec<Sample> = {
                    let samples = entry.samples.read();
                    samples
                        .get(next as usize..)
                        .map(|rest| rest.to_vec())
                        .unwrap_or_default()
                };
                if !batch.is_empty() {
                    next += batch.len() as u64;
                    for sample in batch {
                        yield sample;
                    }
                    continue;
                }

                let progress = *rx.borrow_and_update();
                if progress.len > next {
                    // Appends landed between the drain and the check.
                    continue;
                }
                if progress.closed {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Samples within the closed time interval `[from, to]`, in order.
    pub fn range(
        &self,
        session_id: SessionId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>> {
        let entry = self.entry(session_id)?;
        let samples = entry.samples.read();
        Ok(samples
            .iter()
            .filter(|s| s.timestamp >= from && s.timestamp <= to)
            .cloned()
            .collect())
    }

    /// Session metadata by id.
    pub fn get_session(&self, session_id: SessionId) -> Option<Session> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.meta.read().clone())
    }

    /// All sessions recorded for a device, newest first.
    pub fn list_sessions(&self, device_id: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .map(|entry| entry.meta.read().clone())
            .filter(|s| s.device_id == device_id)
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions
    }

    /// The currently open session for a device, if any.
    pub fn open_session_for(&self, device_id: &str) -> Option<SessionId> {
        self.open_by_device.get(device_id).map(|e| *e.value())
    }

    /// Number of currently open sessions across all devices.
    pub fn open_session_count(&self) -> usize {
        self.open_by_device.len()
    }

    /// Number of samples recorded for a session.
    pub fn sample_count(&self, session_id: SessionId) -> Result<u64> {
        let entry = self.entry(session_id)?;
        let len = entry.samples.read().len() as u64;
        Ok(len)
    }

    /// Timestamp of the most recent sample recorded for a device, across
    /// all of its sessions.
    pub fn last_sample_time(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.sessions
            .iter()
            .filter(|entry| entry.meta.read().device_id == device_id)
            .filter_map(|entry| entry.samples.read().last().map(|s| s.timestamp))
            .max()
    }

    /// Set or clear a session's operator-assigned title.
    pub fn rename_session(&self, session_id: SessionId, title: Option<String>) -> Result<Session> {
        let entry = self.entry(session_id)?;
        let mut meta = entry.meta.write();
        meta.title = title;
        Ok(meta.clone())
    }

    /// Administrative removal of one session and its samples.
    ///
    /// Not invoked by the poller itself; exposed for the management
    /// surface. Active tails on the session terminate.
    pub fn delete(&self, session_id: SessionId) -> Result<()> {
        let (_, entry) = self
            .sessions
            .remove(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;

        let session = entry.meta.read().clone();
        // Remove the open-session marker only if it still points here.
        if let Some((_, open_id)) = self
            .open_by_device
            .remove_if(&session.device_id, |_, id| *id == session_id)
        {
            debug!(session_id = %open_id, "deleted session was still open");
        }

        let len = entry.samples.read().len() as u64;
        let _ = entry.progress.send(Progress { len, closed: true });
        info!(session_id = %session_id, "session deleted");
        Ok(())
    }

    /// Administrative removal of everything.
    pub fn purge_all(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            let _ = self.delete(id);
        }
        info!("all sessions purged");
    }

    fn entry(&self, session_id: SessionId) -> Result<Arc<SessionEntry>> {
        self.sessions
            .get(&session_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(Error::SessionNotFound(session_id))
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
