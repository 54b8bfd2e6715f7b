//! Per-device session state machine.
//!
//! A `SessionTracker` consumes the stream of poll outcomes for one device
//! and drives the session lifecycle in the store: a live sample while idle
//! opens a session, an explicit idle answer closes it gracefully, and a run
//! of consecutive failed ticks closes it as timed out once the silence
//! threshold is reached. Trackers hold no samples themselves; the store is
//! the single source of truth and the tracker only remembers which session
//! is open and how long the device has been silent.
//!
//! Store errors are logged rather than propagated. A tracker that bailed
//! out on a store hiccup would strand its device permanently; the next
//! tick gets another chance.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use streamwatch_core::{CloseReason, PollOutcome, PollResult, Sample, SessionId};
use streamwatch_storage::SessionStore;

/// What a poll tick did to the device's session, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A new session was opened (and its first sample appended).
    Opened(SessionId),
    /// A sample was appended to the already-open session.
    Continued,
    /// The open session was closed.
    Closed(SessionId),
    /// Nothing changed.
    None,
}

enum TrackerState {
    Idle,
    Live {
        session_id: SessionId,
        /// Timestamp of the newest appended sample; becomes the session's
        /// end time on close.
        last_sample_at: DateTime<Utc>,
        /// Consecutive failed ticks since the last successful sample.
        misses: u32,
    },
}

/// Session lifecycle driver for a single device.
pub struct SessionTracker {
    device_id: String,
    silence_threshold: u32,
    store: Arc<SessionStore>,
    state: TrackerState,
}

impl SessionTracker {
    pub fn new(device_id: impl Into<String>, silence_threshold: u32, store: Arc<SessionStore>) -> Self {
        Self {
            device_id: device_id.into(),
            silence_threshold: silence_threshold.max(1),
            store,
            state: TrackerState::Idle,
        }
    }

    /// The currently open session, if any.
    pub fn current_session(&self) -> Option<SessionId> {
        match self.state {
            TrackerState::Live { session_id, .. } => Some(session_id),
            TrackerState::Idle => None,
        }
    }

    /// Consecutive failed ticks since the last good sample.
    pub fn misses(&self) -> u32 {
        match self.state {
            TrackerState::Live { misses, .. } => misses,
            TrackerState::Idle => 0,
        }
    }

    /// Apply one poll tick.
    pub fn on_result(&mut self, result: &PollResult) -> Transition {
        match &result.outcome {
            PollOutcome::Live(sample) => self.on_live(sample),
            PollOutcome::Idle => self.on_idle(),
            PollOutcome::Unreachable(_, partial) => self.on_silent(partial.as_ref()),
        }
    }

    fn on_live(&mut self, sample: &Sample) -> Transition {
        match &mut self.state {
            TrackerState::Idle => {
                let session = match self.store.open_session(&self.device_id, sample.timestamp) {
                    Ok(session) => session,
                    Err(err) => {
                        error!(device_id = %self.device_id, %err, "failed to open session");
                        return Transition::None;
                    }
                };
                let session_id = session.id;
                if let Err(err) = self.store.append(session_id, sample.clone()) {
                    error!(session_id = %session_id, %err, "failed to append first sample");
                }
                self.state = TrackerState::Live {
                    session_id,
                    last_sample_at: sample.timestamp,
                    misses: 0,
                };
                info!(device_id = %self.device_id, session_id = %session_id, "broadcast started");
                Transition::Opened(session_id)
            }
            TrackerState::Live {
                session_id,
                last_sample_at,
                misses,
            } => {
                if let Err(err) = self.store.append(*session_id, sample.clone()) {
                    error!(session_id = %session_id, %err, "failed to append sample");
                    return Transition::None;
                }
                *last_sample_at = sample.timestamp;
                *misses = 0;
                Transition::Continued
            }
        }
    }

    fn on_idle(&mut self) -> Transition {
        match self.state {
            TrackerState::Idle => Transition::None,
            TrackerState::Live {
                session_id,
                last_sample_at,
                ..
            } => self.close(session_id, last_sample_at, CloseReason::Graceful),
        }
    }

    fn on_silent(&mut self, partial: Option<&Sample>) -> Transition {
        let TrackerState::Live {
            session_id,
            last_sample_at,
            misses,
        } = &mut self.state
        else {
            // The device is dark and no session is open; nothing to track.
            return Transition::None;
        };

        // Keep the timeline contiguous when the payload parsed far enough
        // to yield a partial sample, but still count the tick as a miss.
        if let Some(sample) = partial {
            match self.store.append(*session_id, sample.clone()) {
                Ok(_) => *last_sample_at = sample.timestamp,
                Err(err) => error!(session_id = %session_id, %err, "failed to append partial sample"),
            }
        }

        *misses += 1;
        if *misses >= self.silence_threshold {
            let (session_id, last_sample_at) = (*session_id, *last_sample_at);
            warn!(
                device_id = %self.device_id,
                session_id = %session_id,
                misses = self.silence_threshold,
                "device silent past threshold"
            );
            self.close(session_id, last_sample_at, CloseReason::Timeout)
        } else {
            Transition::Continued
        }
    }

    /// Close the open session on poller shutdown.
    pub fn shutdown(&mut self) -> Transition {
        match self.state {
            TrackerState::Idle => Transition::None,
            TrackerState::Live {
                session_id,
                last_sample_at,
                ..
            } => self.close(session_id, last_sample_at, CloseReason::Shutdown),
        }
    }

    fn close(
        &mut self,
        session_id: SessionId,
        end_time: DateTime<Utc>,
        reason: CloseReason,
    ) -> Transition {
        if let Err(err) = self.store.close_session(session_id, end_time, reason) {
            error!(session_id = %session_id, %err, "failed to close session");
        }
        self.state = TrackerState::Idle;
        Transition::Closed(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use streamwatch_core::{FailureKind, InterfaceReading};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_735_689_600 + secs, 0).single().unwrap()
    }

    fn live(secs: i64) -> PollResult {
        let sample =
            Sample::new("d1", at(secs)).with_link(InterfaceReading::named("wwan0"));
        PollResult::new("d1", at(secs), PollOutcome::Live(sample))
    }

    fn idle(secs: i64) -> PollResult {
        PollResult::new("d1", at(secs), PollOutcome::Idle)
    }

    fn silent(secs: i64) -> PollResult {
        PollResult::new(
            "d1",
            at(secs),
            PollOutcome::Unreachable(FailureKind::Unreachable, None),
        )
    }

    fn tracker(store: &Arc<SessionStore>, threshold: u32) -> SessionTracker {
        SessionTracker::new("d1", threshold, Arc::clone(store))
    }

    #[test]
    fn test_graceful_broadcast_lifecycle() {
        let store = Arc::new(SessionStore::new());
        let mut tracker = tracker(&store, 3);

        let Transition::Opened(id) = tracker.on_result(&live(0)) else {
            panic!("first live tick should open a session");
        };
        assert_eq!(tracker.on_result(&live(5)), Transition::Continued);
        assert_eq!(tracker.on_result(&live(10)), Transition::Continued);
        assert_eq!(tracker.on_result(&idle(15)), Transition::Closed(id));

        let session = store.get_session(id).unwrap();
        assert_eq!(session.started_at, at(0));
        assert_eq!(session.ended_at, Some(at(10)));
        assert_eq!(session.close_reason, Some(CloseReason::Graceful));
        assert_eq!(store.sample_count(id).unwrap(), 3);
    }

    #[test]
    fn test_idle_while_idle_is_noop() {
        let store = Arc::new(SessionStore::new());
        let mut tracker = tracker(&store, 3);
        assert_eq!(tracker.on_result(&idle(0)), Transition::None);
        assert_eq!(tracker.on_result(&silent(5)), Transition::None);
        assert_eq!(store.list_sessions("d1").len(), 0);
    }

    #[test]
    fn test_silence_past_threshold_closes_as_timeout() {
        let store = Arc::new(SessionStore::new());
        let mut tracker = tracker(&store, 3);

        let Transition::Opened(first) = tracker.on_result(&live(0)) else {
            panic!("expected open");
        };
        tracker.on_result(&live(5));
        tracker.on_result(&live(10));

        assert_eq!(tracker.on_result(&silent(15)), Transition::Continued);
        assert_eq!(tracker.on_result(&silent(20)), Transition::Continued);
        assert_eq!(tracker.on_result(&silent(25)), Transition::Closed(first));

        let session = store.get_session(first).unwrap();
        assert_eq!(session.ended_at, Some(at(10)));
        assert_eq!(session.close_reason, Some(CloseReason::Timeout));

        // Recovery after the close starts a fresh session.
        let Transition::Opened(second) = tracker.on_result(&live(30)) else {
            panic!("expected a new session after recovery");
        };
        assert_ne!(first, second);
        assert_eq!(store.get_session(second).unwrap().started_at, at(30));
    }

    #[test]
    fn test_short_silence_does_not_split_session() {
        let store = Arc::new(SessionStore::new());
        let mut tracker = tracker(&store, 3);

        let Transition::Opened(id) = tracker.on_result(&live(0)) else {
            panic!("expected open");
        };
        tracker.on_result(&silent(5));
        tracker.on_result(&silent(10));
        assert_eq!(tracker.misses(), 2);

        // A good sample resets the miss counter.
        assert_eq!(tracker.on_result(&live(15)), Transition::Continued);
        assert_eq!(tracker.misses(), 0);
        tracker.on_result(&silent(20));
        tracker.on_result(&silent(25));
        assert_eq!(tracker.on_result(&idle(30)), Transition::Closed(id));

        assert_eq!(store.list_sessions("d1").len(), 1);
        let session = store.get_session(id).unwrap();
        assert_eq!(session.ended_at, Some(at(15)));
        assert_eq!(session.close_reason, Some(CloseReason::Graceful));
    }

    #[test]
    fn test_partial_sample_keeps_timeline_and_counts_miss() {
        let store = Arc::new(SessionStore::new());
        let mut tracker = tracker(&store, 3);

        let Transition::Opened(id) = tracker.on_result(&live(0)) else {
            panic!("expected open");
        };

        let partial = Sample::new("d1", at(5));
        let result = PollResult::new(
            "d1",
            at(5),
            PollOutcome::Unreachable(FailureKind::Malformed, Some(partial)),
        );
        assert_eq!(tracker.on_result(&result), Transition::Continued);
        assert_eq!(tracker.misses(), 1);
        assert_eq!(store.sample_count(id).unwrap(), 2);

        // Timeout end time reflects the partial, the newest appended sample.
        tracker.on_result(&silent(10));
        assert_eq!(tracker.on_result(&silent(15)), Transition::Closed(id));
        assert_eq!(store.get_session(id).unwrap().ended_at, Some(at(5)));
    }

    #[test]
    fn test_shutdown_closes_open_session() {
        let store = Arc::new(SessionStore::new());
        let mut tracker = tracker(&store, 3);

        let Transition::Opened(id) = tracker.on_result(&live(0)) else {
            panic!("expected open");
        };
        tracker.on_result(&live(5));

        assert_eq!(tracker.shutdown(), Transition::Closed(id));
        let session = store.get_session(id).unwrap();
        assert_eq!(session.ended_at, Some(at(5)));
        assert_eq!(session.close_reason, Some(CloseReason::Shutdown));

        // Shutdown while idle is a no-op.
        assert_eq!(tracker.shutdown(), Transition::None);
    }
}
