//! Stateful tracking of quake events.
//!
//! A [`Tracker`] owns at most one session per event id. Each session runs as
//! its own tokio task and delivers [`TrackEvent`]s to a single subscriber:
//! a stream of snapshots in update order, then exactly one terminal signal.
//!
//! ```text
//! Idle ─start_track─► Starting ─first snapshot─► Running ─┬─► Completed
//!                        │                                ├─► Cancelled
//!                        └────────────────────────────────┴─► Error
//! ```
//!
//! Starting a session for an id that is already tracked cancels the old
//! session first; its subscriber receives `Cancelled` before the new
//! session is spawned.

mod session;

use crate::clients::QuakeFeed;
use crate::config::{SettingsStore, TrackerConfig};
use crate::domain::{RawQuakeEvent, TrackingSnapshot};
use crate::errors::{QuakeError, QuakeResult};
use parking_lot::Mutex;
use serde::Serialize;
use session::{Emitter, Session};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TrackMode {
    /// Poll the feed for the latest update on every interval
    Live,
    /// Replay the recorded history, gaps divided by `speed`
    Simulated { speed: f64 },
}

/// Registration state of an event id. Ended sessions are unregistered, so
/// their outcome is only reported through the subscriber's [`Terminal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
}

/// Final signal of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Terminal {
    Completed,
    Cancelled,
    Error(String),
}

impl Terminal {
    /// `Completed` is success; the other outcomes map onto [`QuakeError`]
    pub fn into_result(self) -> QuakeResult<()> {
        match self {
            Terminal::Completed => Ok(()),
            Terminal::Cancelled => Err(QuakeError::Cancelled),
            Terminal::Error(reason) => Err(QuakeError::SessionFailed(reason)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    Snapshot(TrackingSnapshot),
    Finished(Terminal),
}

/// Receiving end handed to whoever started a session
pub struct TrackSubscription {
    event_id: String,
    session_id: u64,
    rx: mpsc::UnboundedReceiver<TrackEvent>,
}

impl TrackSubscription {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Next event; `None` after the terminal signal has been consumed
    pub async fn recv(&mut self) -> Option<TrackEvent> {
        self.rx.recv().await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub event_id: String,
    pub session_id: u64,
    #[serde(flatten)]
    pub mode: TrackMode,
    pub state: SessionState,
}

struct SessionHandle {
    session_id: u64,
    mode: TrackMode,
    cancel: CancellationToken,
    emitter: Arc<Emitter>,
}

impl SessionHandle {
    fn stop(&self) {
        self.emitter.finish(Terminal::Cancelled);
        self.cancel.cancel();
    }
}

pub(crate) struct TrackerInner {
    feed: Arc<dyn QuakeFeed>,
    settings: Arc<SettingsStore>,
    config: TrackerConfig,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    next_session: AtomicU64,
}

impl TrackerInner {
    /// Drop the table entry if it still belongs to `session_id`
    fn release(&self, event_id: &str, session_id: u64) {
        let mut sessions = self.sessions.lock();
        if sessions
            .get(event_id)
            .map(|h| h.session_id == session_id)
            .unwrap_or(false)
        {
            sessions.remove(event_id);
        }
    }
}

/// Orchestrates tracking sessions; cheap to clone
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    pub fn new(
        feed: Arc<dyn QuakeFeed>,
        settings: Arc<SettingsStore>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                feed,
                settings,
                config,
                sessions: Mutex::new(HashMap::new()),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.inner.settings
    }

    pub fn feed(&self) -> &Arc<dyn QuakeFeed> {
        &self.inner.feed
    }

    /// Start tracking `seed.event_id`, replacing any session already running
    /// for it. Cancelling `cancel` ends the session at its next boundary.
    /// The session runs on a child of `cancel`, so replacing it never
    /// cancels the caller's token.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_track(
        &self,
        seed: RawQuakeEvent,
        mode: TrackMode,
        cancel: CancellationToken,
    ) -> TrackSubscription {
        let cancel = cancel.child_token();
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Arc::new(Emitter::new(tx, cancel.clone()));
        let session_id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        let event_id = seed.event_id.clone();

        {
            let mut sessions = self.inner.sessions.lock();
            let handle = SessionHandle {
                session_id,
                mode,
                cancel: cancel.clone(),
                emitter: emitter.clone(),
            };
            if let Some(previous) = sessions.insert(event_id.clone(), handle) {
                info!(
                    "Replacing session {} for event {}",
                    previous.session_id, event_id
                );
                previous.stop();
            }
        }

        let session = Session {
            session_id,
            seed,
            mode,
            cancel,
            emitter,
            tracker: self.inner.clone(),
        };
        tokio::spawn(session.run());

        TrackSubscription {
            event_id,
            session_id,
            rx,
        }
    }

    /// Cancel the session for `event_id`. The subscriber has received
    /// `Cancelled`, and nothing after it, by the time this returns.
    pub fn cancel(&self, event_id: &str) -> bool {
        let handle = self.inner.sessions.lock().remove(event_id);
        match handle {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn state(&self, event_id: &str) -> SessionState {
        self.inner
            .sessions
            .lock()
            .get(event_id)
            .map(|h| h.emitter.state())
            .unwrap_or(SessionState::Idle)
    }

    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.inner.sessions.lock();
        let mut infos: Vec<SessionInfo> = sessions
            .iter()
            .map(|(event_id, h)| SessionInfo {
                event_id: event_id.clone(),
                session_id: h.session_id,
                mode: h.mode,
                state: h.emitter.state(),
            })
            .collect();
        infos.sort_by_key(|i| i.session_id);
        infos
    }

    /// Cancel every session
    pub fn shutdown(&self) {
        let drained: Vec<SessionHandle> = self
            .inner
            .sessions
            .lock()
            .drain()
            .map(|(_, h)| h)
            .collect();
        for handle in drained {
            handle.stop();
        }
    }
}
