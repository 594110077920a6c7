/// Business logic between the HTTP surface and the tracker
use crate::config::SettingsStore;
use crate::domain::{RawQuakeEvent, TrackingSnapshot};
use crate::errors::{ApiError, ApiResult};
use crate::tracker::{SessionInfo, Terminal, TrackEvent, TrackMode, TrackSubscription, Tracker};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Finished entries are kept this long before eviction
const BOARD_RETENTION_MINUTES: i64 = 30;
/// Finished entries beyond this count are evicted oldest first
const BOARD_MAX_FINISHED: usize = 256;

/// Last known outcome of a tracked event
#[derive(Debug, Clone, Serialize)]
pub struct BoardEntry {
    pub session_id: u64,
    pub latest: Option<TrackingSnapshot>,
    pub snapshots: u64,
    pub alerted: bool,
    pub terminal: Option<Terminal>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// In-memory view of sessions started through the service. Running
/// sessions stay on the board; finished ones expire.
#[derive(Default)]
pub struct TrackingBoard {
    entries: RwLock<HashMap<String, BoardEntry>>,
}

impl TrackingBoard {
    fn open(&self, event_id: &str, session_id: u64, now: DateTime<Utc>) {
        let mut entries = self.entries.write();
        prune(&mut entries, now);
        entries.insert(
            event_id.to_string(),
            BoardEntry {
                session_id,
                latest: None,
                snapshots: 0,
                alerted: false,
                terminal: None,
                finished_at: None,
            },
        );
    }

    /// Record a snapshot; returns true when this is the first alerting one
    fn record(&self, session_id: u64, snapshot: TrackingSnapshot) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&snapshot.event_id) else {
            return false;
        };
        if entry.session_id != session_id {
            return false;
        }
        let first_alert = snapshot.should_alert && !entry.alerted;
        entry.alerted |= snapshot.should_alert;
        entry.snapshots += 1;
        entry.latest = Some(snapshot);
        first_alert
    }

    fn close(&self, event_id: &str, session_id: u64, terminal: Terminal, now: DateTime<Utc>) {
        if let Some(entry) = self.entries.write().get_mut(event_id) {
            if entry.session_id == session_id {
                entry.terminal = Some(terminal);
                entry.finished_at = Some(now);
            }
        }
    }

    pub fn get(&self, event_id: &str) -> Option<BoardEntry> {
        self.entries.read().get(event_id).cloned()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Drop finished entries past retention, then the oldest finished ones over the cap
fn prune(entries: &mut HashMap<String, BoardEntry>, now: DateTime<Utc>) {
    let cutoff = now - ChronoDuration::minutes(BOARD_RETENTION_MINUTES);
    entries.retain(|_, e| e.finished_at.map_or(true, |at| at > cutoff));

    let mut finished: Vec<(DateTime<Utc>, String)> = entries
        .iter()
        .filter_map(|(id, e)| e.finished_at.map(|at| (at, id.clone())))
        .collect();
    if finished.len() <= BOARD_MAX_FINISHED {
        return;
    }
    finished.sort();
    let excess = finished.len() - BOARD_MAX_FINISHED;
    for (_, id) in finished.into_iter().take(excess) {
        entries.remove(&id);
    }
}

/// Quake listing and tracking service
pub struct QuakeService {
    tracker: Tracker,
    board: Arc<TrackingBoard>,
    simulation_speed: f64,
}

impl QuakeService {
    pub fn new(tracker: Tracker, simulation_speed: f64) -> Self {
        Self {
            tracker,
            board: Arc::new(TrackingBoard::default()),
            simulation_speed,
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        self.tracker.settings()
    }

    /// Recent events enriched against the current settings; malformed entries are skipped
    pub async fn list_recent(&self) -> ApiResult<Vec<TrackingSnapshot>> {
        let events = self.tracker.feed().fetch_list().await?;
        let settings = self.settings().current();
        let now = Utc::now();

        let snapshots = events
            .iter()
            .filter_map(|raw| {
                match TrackingSnapshot::build(
                    raw,
                    settings.reference.as_ref(),
                    &settings.alert_limit,
                    now,
                ) {
                    Ok(snapshot) => Some(snapshot),
                    Err(e) => {
                        debug!("Skipping list entry {}: {}", raw.event_id, e);
                        None
                    }
                }
            })
            .collect();
        Ok(snapshots)
    }

    /// Start polling an event live
    pub fn track(&self, event_id: &str) -> ApiResult<SessionInfo> {
        self.start(RawQuakeEvent::seed(validate_id(event_id)?), TrackMode::Live)
    }

    /// Replay an event's recorded updates as if they were arriving now
    pub async fn simulate(&self, event_id: &str) -> ApiResult<SessionInfo> {
        let event_id = validate_id(event_id)?;
        // anchor on the listed start time when the event is still in the list
        let seed = self
            .tracker
            .feed()
            .fetch_list()
            .await
            .ok()
            .and_then(|events| events.into_iter().find(|e| e.event_id == event_id))
            .unwrap_or_else(|| RawQuakeEvent::seed(event_id));
        self.start(
            seed,
            TrackMode::Simulated {
                speed: self.simulation_speed,
            },
        )
    }

    pub fn cancel(&self, event_id: &str) -> ApiResult<()> {
        if self.tracker.cancel(event_id) {
            Ok(())
        } else {
            Err(ApiError::NotFound(format!("no active session for {}", event_id)))
        }
    }

    pub fn status(&self, event_id: &str) -> ApiResult<BoardEntry> {
        self.board
            .get(event_id)
            .ok_or_else(|| ApiError::NotFound(format!("event {} was never tracked", event_id)))
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.tracker.active_sessions()
    }

    pub fn shutdown(&self) {
        self.tracker.shutdown();
    }

    fn start(&self, seed: RawQuakeEvent, mode: TrackMode) -> ApiResult<SessionInfo> {
        let subscription = self.tracker.start_track(seed, mode, CancellationToken::new());
        let event_id = subscription.event_id().to_string();
        let session_id = subscription.session_id();
        self.board.open(&event_id, session_id, Utc::now());
        tokio::spawn(watch_session(self.board.clone(), subscription));

        Ok(SessionInfo {
            event_id: event_id.clone(),
            session_id,
            mode,
            state: self.tracker.state(&event_id),
        })
    }
}

fn validate_id(event_id: &str) -> ApiResult<&str> {
    let trimmed = event_id.trim();
    if trimmed.is_empty() || trimmed.len() > 64 {
        return Err(ApiError::InvalidInput(format!(
            "event id must be 1-64 characters, got {:?}",
            event_id
        )));
    }
    Ok(trimmed)
}

/// Drain a subscription into the board, surfacing alerts in the log
async fn watch_session(board: Arc<TrackingBoard>, mut subscription: TrackSubscription) {
    let session_id = subscription.session_id();
    while let Some(event) = subscription.recv().await {
        match event {
            TrackEvent::Snapshot(snapshot) => {
                let event_id = snapshot.event_id.clone();
                let summary = format!(
                    "M{:.1} {} stage={:?} countdown={:?} intensity={:?}",
                    snapshot.magnitude,
                    snapshot.epicenter.as_deref().unwrap_or("unknown epicenter"),
                    snapshot.stage,
                    snapshot.countdown_seconds.map(|c| c.round()),
                    snapshot.intensity.map(|i| (i * 10.0).round() / 10.0),
                );
                if board.record(session_id, snapshot) {
                    warn!("ALERT for event {}: {}", event_id, summary);
                } else {
                    debug!("Event {}: {}", event_id, summary);
                }
            }
            TrackEvent::Finished(terminal) => {
                info!(
                    "Session {} for event {} finished: {:?}",
                    session_id,
                    subscription.event_id(),
                    terminal
                );
                board.close(subscription.event_id(), session_id, terminal, Utc::now());
            }
        }
    }
}
