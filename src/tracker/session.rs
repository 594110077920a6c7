/// Per-event update loops for live and simulated sessions
use super::{SessionState, Terminal, TrackEvent, TrackMode, TrackerInner};
use crate::clients::order_history;
use crate::domain::{RawQuakeEvent, TrackingSnapshot};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Channel {
    tx: Option<UnboundedSender<TrackEvent>>,
    state: SessionState,
}

/// Delivery side of a session.
///
/// Emission and termination share one lock, so once `finish` has returned
/// no further snapshot reaches the subscriber.
pub(super) struct Emitter {
    channel: Mutex<Channel>,
    cancel: CancellationToken,
}

impl Emitter {
    pub(super) fn new(tx: UnboundedSender<TrackEvent>, cancel: CancellationToken) -> Self {
        Self {
            channel: Mutex::new(Channel {
                tx: Some(tx),
                state: SessionState::Starting,
            }),
            cancel,
        }
    }

    /// Deliver a snapshot. Returns false once the session should stop.
    fn emit(&self, snapshot: TrackingSnapshot) -> bool {
        let mut channel = self.channel.lock();
        if self.cancel.is_cancelled() {
            return false;
        }
        let Some(tx) = channel.tx.as_ref() else {
            return false;
        };
        if tx.send(TrackEvent::Snapshot(snapshot)).is_err() {
            // subscriber detached
            channel.tx = None;
            return false;
        }
        channel.state = SessionState::Running;
        true
    }

    /// Deliver the terminal signal; only the first call has any effect
    pub(super) fn finish(&self, terminal: Terminal) -> bool {
        let Some(tx) = self.channel.lock().tx.take() else {
            return false;
        };
        let _ = tx.send(TrackEvent::Finished(terminal));
        true
    }

    pub(super) fn state(&self) -> SessionState {
        self.channel.lock().state
    }

    /// Resolves once the subscriber has dropped its receiver or the
    /// terminal signal has already gone out
    async fn detached(&self) {
        let tx = self.channel.lock().tx.clone();
        if let Some(tx) = tx {
            tx.closed().await;
        }
    }
}

pub(super) struct Session {
    pub(super) session_id: u64,
    pub(super) seed: RawQuakeEvent,
    pub(super) mode: TrackMode,
    pub(super) cancel: CancellationToken,
    pub(super) emitter: Arc<Emitter>,
    pub(super) tracker: Arc<TrackerInner>,
}

impl Session {
    fn event_id(&self) -> &str {
        &self.seed.event_id
    }

    pub(super) async fn run(self) {
        info!(
            "Starting {:?} tracking for event {} (session {})",
            self.mode,
            self.event_id(),
            self.session_id
        );

        // also fires if the loop panics or the task is aborted
        let mut exit = ExitGuard {
            session: &self,
            terminal: None,
        };

        let terminal = match self.mode {
            TrackMode::Live => self.run_live().await,
            TrackMode::Simulated { speed } => self.run_simulated(speed).await,
        };

        match &terminal {
            Terminal::Completed => info!("Tracking of event {} completed", self.event_id()),
            Terminal::Cancelled => info!("Tracking of event {} cancelled", self.event_id()),
            Terminal::Error(reason) => {
                error!("Tracking of event {} failed: {}", self.event_id(), reason)
            }
        }
        exit.terminal = Some(terminal);
    }

    fn detached(&self) -> Terminal {
        debug!("Subscriber of event {} went away", self.event_id());
        Terminal::Cancelled
    }

    /// Build with the settings current at this cycle and hand the snapshot
    /// on. Returns false once the session should stop.
    fn publish(
        &self,
        raw: &RawQuakeEvent,
        now: DateTime<Utc>,
        last_emitted: &mut Option<DateTime<Utc>>,
    ) -> bool {
        let settings = self.tracker.settings.current();
        let snapshot = match TrackingSnapshot::build(
            raw,
            settings.reference.as_ref(),
            &settings.alert_limit,
            now,
        ) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Skipping update for event {}: {}", self.event_id(), e);
                return true;
            }
        };

        if let Some(last) = *last_emitted {
            if snapshot.update_at < last {
                debug!(
                    "Dropping stale update for event {} ({} < {})",
                    self.event_id(),
                    snapshot.update_at,
                    last
                );
                return true;
            }
        }
        *last_emitted = Some(snapshot.update_at);

        debug!(
            "Event {} update: M{:.1} distance={:?} countdown={:?} intensity={:?} stage={:?}",
            snapshot.event_id,
            snapshot.magnitude,
            snapshot.distance_km,
            snapshot.countdown_seconds,
            snapshot.intensity,
            snapshot.stage
        );
        self.emitter.emit(snapshot)
    }

    async fn run_live(&self) -> Terminal {
        let config = &self.tracker.config;
        let mut settings_rx = self.tracker.settings.subscribe();
        let mut last_emitted = None;
        let mut failures = 0u32;

        // a well-formed seed is shown right away; a bare id waits for the first fetch
        let mut wait = false;
        if TrackingSnapshot::build(&self.seed, None, &Default::default(), Utc::now()).is_ok() {
            if !self.publish(&self.seed, Utc::now(), &mut last_emitted) {
                return Terminal::Cancelled;
            }
            wait = true;
        }

        loop {
            if wait {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Terminal::Cancelled,
                    _ = self.emitter.detached() => return self.detached(),
                    Ok(()) = settings_rx.changed() => {
                        debug!("Settings changed, refreshing event {} early", self.event_id());
                    }
                    _ = tokio::time::sleep(config.update_interval) => {}
                }
            }
            wait = true;

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Terminal::Cancelled,
                _ = self.emitter.detached() => return self.detached(),
                fetched = self.tracker.feed.fetch_latest(self.event_id()) => fetched,
            };

            match fetched {
                Ok(raw) => {
                    failures = 0;
                    if !self.publish(&raw, Utc::now(), &mut last_emitted) {
                        return Terminal::Cancelled;
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Fetch for event {} failed ({}/{}): {}",
                        self.event_id(),
                        failures,
                        config.max_consecutive_failures,
                        e
                    );
                    if failures >= config.max_consecutive_failures {
                        return Terminal::Error(format!(
                            "{} consecutive fetch failures, last: {}",
                            failures, e
                        ));
                    }
                }
            }
        }
    }

    async fn run_simulated(&self, speed: f64) -> Terminal {
        let history = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Terminal::Cancelled,
            _ = self.emitter.detached() => return self.detached(),
            history = self.tracker.feed.fetch_history(self.event_id()) => history,
        };
        let history = match history {
            Ok(history) => order_history(history),
            Err(e) => return Terminal::Error(format!("history unavailable: {}", e)),
        };

        let Some(anchor) = self
            .seed
            .start_at
            .or_else(|| history.iter().find_map(|e| e.start_at))
        else {
            if history.is_empty() {
                return Terminal::Completed;
            }
            return Terminal::Error("history has no start time to anchor replay".to_string());
        };
        let offset = Utc::now() - anchor;
        info!(
            "Replaying {} updates for event {} shifted by {}s",
            history.len(),
            self.event_id(),
            offset.num_seconds()
        );

        let mut last_emitted = None;
        for (i, raw) in history.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Terminal::Cancelled;
            }

            let shifted = raw.shifted(offset);
            let now = shifted.effective_update_at().unwrap_or_else(Utc::now);
            if !self.publish(&shifted, now, &mut last_emitted) {
                return Terminal::Cancelled;
            }

            if let Some(next) = history.get(i + 1) {
                let gap = replay_gap(raw, next, speed);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Terminal::Cancelled,
                    _ = self.emitter.detached() => return self.detached(),
                    _ = tokio::time::sleep(gap) => {}
                }
            }
        }

        Terminal::Completed
    }
}

/// Unregisters the session and delivers its terminal signal on the way out
struct ExitGuard<'a> {
    session: &'a Session,
    terminal: Option<Terminal>,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let session = self.session;
        let terminal = self.terminal.take().unwrap_or_else(|| {
            error!(
                "Tracking of event {} (session {}) aborted",
                session.event_id(),
                session.session_id
            );
            Terminal::Error("tracking task aborted".to_string())
        });
        // unregister first so a subscriber seeing the terminal signal finds the id idle
        session.tracker.release(session.event_id(), session.session_id);
        session.emitter.finish(terminal);
    }
}

/// Longest wait between two replayed updates
pub(super) const MAX_REPLAY_GAP: Duration = Duration::from_secs(24 * 60 * 60);

/// Wait between two historical updates, compressed by `speed`, never
/// negative and capped at [`MAX_REPLAY_GAP`]
pub(super) fn replay_gap(current: &RawQuakeEvent, next: &RawQuakeEvent, speed: f64) -> Duration {
    let speed = if speed.is_finite() && speed > 0.0 {
        speed
    } else {
        1.0
    };
    match (current.effective_update_at(), next.effective_update_at()) {
        (Some(a), Some(b)) => {
            let secs = (b - a).num_milliseconds().max(0) as f64 / 1000.0;
            Duration::try_from_secs_f64(secs / speed)
                .map(|gap| gap.min(MAX_REPLAY_GAP))
                .unwrap_or(MAX_REPLAY_GAP)
        }
        _ => Duration::ZERO,
    }
}
