/// Application configuration and the live settings store
use crate::domain::{AlertLimit, ReferencePosition};
use serde::Serialize;
use std::env;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub feed: FeedConfig,
    pub tracker: TrackerConfig,
    pub settings: Settings,
}

/// Upstream feed endpoints
#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Recent event list
    pub list_url: String,
    /// Per-event update history; `{event_id}` is substituted
    pub event_url: String,
}

#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Live polling interval
    pub update_interval: Duration,
    /// Consecutive live fetch failures before a session gives up
    pub max_consecutive_failures: u32,
    /// Replay speed factor for simulations; 1.0 keeps the original cadence
    pub simulation_speed: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(5),
            max_consecutive_failures: 5,
            simulation_speed: 1.0,
        }
    }
}

/// User-adjustable settings read by every tracking session
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Settings {
    pub reference: Option<ReferencePosition>,
    pub alert_limit: AlertLimit,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let list_url = env::var("LIST_URL")
            .unwrap_or_else(|_| "https://mobile-new.chinaeew.cn/v1/earlywarnings".to_string());
        let event_url = env::var("FEED_URL").unwrap_or_else(|_| {
            "https://mobile-new.chinaeew.cn/v1/earlywarnings/{event_id}".to_string()
        });

        let tracker = TrackerConfig {
            update_interval: Duration::from_secs(env_u64("UPDATE_EVERY_SECONDS", 5).max(1)),
            max_consecutive_failures: env_u64("MAX_FETCH_FAILURES", 5).max(1) as u32,
            simulation_speed: env_f64("SIMULATION_SPEED").unwrap_or(1.0),
        };
        if !(tracker.simulation_speed.is_finite() && tracker.simulation_speed > 0.0) {
            anyhow::bail!(
                "SIMULATION_SPEED must be a positive number, got {}",
                tracker.simulation_speed
            );
        }

        let reference = match (env_f64("REFERENCE_LAT"), env_f64("REFERENCE_LON")) {
            (Some(latitude), Some(longitude)) => Some(ReferencePosition {
                latitude,
                longitude,
            }),
            _ => None,
        };
        let defaults = AlertLimit::default();
        let alert_limit = AlertLimit {
            min_magnitude: env_f64("ALERT_MIN_MAGNITUDE").unwrap_or(defaults.min_magnitude),
            min_intensity: env_f64("ALERT_MIN_INTENSITY").unwrap_or(defaults.min_intensity),
            max_distance_km: env_f64("ALERT_MAX_DISTANCE_KM"),
        };

        Ok(Self {
            bind_addr,
            feed: FeedConfig {
                list_url,
                event_url,
            },
            tracker,
            settings: Settings {
                reference,
                alert_limit,
            },
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str) -> Option<f64> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Holder of the current [`Settings`].
///
/// Readers get a cloned snapshot and never hold a lock across a cycle;
/// writers publish a whole new value and wake every subscriber.
#[derive(Debug)]
pub struct SettingsStore {
    tx: watch::Sender<Settings>,
}

impl SettingsStore {
    pub fn new(initial: Settings) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> Settings {
        self.tx.borrow().clone()
    }

    pub fn reference_position(&self) -> Option<ReferencePosition> {
        self.tx.borrow().reference
    }

    pub fn alert_limit(&self) -> AlertLimit {
        self.tx.borrow().alert_limit.clone()
    }

    pub fn set_reference_position(&self, reference: Option<ReferencePosition>) {
        self.tx.send_if_modified(|s| {
            let changed = s.reference != reference;
            s.reference = reference;
            changed
        });
    }

    pub fn set_alert_limit(&self, limit: AlertLimit) {
        self.tx.send_if_modified(|s| {
            let changed = s.alert_limit != limit;
            s.alert_limit = limit;
            changed
        });
    }

    /// Change notifications; the receiver starts with the current value seen
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
