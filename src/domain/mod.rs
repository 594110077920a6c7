/// Domain models for quake tracking
use crate::calculator;
use crate::errors::{QuakeError, QuakeResult};
use crate::policy;
use crate::utils::{n_pick, s_pick, t_pick};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One update for an event, as delivered by the feed.
///
/// Numeric fields stay optional here; they are validated when a
/// [`TrackingSnapshot`] is built from the update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawQuakeEvent {
    pub event_id: String,
    pub epicenter: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub update_at: Option<DateTime<Utc>>,
    pub depth: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub magnitude: Option<f64>,
    pub stations: Option<u32>,
    /// Ordinal of this update within the event, when the feed reports it
    pub updates: Option<u32>,
    /// Per-region intensity list, passed through untouched
    #[serde(default)]
    pub region_intensities: Vec<Value>,
}

impl RawQuakeEvent {
    /// Seed carrying only an event id, used to start a track from a list entry
    pub fn seed(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            ..Self::default()
        }
    }

    /// Parse a feed item, accepting the field spellings the feed has used
    pub fn from_value(item: &Value) -> QuakeResult<Self> {
        let event_id = s_pick(item, &["eventId", "event_id", "id"])
            .ok_or_else(|| QuakeError::InvalidEvent("missing event id".to_string()))?;

        let region_intensities = item
            .get("intensities")
            .or_else(|| item.get("regionIntensities"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            event_id,
            epicenter: s_pick(item, &["epicenter", "placeName", "location"]),
            start_at: t_pick(item, &["startAt", "start_at", "originTime"]),
            update_at: t_pick(item, &["updateAt", "update_at", "updatedAt"]),
            depth: n_pick(item, &["depth", "focalDepth"]),
            latitude: n_pick(item, &["latitude", "lat"]),
            longitude: n_pick(item, &["longitude", "lon", "lng"]),
            magnitude: n_pick(item, &["magnitude", "mag", "M"]),
            stations: n_pick(item, &["sations", "stations"]).map(|n| n.max(0.0) as u32),
            updates: n_pick(item, &["updates", "updateCount"]).map(|n| n.max(0.0) as u32),
            region_intensities,
        })
    }

    /// Copy with both timestamps moved by `offset`
    pub fn shifted(&self, offset: Duration) -> Self {
        Self {
            start_at: self.start_at.map(|t| t + offset),
            update_at: self.update_at.map(|t| t + offset),
            ..self.clone()
        }
    }

    /// The update time, falling back to the start time
    pub fn effective_update_at(&self) -> Option<DateTime<Utc>> {
        self.update_at.or(self.start_at)
    }
}

/// Observer location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePosition {
    pub latitude: f64,
    pub longitude: f64,
}

/// Thresholds gating whether a snapshot raises a user-visible alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertLimit {
    pub min_magnitude: f64,
    pub min_intensity: f64,
    /// No distance cap when unset
    #[serde(default)]
    pub max_distance_km: Option<f64>,
}

impl Default for AlertLimit {
    fn default() -> Self {
        Self {
            min_magnitude: 3.0,
            min_intensity: 2.0,
            max_distance_km: None,
        }
    }
}

/// Severity classification, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Notice,
    Warning,
    Emergency,
}

/// Enriched, immutable view of one event update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingSnapshot {
    pub event_id: String,
    pub epicenter: Option<String>,
    pub start_at: DateTime<Utc>,
    pub update_at: DateTime<Utc>,
    pub depth: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub magnitude: f64,
    pub stations: Option<u32>,
    pub updates: Option<u32>,
    pub region_intensities: Vec<Value>,
    pub distance_km: Option<f64>,
    pub countdown_seconds: Option<f64>,
    pub intensity: Option<f64>,
    pub stage: Stage,
    pub should_alert: bool,
}

fn required(name: &str, value: Option<f64>) -> QuakeResult<f64> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(QuakeError::InvalidEvent(format!("{} is not finite: {}", name, v))),
        None => Err(QuakeError::InvalidEvent(format!("missing {}", name))),
    }
}

impl TrackingSnapshot {
    /// Compose a snapshot from a raw update and the current settings.
    ///
    /// Without a reference position every derived field is left empty and
    /// `should_alert` is false. `now` is the instant the countdown is taken at.
    pub fn build(
        raw: &RawQuakeEvent,
        reference: Option<&ReferencePosition>,
        limit: &AlertLimit,
        now: DateTime<Utc>,
    ) -> QuakeResult<Self> {
        let depth = required("depth", raw.depth)?;
        if depth < 0.0 {
            return Err(QuakeError::InvalidEvent(format!("negative depth {}", depth)));
        }
        let latitude = required("latitude", raw.latitude)?;
        let longitude = required("longitude", raw.longitude)?;
        let magnitude = required("magnitude", raw.magnitude)?;
        let start_at = raw
            .start_at
            .ok_or_else(|| QuakeError::InvalidEvent("missing start time".to_string()))?;
        let update_at = raw.update_at.unwrap_or(start_at);

        let mut snapshot = Self {
            event_id: raw.event_id.clone(),
            epicenter: raw.epicenter.clone(),
            start_at,
            update_at,
            depth,
            latitude,
            longitude,
            magnitude,
            stations: raw.stations,
            updates: raw.updates,
            region_intensities: raw.region_intensities.clone(),
            distance_km: None,
            countdown_seconds: None,
            intensity: None,
            stage: Stage::Notice,
            should_alert: false,
        };

        let Some(reference) = reference else {
            return Ok(snapshot);
        };

        let distance = calculator::distance_km(
            reference.latitude,
            reference.longitude,
            latitude,
            longitude,
        );
        if !distance.is_finite() {
            return Err(QuakeError::InvalidArgument(format!(
                "reference position ({}, {}) yields no distance",
                reference.latitude, reference.longitude
            )));
        }
        let elapsed = (now - start_at).num_milliseconds() as f64 / 1000.0;
        let countdown = calculator::countdown_seconds(depth, distance, elapsed)?;
        let intensity = calculator::intensity(magnitude, distance)?;

        snapshot.distance_km = Some(distance);
        snapshot.countdown_seconds = Some(countdown);
        snapshot.intensity = Some(intensity);
        snapshot.stage = policy::stage(&snapshot);
        snapshot.should_alert = policy::should_alert(&snapshot, limit);
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn raw() -> RawQuakeEvent {
        RawQuakeEvent {
            event_id: "20240301080000".to_string(),
            epicenter: Some("Offshore".to_string()),
            start_at: Some(start()),
            update_at: Some(start() + Duration::seconds(8)),
            depth: Some(10.0),
            latitude: Some(30.0),
            longitude: Some(103.0),
            magnitude: Some(5.0),
            stations: Some(14),
            updates: Some(1),
            region_intensities: vec![],
        }
    }

    #[test]
    fn test_from_value_reads_feed_fields() {
        let item = serde_json::json!({
            "eventId": 11223344,
            "epicenter": "Lushan, Sichuan",
            "startAt": 1709280000000i64,
            "updateAt": 1709280008000i64,
            "depth": "12",
            "latitude": 30.3,
            "longitude": 102.9,
            "magnitude": 5.1,
            "sations": 21,
            "updates": 3
        });
        let raw = RawQuakeEvent::from_value(&item).unwrap();
        assert_eq!(raw.event_id, "11223344");
        assert_eq!(raw.depth, Some(12.0));
        assert_eq!(raw.stations, Some(21));
        assert_eq!(raw.updates, Some(3));
        assert_eq!(raw.start_at.map(|t| t.timestamp()), Some(1709280000));
        assert_eq!(
            raw.update_at.unwrap() - raw.start_at.unwrap(),
            Duration::seconds(8)
        );
    }

    #[test]
    fn test_from_value_requires_id() {
        let item = serde_json::json!({"magnitude": 4.0});
        assert!(matches!(
            RawQuakeEvent::from_value(&item),
            Err(QuakeError::InvalidEvent(_))
        ));
    }

    #[test]
    fn test_shifted_moves_both_timestamps() {
        let shifted = raw().shifted(Duration::hours(2));
        assert_eq!(shifted.start_at, Some(start() + Duration::hours(2)));
        assert_eq!(
            shifted.update_at,
            Some(start() + Duration::hours(2) + Duration::seconds(8))
        );
        assert_eq!(shifted.magnitude, Some(5.0));
    }

    #[test]
    fn test_build_without_reference_is_degraded() {
        let snap = TrackingSnapshot::build(&raw(), None, &AlertLimit::default(), start()).unwrap();
        assert_eq!(snap.distance_km, None);
        assert_eq!(snap.countdown_seconds, None);
        assert_eq!(snap.intensity, None);
        assert!(!snap.should_alert);
        assert_eq!(snap.stage, Stage::Notice);
        assert_eq!(snap.magnitude, 5.0);
    }

    #[test]
    fn test_build_with_reference_populates_all() {
        let reference = ReferencePosition {
            latitude: 30.0,
            longitude: 103.5,
        };
        let snap = TrackingSnapshot::build(
            &raw(),
            Some(&reference),
            &AlertLimit::default(),
            start() + Duration::seconds(2),
        )
        .unwrap();
        let distance = snap.distance_km.unwrap();
        assert!(distance > 40.0 && distance < 60.0);
        let expected = (10.0f64.hypot(distance)) / calculator::S_WAVE_SPEED_KM_S - 2.0;
        assert!((snap.countdown_seconds.unwrap() - expected).abs() < 1e-6);
        assert!(snap.intensity.is_some());
    }

    #[test]
    fn test_fifty_km_magnitude_five_alerts_on_permissive_limit() {
        let reference = ReferencePosition {
            latitude: 0.0,
            longitude: 0.0,
        };
        let mut r = raw();
        r.latitude = Some(50.0 / crate::utils::EARTH_RADIUS_KM.to_radians());
        r.longitude = Some(0.0);
        let permissive = AlertLimit {
            min_magnitude: 0.0,
            min_intensity: 0.0,
            max_distance_km: None,
        };

        let snap = TrackingSnapshot::build(&r, Some(&reference), &permissive, start()).unwrap();
        let distance = snap.distance_km.unwrap();
        assert!((distance - 50.0).abs() < 1e-6);
        let hypo = calculator::hypocentral_distance_km(10.0, distance).unwrap();
        assert!((hypo - 51.0).abs() < 0.05);
        let expected = hypo / calculator::S_WAVE_SPEED_KM_S;
        assert!((snap.countdown_seconds.unwrap() - expected).abs() < 1e-9);
        assert!(snap.intensity.unwrap() <= calculator::intensity(5.0, 0.0).unwrap());
        assert_eq!(snap.stage, policy::stage(&snap));
        assert!(snap.should_alert);
    }

    #[test]
    fn test_build_missing_field_is_invalid_event() {
        let mut broken = raw();
        broken.magnitude = None;
        let err = TrackingSnapshot::build(&broken, None, &AlertLimit::default(), start());
        assert!(matches!(err, Err(QuakeError::InvalidEvent(_))));

        let mut broken = raw();
        broken.depth = Some(-3.0);
        let err = TrackingSnapshot::build(&broken, None, &AlertLimit::default(), start());
        assert!(matches!(err, Err(QuakeError::InvalidEvent(_))));
    }

    #[test]
    fn test_update_time_defaults_to_start() {
        let mut r = raw();
        r.update_at = None;
        let snap = TrackingSnapshot::build(&r, None, &AlertLimit::default(), start()).unwrap();
        assert_eq!(snap.update_at, start());
    }
}
