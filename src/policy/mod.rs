/// Stage classification and alert gating
use crate::domain::{AlertLimit, Stage, TrackingSnapshot};

/// Intensity at or above which an event is an emergency
pub const EMERGENCY_INTENSITY: f64 = 6.0;
/// Intensity at or above which an event is a warning
pub const WARNING_INTENSITY: f64 = 4.0;
/// Lower intensity that still warns while the wave is close and inbound
pub const INBOUND_WARNING_INTENSITY: f64 = 3.0;
/// Countdown window for the inbound warning
pub const INBOUND_WINDOW_SECS: f64 = 30.0;

/// Configured minimums are never taken below these
pub const MAGNITUDE_FLOOR: f64 = 2.0;
pub const INTENSITY_FLOOR: f64 = 1.0;

/// Classify a snapshot. Snapshots without a computed intensity are `Notice`.
pub fn stage(snapshot: &TrackingSnapshot) -> Stage {
    let Some(intensity) = snapshot.intensity else {
        return Stage::Notice;
    };
    let inbound = snapshot
        .countdown_seconds
        .map(|c| c > 0.0 && c <= INBOUND_WINDOW_SECS)
        .unwrap_or(false);

    if intensity >= EMERGENCY_INTENSITY {
        Stage::Emergency
    } else if intensity >= WARNING_INTENSITY
        || (intensity >= INBOUND_WARNING_INTENSITY && inbound)
    {
        Stage::Warning
    } else {
        Stage::Notice
    }
}

/// Whether the snapshot clears every threshold in `limit`.
///
/// Boundaries are inclusive: a magnitude equal to the minimum passes and a
/// distance equal to the maximum passes. Degraded snapshots never alert.
pub fn should_alert(snapshot: &TrackingSnapshot, limit: &AlertLimit) -> bool {
    let (Some(intensity), Some(distance)) = (snapshot.intensity, snapshot.distance_km) else {
        return false;
    };

    let min_magnitude = effective_minimum(limit.min_magnitude, MAGNITUDE_FLOOR);
    let min_intensity = effective_minimum(limit.min_intensity, INTENSITY_FLOOR);
    let within_range = match limit.max_distance_km {
        Some(max) if max.is_finite() && max > 0.0 => distance <= max,
        _ => true,
    };

    snapshot.magnitude >= min_magnitude && intensity >= min_intensity && within_range
}

fn effective_minimum(configured: f64, floor: f64) -> f64 {
    if configured.is_finite() {
        configured.max(floor)
    } else {
        floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snapshot(magnitude: f64, distance: f64, intensity: f64, countdown: f64) -> TrackingSnapshot {
        let at = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        TrackingSnapshot {
            event_id: "e1".to_string(),
            epicenter: None,
            start_at: at,
            update_at: at,
            depth: 10.0,
            latitude: 0.0,
            longitude: 0.0,
            magnitude,
            stations: None,
            updates: None,
            region_intensities: vec![],
            distance_km: Some(distance),
            countdown_seconds: Some(countdown),
            intensity: Some(intensity),
            stage: Stage::Notice,
            should_alert: false,
        }
    }

    #[test]
    fn test_stage_thresholds() {
        assert_eq!(stage(&snapshot(7.0, 10.0, 8.2, 2.0)), Stage::Emergency);
        assert_eq!(stage(&snapshot(5.5, 40.0, 4.5, -3.0)), Stage::Warning);
        assert_eq!(stage(&snapshot(5.0, 90.0, 3.2, 20.0)), Stage::Warning);
        assert_eq!(stage(&snapshot(5.0, 90.0, 3.2, 45.0)), Stage::Notice);
        assert_eq!(stage(&snapshot(3.0, 300.0, 0.0, -60.0)), Stage::Notice);
    }

    #[test]
    fn test_stage_is_monotone_in_intensity() {
        let mut prev = Stage::Notice;
        for i in 0..=24 {
            let s = stage(&snapshot(5.0, 50.0, i as f64 * 0.5, 10.0));
            assert!(s >= prev);
            prev = s;
        }
    }

    #[test]
    fn test_stage_degraded_snapshot() {
        let mut snap = snapshot(6.0, 0.0, 0.0, 0.0);
        snap.intensity = None;
        snap.distance_km = None;
        snap.countdown_seconds = None;
        assert_eq!(stage(&snap), Stage::Notice);
        assert!(!should_alert(&snap, &AlertLimit::default()));
    }

    #[test]
    fn test_should_alert_far_below_and_far_above() {
        let limit = AlertLimit {
            min_magnitude: 4.0,
            min_intensity: 3.0,
            max_distance_km: Some(300.0),
        };
        assert!(!should_alert(&snapshot(2.1, 900.0, 0.0, -100.0), &limit));
        assert!(should_alert(&snapshot(7.5, 20.0, 9.0, 3.0), &limit));
    }

    #[test]
    fn test_should_alert_boundaries_inclusive() {
        let limit = AlertLimit {
            min_magnitude: 4.0,
            min_intensity: 3.0,
            max_distance_km: Some(100.0),
        };
        assert!(should_alert(&snapshot(4.0, 100.0, 3.0, 0.0), &limit));
        assert!(!should_alert(&snapshot(3.99, 100.0, 3.0, 0.0), &limit));
        assert!(!should_alert(&snapshot(4.0, 100.01, 3.0, 0.0), &limit));
    }

    #[test]
    fn test_zeroed_limit_uses_floors() {
        let limit = AlertLimit {
            min_magnitude: 0.0,
            min_intensity: 0.0,
            max_distance_km: None,
        };
        assert!(!should_alert(&snapshot(1.2, 5.0, 0.4, 1.0), &limit));
        assert!(should_alert(&snapshot(5.0, 50.0, 2.8, 5.0), &limit));
    }
}
