/// Geodesic helpers and lenient JSON field extraction for feed payloads
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Mean Earth radius used by the spherical approximation
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Epoch values above this are read as milliseconds rather than seconds
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Great-circle distance in kilometers between two WGS-84 points given in degrees.
///
/// Uses the haversine formula in its `atan2` form so coincident points return
/// exactly zero and antipodal points stay finite. Non-finite inputs produce NaN;
/// the result is not clamped.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let rlat1 = lat1.to_radians();
    let rlat2 = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + rlat1.cos() * rlat2.cos() * (dlon / 2.0).sin().powi(2);
    // rounding can push `a` marginally past 1.0 near the antipode
    let a = a.min(1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Extract number from JSON value
pub fn num(v: &Value) -> Option<f64> {
    if let Some(x) = v.as_f64() {
        return Some(x);
    }
    if let Some(s) = v.as_str() {
        return s.trim().parse::<f64>().ok();
    }
    None
}

/// Pick numeric value from JSON by trying multiple keys
pub fn n_pick(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| v.get(*k).and_then(num))
}

/// Pick string value from JSON by trying multiple keys
pub fn s_pick(v: &Value, keys: &[&str]) -> Option<String> {
    for k in keys {
        if let Some(x) = v.get(*k) {
            if let Some(s) = x.as_str() {
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            } else if x.is_number() {
                return Some(x.to_string());
            }
        }
    }
    None
}

/// Pick timestamp value from JSON by trying multiple keys
///
/// Accepts RFC 3339 strings, `YYYY-MM-DD HH:MM:SS` (read as UTC), and epoch
/// seconds or milliseconds.
pub fn t_pick(v: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    for k in keys {
        if let Some(x) = v.get(*k) {
            if let Some(s) = x.as_str() {
                if let Ok(dt) = s.parse::<DateTime<Utc>>() {
                    return Some(dt);
                }
                if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                    return Some(Utc.from_utc_datetime(&ndt));
                }
                if let Ok(n) = s.parse::<i64>() {
                    return from_epoch(n);
                }
            } else if let Some(n) = x.as_i64() {
                return from_epoch(n);
            }
        }
    }
    None
}

fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    if n.abs() >= EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}
