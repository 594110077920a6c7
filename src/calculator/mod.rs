/// Exposure estimates layered on the geodesic distance
use crate::errors::{QuakeError, QuakeResult};
use crate::utils::haversine_km;

/// Assumed propagation speed of the damaging S-wave, km/s
pub const S_WAVE_SPEED_KM_S: f64 = 4.0;

/// Near-field saturation term added to the distance before attenuation
const NEAR_FIELD_KM: f64 = 10.0;

/// Upper bound of the intensity scale
pub const MAX_INTENSITY: f64 = 12.0;

fn check_non_negative(name: &str, value: f64) -> QuakeResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(QuakeError::InvalidArgument(format!(
            "{} must be a finite non-negative number, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Surface distance from the observer to the epicenter in kilometers
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine_km(lat1, lon1, lat2, lon2)
}

/// Straight-line distance to the hypocenter
pub fn hypocentral_distance_km(depth_km: f64, surface_km: f64) -> QuakeResult<f64> {
    check_non_negative("depth", depth_km)?;
    check_non_negative("distance", surface_km)?;
    Ok(depth_km.hypot(surface_km))
}

/// Seconds until the S-wave reaches the observer.
///
/// `elapsed_secs` is the time already spent since the event started. The
/// result is negative once the wave has passed.
pub fn countdown_seconds(depth_km: f64, distance_km: f64, elapsed_secs: f64) -> QuakeResult<f64> {
    let travel = hypocentral_distance_km(depth_km, distance_km)? / S_WAVE_SPEED_KM_S;
    Ok(travel - elapsed_secs)
}

/// Estimated local intensity for an event of `magnitude` at `distance_km`.
///
/// Attenuation follows `0.924 + 1.63 M - 3.49 log10(d + 10)` clamped to
/// `[0, MAX_INTENSITY]`, so it peaks at the epicenter and never rises with
/// distance.
pub fn intensity(magnitude: f64, distance_km: f64) -> QuakeResult<f64> {
    check_non_negative("distance", distance_km)?;
    if !magnitude.is_finite() {
        return Err(QuakeError::InvalidArgument(format!(
            "magnitude must be finite, got {}",
            magnitude
        )));
    }
    let raw = 0.924 + 1.63 * magnitude - 3.49 * (distance_km + NEAR_FIELD_KM).log10();
    Ok(raw.clamp(0.0, MAX_INTENSITY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hypocentral_distance() {
        let d = hypocentral_distance_km(10.0, 50.0).unwrap();
        assert!((d - 50.990195).abs() < 1e-4);
    }

    #[test]
    fn test_negative_inputs_rejected() {
        assert!(matches!(
            hypocentral_distance_km(-1.0, 10.0),
            Err(QuakeError::InvalidArgument(_))
        ));
        assert!(matches!(
            countdown_seconds(10.0, -5.0, 0.0),
            Err(QuakeError::InvalidArgument(_))
        ));
        assert!(matches!(
            intensity(5.0, -0.1),
            Err(QuakeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_countdown_decreases_with_elapsed() {
        let early = countdown_seconds(10.0, 100.0, 0.0).unwrap();
        let later = countdown_seconds(10.0, 100.0, 5.0).unwrap();
        let gone = countdown_seconds(10.0, 100.0, 120.0).unwrap();
        assert!(early > later);
        assert!((early - later - 5.0).abs() < 1e-9);
        assert!(gone < 0.0);
    }

    #[test]
    fn test_countdown_at_epicenter() {
        let c = countdown_seconds(0.0, 0.0, 0.0).unwrap();
        assert_eq!(c, 0.0);
    }

    #[test]
    fn test_intensity_non_increasing_with_distance() {
        let mut prev = intensity(6.0, 0.0).unwrap();
        for d in [1.0, 5.0, 20.0, 50.0, 150.0, 500.0, 2000.0, 20000.0] {
            let next = intensity(6.0, d).unwrap();
            assert!(next <= prev, "intensity rose from {} to {} at {} km", prev, next, d);
            prev = next;
        }
    }

    #[test]
    fn test_intensity_non_decreasing_with_magnitude() {
        let mut prev = intensity(0.0, 80.0).unwrap();
        for m in [1.0, 2.5, 4.0, 5.5, 7.0, 8.5, 9.5] {
            let next = intensity(m, 80.0).unwrap();
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn test_intensity_maximum_at_epicenter() {
        let at_zero = intensity(5.0, 0.0).unwrap();
        assert!(at_zero >= intensity(5.0, 0.5).unwrap());
        assert!(at_zero <= MAX_INTENSITY);
    }

    #[test]
    fn test_scenario_ten_km_depth_fifty_km_away() {
        let hypo = hypocentral_distance_km(10.0, 50.0).unwrap();
        assert!((hypo - 51.0).abs() < 0.05);
        let i = intensity(5.0, 50.0).unwrap();
        assert!(i > 0.0 && i < intensity(5.0, 0.0).unwrap());
    }
}
