//! Great-circle math on a spherical earth (R = 6371 km)
//!
//! Straight-line distance is authoritative for estimates and fares; no road
//! graph is consulted.

/// Mean earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points, in kilometers
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Initial great-circle bearing from point 1 to point 2, in degrees [0, 360)
pub fn initial_bearing_deg(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Destination point given a start, an initial bearing (degrees) and a
/// distance (kilometers). Returns (lat, lng).
pub fn destination_point(lat: f64, lng: f64, bearing_deg: f64, distance_km: f64) -> (f64, f64) {
    let delta = distance_km / EARTH_RADIUS_KM;
    let theta = bearing_deg.to_radians();
    let phi1 = lat.to_radians();
    let lambda1 = lng.to_radians();

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    (phi2.to_degrees(), lambda2.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    #[test]
    fn test_haversine_zero_for_same_point() {
        assert!(haversine_km(12.9716, 77.5946, 12.9716, 77.5946).abs() < EPS);
    }

    #[test]
    fn test_haversine_symmetry() {
        let d1 = haversine_km(12.9716, 77.5946, 12.9352, 77.6245);
        let d2 = haversine_km(12.9352, 77.6245, 12.9716, 77.5946);
        assert!((d1 - d2).abs() < EPS);
    }

    #[test]
    fn test_haversine_bengaluru_sample() {
        // MG Road to Koramangala is roughly 5 km as the crow flies.
        let d = haversine_km(12.9716, 77.5946, 12.9352, 77.6245);
        assert!(d > 4.0 && d < 6.0, "got {d}");
    }

    #[test]
    fn test_destination_point_round_trip() {
        let (lat, lng) = (12.9716, 77.5946);
        let bearing = initial_bearing_deg(lat, lng, 12.9352, 77.6245);
        let step = 0.5;
        let (lat2, lng2) = destination_point(lat, lng, bearing, step);
        let travelled = haversine_km(lat, lng, lat2, lng2);
        assert!((travelled - step).abs() < 1e-3, "got {travelled}");
    }

    #[test]
    fn test_bearing_range() {
        let b = initial_bearing_deg(0.0, 0.0, 10.0, 10.0);
        assert!((0.0..360.0).contains(&b));
    }
}
