//! Dispatch scoring and geo math properties

#[cfg(test)]
mod tests {
    use ridelink_backend::dispatch::candidate_score;
    use ridelink_backend::geo::{destination_point, haversine_km};

    #[test]
    fn test_scoring_weights_sum_to_one() {
        // Perfect components land exactly on 1.0, so the 0.4/0.3/0.3
        // weights are intact.
        assert!((candidate_score(0.0, 5.0, 100.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        for _ in 0..10 {
            assert_eq!(
                candidate_score(2.5, 4.2, 87.0).to_bits(),
                candidate_score(2.5, 4.2, 87.0).to_bits()
            );
        }
    }

    #[test]
    fn test_ordering_for_reference_candidates() {
        // Close high-rated driver beats distant low-rated one.
        let near = candidate_score(0.06, 4.8, 95.0);
        let far = candidate_score(4.8, 4.1, 60.0);
        assert!(near > far);

        // Between two equally-near drivers, reliability decides.
        let reliable = candidate_score(1.0, 5.0, 100.0);
        let flaky = candidate_score(1.0, 3.0, 40.0);
        assert!(reliable > flaky);
    }

    #[test]
    fn test_haversine_symmetry_property() {
        let points = [
            (12.9716, 77.5946),
            (12.9352, 77.6245),
            (28.6139, 77.2090),
            (-33.8688, 151.2093),
            (0.0, 0.0),
        ];
        for &(lat1, lng1) in &points {
            for &(lat2, lng2) in &points {
                let ab = haversine_km(lat1, lng1, lat2, lng2);
                let ba = haversine_km(lat2, lng2, lat1, lng1);
                assert!((ab - ba).abs() < 1e-6, "asymmetric: {ab} vs {ba}");
                assert!(ab >= 0.0);
            }
            assert!(haversine_km(lat1, lng1, lat1, lng1).abs() < 1e-6);
        }
    }

    #[test]
    fn test_simulated_step_sizes() {
        // A 30 km/h driver covers ~16.7 m per 2 s tick; the spherical step
        // function should reproduce that to within a millimetre.
        let step_km = 30.0 * 2.0 / 3600.0;
        let (lat, lng) = destination_point(12.9716, 77.5946, 135.0, step_km);
        let moved = haversine_km(12.9716, 77.5946, lat, lng);
        assert!((moved - step_km).abs() < 1e-6, "moved {moved}");
    }

    #[test]
    fn test_fifty_meter_arrival_threshold_reachable() {
        // From 100 m out, two ticks at 30 km/h must close inside the 50 m
        // arrival threshold.
        let start = (12.9716, 77.5946);
        let step_km = 30.0 * 2.0 / 3600.0;
        let (target_lat, target_lng) = destination_point(start.0, start.1, 90.0, 0.1);

        let mut pos = start;
        for _ in 0..2 {
            let bearing = ridelink_backend::geo::initial_bearing_deg(
                pos.0, pos.1, target_lat, target_lng,
            );
            let remaining = haversine_km(pos.0, pos.1, target_lat, target_lng);
            if remaining <= step_km {
                pos = (target_lat, target_lng);
            } else {
                pos = destination_point(pos.0, pos.1, bearing, step_km);
            }
        }

        let remaining = haversine_km(pos.0, pos.1, target_lat, target_lng);
        assert!(remaining <= 0.05, "still {remaining} km away");
    }
}
