//! Fare computation
//!
//! Per-tier rate card, half-up rounding to two decimals, 5% tax on the
//! surged subtotal. Estimates at ride creation use base + distance only;
//! the time component is settled from actuals at trip end.

use crate::models::VehicleClass;
use crate::trips::model::FareBreakdown;

/// GST applied on top of the surged subtotal
const TAX_RATE: f64 = 0.05;

/// Driver's share of the total fare
pub const DRIVER_SHARE: f64 = 0.8;

/// Rate card for one tier
#[derive(Debug, Clone, Copy)]
pub struct TierRates {
    pub base: f64,
    pub per_km: f64,
    pub per_min: f64,
}

/// Rates per vehicle tier, in INR
pub fn rates_for(tier: VehicleClass) -> TierRates {
    match tier {
        VehicleClass::Economy => TierRates {
            base: 50.0,
            per_km: 12.0,
            per_min: 1.5,
        },
        VehicleClass::Premium => TierRates {
            base: 100.0,
            per_km: 18.0,
            per_min: 2.5,
        },
        VehicleClass::Xl => TierRates {
            base: 150.0,
            per_km: 22.0,
            per_min: 3.0,
        },
    }
}

/// Round to two decimal places
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Final fare from actual distance and duration
pub fn compute_fare(
    tier: VehicleClass,
    distance_km: f64,
    duration_mins: f64,
    surge_multiplier: f64,
) -> FareBreakdown {
    let rates = rates_for(tier);

    let distance_fare = round2(distance_km * rates.per_km);
    let time_fare = round2(duration_mins * rates.per_min);
    let subtotal = rates.base + distance_fare + time_fare;

    let surge_fare = if surge_multiplier > 1.0 {
        round2(subtotal * (surge_multiplier - 1.0))
    } else {
        0.0
    };

    let taxes = round2((subtotal + surge_fare) * TAX_RATE);
    let total = round2(subtotal + surge_fare + taxes);

    FareBreakdown {
        base: rates.base,
        distance: distance_fare,
        time: time_fare,
        surge: surge_fare,
        taxes,
        total,
        currency: "INR".to_string(),
    }
}

/// Up-front estimate shown at ride creation: base plus the distance
/// component. Time and taxes are settled from actuals.
pub fn estimate_fare(tier: VehicleClass, distance_km: f64) -> f64 {
    let rates = rates_for(tier);
    round2(rates.base + round2(distance_km * rates.per_km))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.005), 1.01);
        assert_eq!(round2(58.8), 58.8);
        assert_eq!(round2(146.999), 147.0);
    }

    #[test]
    fn test_economy_reference_fare() {
        // 5 km, 20 min, no surge: (50 + 60 + 30) * 1.05 = 147.00
        let fare = compute_fare(VehicleClass::Economy, 5.0, 20.0, 1.0);
        assert_eq!(fare.base, 50.0);
        assert_eq!(fare.distance, 60.0);
        assert_eq!(fare.time, 30.0);
        assert_eq!(fare.surge, 0.0);
        assert_eq!(fare.taxes, 7.0);
        assert_eq!(fare.total, 147.0);
    }

    #[test]
    fn test_fare_closure() {
        for (tier, dist, mins, surge) in [
            (VehicleClass::Economy, 4.9, 17.0, 1.0),
            (VehicleClass::Premium, 12.3, 41.0, 1.0),
            (VehicleClass::Xl, 0.0, 1.0, 1.5),
            (VehicleClass::Economy, 33.33, 77.0, 2.0),
        ] {
            let f = compute_fare(tier, dist, mins, surge);
            let sum = f.base + f.distance + f.time + f.surge + f.taxes;
            assert!(
                (f.total - round2(sum)).abs() <= 0.01,
                "closure failed for {tier:?}: total={} sum={}",
                f.total,
                sum
            );
        }
    }

    #[test]
    fn test_surge_term() {
        let flat = compute_fare(VehicleClass::Economy, 5.0, 20.0, 1.0);
        let surged = compute_fare(VehicleClass::Economy, 5.0, 20.0, 1.5);
        assert_eq!(surged.surge, round2((flat.base + flat.distance + flat.time) * 0.5));
        assert!(surged.total > flat.total);
    }

    #[test]
    fn test_estimate_matches_reference() {
        // 4.9 km economy: 50 + round(4.9 * 12) = 108.8
        let est = estimate_fare(VehicleClass::Economy, 4.9);
        assert!((est - 108.8).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_zero_distance() {
        let fare = compute_fare(VehicleClass::Premium, 0.0, 0.0, 1.0);
        assert_eq!(fare.distance, 0.0);
        assert_eq!(fare.time, 0.0);
        assert_eq!(fare.total, round2(100.0 * 1.05));
    }
}
