//! Offer models and candidate scoring

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Offer status. At most one offer per ride ever reaches `accepted`.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "offer_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Cancelled,
}

/// Ride offer: a time-boxed invitation to a candidate driver
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct RideOffer {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub status: OfferStatus,
    pub offered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,
}

/// A scored matching candidate
#[derive(Debug, Serialize, Clone)]
pub struct MatchCandidate {
    pub driver_id: Uuid,
    pub distance_km: f64,
    pub rating: f64,
    pub acceptance_rate: f64,
    pub score: f64,
}

/// Result of a matching round
#[derive(Debug, Serialize)]
pub struct MatchOutcome {
    pub ride_id: Uuid,
    pub drivers: Vec<MatchCandidate>,
    pub offers_created: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Composite candidate score: proximity dominates, then reliability.
///
/// `0.4 · 1/(1+d) + 0.3 · rating/5 + 0.3 · acceptance/100`
pub fn candidate_score(distance_km: f64, rating: f64, acceptance_rate: f64) -> f64 {
    let distance_score = 1.0 / (1.0 + distance_km);
    let rating_score = rating / 5.0;
    let acceptance_score = acceptance_rate / 100.0;
    0.4 * distance_score + 0.3 * rating_score + 0.3 * acceptance_score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_driver_at_zero_distance() {
        let s = candidate_score(0.0, 5.0, 100.0);
        assert!((s - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_distance_dominates_nearby() {
        // A close mediocre driver should outrank a distant perfect one when
        // the gap is large enough.
        let close = candidate_score(0.2, 4.0, 80.0);
        let far = candidate_score(9.0, 5.0, 100.0);
        assert!(close > far);
    }

    #[test]
    fn test_score_monotonic_in_each_term() {
        assert!(candidate_score(1.0, 5.0, 90.0) > candidate_score(2.0, 5.0, 90.0));
        assert!(candidate_score(1.0, 5.0, 90.0) > candidate_score(1.0, 4.0, 90.0));
        assert!(candidate_score(1.0, 5.0, 90.0) > candidate_score(1.0, 5.0, 80.0));
    }
}
