//! Dispatch engine: candidate search, scoring, offer fan-out, and race-free
//! acceptance
//!
//! The row lock (FOR UPDATE NOWAIT) is the authoritative mutual exclusion
//! for acceptance; the distributed lock sheds concurrent attempts before
//! they queue on the database.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::bus::{EventBus, NotificationEvent, NotificationRecord, RideEventType, TOPIC_NOTIFICATIONS};
use crate::cache::{self, Cache};
use crate::dispatch::model::{candidate_score, MatchCandidate, MatchOutcome, RideOffer};
use crate::drivers::Driver;
use crate::error::{ApiError, ApiResult};
use crate::geo::GeoIndex;
use crate::lock::LockManager;
use crate::rides::{Ride, RideService, RideStatus};
use crate::simulator::{SimPhase, SimulatorRegistry};

/// Tunables for the matching engine
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub radius_km: f64,
    pub max_candidates: usize,
    pub offer_ttl_seconds: i64,
    pub lock_lease: Duration,
}

/// Dispatch service
pub struct DispatchService {
    pool: PgPool,
    cache: Cache,
    bus: EventBus,
    geo: GeoIndex,
    locks: LockManager,
    sims: Arc<SimulatorRegistry>,
    rides: Arc<RideService>,
    config: DispatchConfig,
}

impl DispatchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        cache: Cache,
        bus: EventBus,
        geo: GeoIndex,
        locks: LockManager,
        sims: Arc<SimulatorRegistry>,
        rides: Arc<RideService>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            pool,
            cache,
            bus,
            geo,
            locks,
            sims,
            rides,
            config,
        }
    }

    /// Run one matching round for a ride: geo query, scoring, offer
    /// fan-out. Returns as soon as the offers are written and the
    /// RIDE_OFFER notifications are enqueued; drivers respond
    /// asynchronously.
    pub async fn find_drivers(&self, ride_id: Uuid) -> ApiResult<MatchOutcome> {
        let ride = self.rides.get_uncached(ride_id).await?;

        if !matches!(ride.status, RideStatus::Requested | RideStatus::Matching) {
            return Err(ApiError::InvalidStateTransition(format!(
                "Matching is not allowed from {}",
                ride.status.as_str()
            )));
        }

        // Commit MATCHING before any offer exists so consumers never observe
        // offers for a ride the store still shows as REQUESTED.
        if ride.status == RideStatus::Requested {
            self.rides.set_matching(ride_id, true).await?;
        }

        let nearby = self
            .geo
            .nearby(
                ride.tier,
                ride.pickup_lng,
                ride.pickup_lat,
                self.config.radius_km,
                self.config.max_candidates,
            )
            .await
            .map_err(|e| ApiError::ServiceUnavailable(format!("Geo index: {}", e)))?;

        if nearby.is_empty() {
            return self.no_candidates(ride_id).await;
        }

        let ids: Vec<Uuid> = nearby.iter().map(|(id, _)| *id).collect();
        let drivers = sqlx::query_as::<_, Driver>(
            r#"
            SELECT * FROM drivers
            WHERE id = ANY($1) AND tenant_id = $2 AND status = 'online'
            "#,
        )
        .bind(&ids)
        .bind(ride.tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<MatchCandidate> = drivers
            .iter()
            .filter_map(|d| {
                let distance_km = nearby.iter().find(|(id, _)| *id == d.id)?.1;
                Some(MatchCandidate {
                    driver_id: d.id,
                    distance_km,
                    rating: d.rating,
                    acceptance_rate: d.acceptance_rate,
                    score: candidate_score(distance_km, d.rating, d.acceptance_rate),
                })
            })
            .collect();

        if candidates.is_empty() {
            return self.no_candidates(ride_id).await;
        }

        // Descending by score; driver id breaks ties so the order is
        // deterministic within a request.
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });
        candidates.truncate(self.config.max_candidates);

        let expires_at = Utc::now() + ChronoDuration::seconds(self.config.offer_ttl_seconds);
        let mut offers_created = 0;

        for candidate in &candidates {
            // Retried matching must not duplicate offers.
            let offer = sqlx::query_as::<_, RideOffer>(
                r#"
                INSERT INTO ride_offers (ride_id, driver_id, expires_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (ride_id, driver_id) DO NOTHING
                RETURNING *
                "#,
            )
            .bind(ride_id)
            .bind(candidate.driver_id)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await?;

            let Some(offer) = offer else { continue };
            offers_created += 1;

            let notification = NotificationRecord::new(
                candidate.driver_id,
                NotificationEvent::RideOffer {
                    offer_id: offer.id,
                    ride_id,
                    driver_id: candidate.driver_id,
                    expires_at: offer.expires_at,
                    pickup_lat: ride.pickup_lat,
                    pickup_lng: ride.pickup_lng,
                    estimated_fare: ride.estimated_fare,
                },
            );
            self.bus
                .publish_best_effort(
                    TOPIC_NOTIFICATIONS,
                    &candidate.driver_id.to_string(),
                    &notification,
                )
                .await;
        }

        tracing::info!(
            ride_id = %ride_id,
            candidates = candidates.len(),
            offers_created,
            "Matching round completed"
        );

        Ok(MatchOutcome {
            ride_id,
            drivers: candidates,
            offers_created,
            reason: None,
        })
    }

    async fn no_candidates(&self, ride_id: Uuid) -> ApiResult<MatchOutcome> {
        // Nobody nearby: hand the ride back to REQUESTED so the caller can
        // retry later.
        if let Err(e) = self.rides.set_matching(ride_id, false).await {
            tracing::warn!(ride_id = %ride_id, error = %e, "Failed to revert ride to requested");
        }
        tracing::info!(ride_id = %ride_id, "No drivers available for ride");
        Ok(MatchOutcome {
            ride_id,
            drivers: Vec::new(),
            offers_created: 0,
            reason: Some("no drivers available".to_string()),
        })
    }

    /// Race-free acceptance. Exactly one concurrent driver wins; every loser
    /// gets a 409. The distributed lock bounds concurrent attempts, the row
    /// lock decides the winner.
    pub async fn accept_offer(&self, ride_id: Uuid, driver_id: Uuid) -> ApiResult<Ride> {
        let lock_key = format!("ride:{}", ride_id);
        let lock = self
            .locks
            .acquire(
                &lock_key,
                self.config.lock_lease,
                3,
                Duration::from_millis(100),
            )
            .await
            .map_err(|e| ApiError::ServiceUnavailable(format!("Lock backend: {}", e)))?
            .ok_or_else(|| {
                ApiError::LockFailed("Ride is being assigned by another request".to_string())
            })?;

        let result = self.accept_locked(ride_id, driver_id).await;

        // Checked release on every exit path: only this acquisition's fence
        // token may delete the key.
        if let Err(e) = self.locks.release(&lock).await {
            tracing::warn!(ride_id = %ride_id, error = %e, "Failed to release ride lock");
        }

        result
    }

    async fn accept_locked(&self, ride_id: Uuid, driver_id: Uuid) -> ApiResult<Ride> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, Ride>(
            "SELECT * FROM rides WHERE id = $1 FOR UPDATE NOWAIT",
        )
        .bind(ride_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Ride {} not found", ride_id)))?;

        if current.status != RideStatus::Matching {
            return Err(if current.driver_id.is_some() {
                ApiError::Conflict("Ride is already assigned".to_string())
            } else {
                ApiError::InvalidStateTransition(format!(
                    "Ride is not matching (status {})",
                    current.status.as_str()
                ))
            });
        }

        let driver = sqlx::query_as::<_, Driver>(
            "SELECT * FROM drivers WHERE id = $1 AND status = 'online' FOR UPDATE SKIP LOCKED",
        )
        .bind(driver_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::Conflict("Driver is unavailable".to_string()))?;

        let offer = sqlx::query_as::<_, RideOffer>(
            r#"
            SELECT * FROM ride_offers
            WHERE ride_id = $1 AND driver_id = $2
              AND status = 'pending' AND expires_at > now()
            FOR UPDATE
            "#,
        )
        .bind(ride_id)
        .bind(driver_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::Conflict("No pending offer for this driver".to_string()))?;

        let ride = sqlx::query_as::<_, Ride>(
            r#"
            UPDATE rides
            SET status = 'driver_assigned',
                driver_id = $2,
                matched_at = now(),
                version = version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(ride_id)
        .bind(driver_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE drivers SET status = 'busy' WHERE id = $1")
            .bind(driver_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE ride_offers SET status = 'accepted', responded_at = now() WHERE id = $1",
        )
        .bind(offer.id)
        .execute(&mut *tx)
        .await?;

        // Losing offers are withdrawn in the same transaction.
        sqlx::query(
            r#"
            UPDATE ride_offers
            SET status = 'cancelled', responded_at = now()
            WHERE ride_id = $1 AND status = 'pending' AND id <> $2
            "#,
        )
        .bind(ride_id)
        .bind(offer.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        // An assigned driver is no longer discoverable.
        if let Err(e) = self.geo.remove_driver(driver.vehicle_class, driver_id).await {
            tracing::warn!(%driver_id, error = %e, "Failed to remove assigned driver from geo index");
        }

        let stale = vec![
            cache::ride_key(ride_id),
            cache::driver_key(driver_id),
            cache::driver_meta_key(driver_id),
            cache::rider_key(ride.rider_id),
        ];
        if let Err(e) = self.cache.del(&stale).await {
            tracing::warn!(ride_id = %ride_id, error = %e, "Failed to invalidate caches after assignment");
        }

        self.rides
            .publish_lifecycle(&ride, Some(RideStatus::Matching), RideEventType::DriverAssigned)
            .await;

        let notification = NotificationRecord::new(
            ride.rider_id,
            NotificationEvent::DriverAssigned {
                ride_id,
                rider_id: ride.rider_id,
                driver_id,
                driver_name: driver.name.clone(),
                vehicle_class: driver.vehicle_class,
            },
        );
        self.bus
            .publish_best_effort(TOPIC_NOTIFICATIONS, &ride.rider_id.to_string(), &notification)
            .await;

        self.sims
            .start(
                RideService::sim_ride(&ride, driver_id, driver.vehicle_class),
                SimPhase::ToPickup,
            )
            .await;

        tracing::info!(ride_id = %ride_id, driver_id = %driver_id, "Driver assigned");
        Ok(ride)
    }

    /// Decline an offer. The driver's acceptance rate is recomputed in the
    /// background, eventually consistent with their offer history.
    pub async fn decline_offer(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        reason: Option<String>,
    ) -> ApiResult<RideOffer> {
        let offer = sqlx::query_as::<_, RideOffer>(
            r#"
            UPDATE ride_offers
            SET status = 'declined', responded_at = now(), decline_reason = $3
            WHERE ride_id = $1 AND driver_id = $2 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(ride_id)
        .bind(driver_id)
        .bind(&reason)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::Conflict("No pending offer to decline".to_string()))?;

        self.spawn_acceptance_rate_recompute(driver_id);

        // When the last pending offer is gone the ride returns to REQUESTED;
        // re-matching is caller-driven.
        let pending: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ride_offers WHERE ride_id = $1 AND status = 'pending'",
        )
        .bind(ride_id)
        .fetch_one(&self.pool)
        .await?;

        if pending == 0 {
            match self.rides.set_matching(ride_id, false).await {
                Ok(_) => {
                    tracing::info!(ride_id = %ride_id, "All offers declined; ride back to requested")
                }
                Err(ApiError::InvalidStateTransition(_)) | Err(ApiError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(ride_id = %ride_id, error = %e, "Failed to revert declined ride")
                }
            }
        }

        tracing::info!(ride_id = %ride_id, driver_id = %driver_id, "Offer declined");
        Ok(offer)
    }

    fn spawn_acceptance_rate_recompute(&self, driver_id: Uuid) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                UPDATE drivers
                SET acceptance_rate = COALESCE((
                    SELECT 100.0 * COUNT(*) FILTER (WHERE status = 'accepted')
                           / NULLIF(COUNT(*), 0)
                    FROM ride_offers
                    WHERE driver_id = $1
                      AND status IN ('accepted', 'declined', 'expired')
                ), 100.0)
                WHERE id = $1
                "#,
            )
            .bind(driver_id)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                tracing::warn!(%driver_id, error = %e, "Acceptance rate recompute failed");
            }
        });
    }
}
