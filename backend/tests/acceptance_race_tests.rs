//! Dispatch acceptance scenarios: the concurrent-acceptance race, offer
//! expiry, and driver release on cancellation. All tests here need live
//! Postgres/Redis/Kafka; run with `cargo test -- --ignored` against a
//! provisioned environment.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use sqlx::PgPool;
    use uuid::Uuid;

    use ridelink_backend::bus::EventBus;
    use ridelink_backend::cache::Cache;
    use ridelink_backend::dispatch::{sweep_once, DispatchConfig, DispatchService};
    use ridelink_backend::drivers::DriverStatus;
    use ridelink_backend::geo::GeoIndex;
    use ridelink_backend::lock::LockManager;
    use ridelink_backend::rides::{RideService, RideStatus};
    use ridelink_backend::simulator::SimulatorRegistry;

    async fn setup_pool() -> PgPool {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/ridelink_test".to_string());

        sqlx::postgres::PgPoolOptions::new()
            .max_connections(8)
            .connect(&database_url)
            .await
            .expect("Failed to connect to test database")
    }

    async fn setup_dispatch(pool: PgPool) -> (Arc<DispatchService>, Arc<RideService>) {
        let redis_url = std::env::var("TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let brokers =
            std::env::var("TEST_KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());

        let cache = Cache::connect(&redis_url).await.expect("redis");
        let geo = GeoIndex::connect(&redis_url).await.expect("redis geo");
        let bus = EventBus::connect(&brokers).expect("kafka");
        let locks = LockManager::new(cache.clone());
        let sims = SimulatorRegistry::new(pool.clone(), geo.clone(), bus.clone(), 2, 30.0);
        let rides = Arc::new(RideService::new(
            pool.clone(),
            cache.clone(),
            bus.clone(),
            geo.clone(),
            sims.clone(),
        ));
        let dispatch = Arc::new(DispatchService::new(
            pool,
            cache,
            bus,
            geo,
            locks,
            sims,
            rides.clone(),
            DispatchConfig {
                radius_km: 100.0,
                max_candidates: 20,
                offer_ttl_seconds: 15,
                lock_lease: Duration::from_secs(5),
            },
        ));
        (dispatch, rides)
    }

    struct Fixture {
        ride_id: Uuid,
        driver_a: Uuid,
        driver_b: Uuid,
    }

    /// Seed a MATCHING ride with two online drivers holding pending offers
    async fn seed_matching_ride(pool: &PgPool) -> Fixture {
        let tenant_id: Uuid = sqlx::query_scalar(
            "INSERT INTO tenants (name, region) VALUES ('t', 'blr') RETURNING id",
        )
        .fetch_one(pool)
        .await
        .unwrap();

        let rider_id: Uuid = sqlx::query_scalar(
            "INSERT INTO riders (tenant_id, phone) VALUES ($1, $2) RETURNING id",
        )
        .bind(tenant_id)
        .bind(format!("+91{}", rand::random::<u32>()))
        .fetch_one(pool)
        .await
        .unwrap();

        let mut driver_ids = Vec::new();
        for _ in 0..2 {
            let driver_id: Uuid = sqlx::query_scalar(
                "INSERT INTO drivers (tenant_id, phone, status) VALUES ($1, $2, 'online') RETURNING id",
            )
            .bind(tenant_id)
            .bind(format!("+92{}", rand::random::<u64>()))
            .fetch_one(pool)
            .await
            .unwrap();
            driver_ids.push(driver_id);
        }

        let ride_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO rides (
                tenant_id, rider_id, status,
                pickup_lat, pickup_lng, dropoff_lat, dropoff_lng
            )
            VALUES ($1, $2, 'matching', 12.9716, 77.5946, 12.9352, 77.6245)
            RETURNING id
            "#,
        )
        .bind(tenant_id)
        .bind(rider_id)
        .fetch_one(pool)
        .await
        .unwrap();

        for driver_id in &driver_ids {
            sqlx::query(
                r#"
                INSERT INTO ride_offers (ride_id, driver_id, expires_at)
                VALUES ($1, $2, now() + interval '15 seconds')
                "#,
            )
            .bind(ride_id)
            .bind(driver_id)
            .execute(pool)
            .await
            .unwrap();
        }

        Fixture {
            ride_id,
            driver_a: driver_ids[0],
            driver_b: driver_ids[1],
        }
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_concurrent_acceptance_has_one_winner() {
        let pool = setup_pool().await;
        let (dispatch, _rides) = setup_dispatch(pool.clone()).await;
        let fixture = seed_matching_ride(&pool).await;

        let d1 = dispatch.clone();
        let d2 = dispatch.clone();
        let (ride_id, a, b) = (fixture.ride_id, fixture.driver_a, fixture.driver_b);

        let (r1, r2) = tokio::join!(d1.accept_offer(ride_id, a), d2.accept_offer(ride_id, b));

        // Exactly one 200; the loser gets a conflict-class error.
        assert_ne!(r1.is_ok(), r2.is_ok(), "exactly one acceptance must win");

        let (winner, loser) = if r1.is_ok() { (a, b) } else { (b, a) };

        let accepted: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ride_offers WHERE ride_id = $1 AND status = 'accepted'",
        )
        .bind(ride_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(accepted, 1);

        let loser_status: String = sqlx::query_scalar(
            "SELECT status::text FROM ride_offers WHERE ride_id = $1 AND driver_id = $2",
        )
        .bind(ride_id)
        .bind(loser)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(loser_status, "cancelled");

        let winner_status: DriverStatus =
            sqlx::query_scalar("SELECT status FROM drivers WHERE id = $1")
                .bind(winner)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(winner_status, DriverStatus::Busy);

        let assigned: Option<Uuid> =
            sqlx::query_scalar("SELECT driver_id FROM rides WHERE id = $1")
                .bind(ride_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(assigned, Some(winner));
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_offer_expiry_leaves_ride_matching() {
        let pool = setup_pool().await;
        let fixture = seed_matching_ride(&pool).await;

        // Force both offers past their deadline, then sweep.
        sqlx::query("UPDATE ride_offers SET expires_at = now() - interval '1 second' WHERE ride_id = $1")
            .bind(fixture.ride_id)
            .execute(&pool)
            .await
            .unwrap();

        let expired_rides = sweep_once(&pool).await.unwrap();
        assert!(expired_rides.contains(&fixture.ride_id));

        let pending: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ride_offers WHERE ride_id = $1 AND status = 'pending'",
        )
        .bind(fixture.ride_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(pending, 0);

        // Expiry never moves the ride; re-matching is caller-driven.
        let status: RideStatus = sqlx::query_scalar("SELECT status FROM rides WHERE id = $1")
            .bind(fixture.ride_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, RideStatus::Matching);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_cancel_before_arrival_releases_driver() {
        let pool = setup_pool().await;
        let (dispatch, rides) = setup_dispatch(pool.clone()).await;
        let fixture = seed_matching_ride(&pool).await;

        dispatch
            .accept_offer(fixture.ride_id, fixture.driver_a)
            .await
            .expect("acceptance");

        let ride = rides
            .progress(fixture.ride_id, RideStatus::DriverEnRoute, None)
            .await
            .expect("en route");
        assert_eq!(ride.status, RideStatus::DriverEnRoute);

        let cancelled = rides
            .cancel(fixture.ride_id, Some("rider cancelled".to_string()))
            .await
            .expect("cancel");
        assert_eq!(cancelled.status, RideStatus::Cancelled);

        let driver_status: DriverStatus =
            sqlx::query_scalar("SELECT status FROM drivers WHERE id = $1")
                .bind(fixture.driver_a)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(driver_status, DriverStatus::Online);
    }
}
