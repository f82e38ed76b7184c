//! Ride lifecycle tests: transition-table properties plus database-backed
//! scenarios

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use ridelink_backend::rides::{CreateRideRequest, RideStatus};
    use ridelink_backend::trips::fare;
    use validator::Validate;

    fn bengaluru_request() -> CreateRideRequest {
        CreateRideRequest {
            tenant_id: Uuid::new_v4(),
            rider_id: Uuid::new_v4(),
            pickup_lat: 12.9716,
            pickup_lng: 77.5946,
            pickup_address: Some("MG Road".to_string()),
            dropoff_lat: 12.9352,
            dropoff_lng: 77.6245,
            dropoff_address: Some("Koramangala".to_string()),
            tier: None,
            payment_method: None,
        }
    }

    #[test]
    fn test_create_ride_validation() {
        let request = bengaluru_request();
        assert!(request.validate().is_ok());

        let mut bad = bengaluru_request();
        bad.pickup_lat = 91.0;
        assert!(bad.validate().is_err());

        let mut bad = bengaluru_request();
        bad.dropoff_lng = -181.0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_degenerate_ride_allowed() {
        // pickup == dropoff is not rejected by validation
        let mut request = bengaluru_request();
        request.dropoff_lat = request.pickup_lat;
        request.dropoff_lng = request.pickup_lng;
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_no_in_progress_without_arrival() {
        // Every path into IN_PROGRESS goes through DRIVER_ARRIVED.
        for from in [
            RideStatus::Requested,
            RideStatus::Matching,
            RideStatus::DriverAssigned,
            RideStatus::DriverEnRoute,
            RideStatus::Completed,
            RideStatus::Cancelled,
        ] {
            assert!(
                !from.can_transition_to(RideStatus::InProgress),
                "{from:?} must not reach IN_PROGRESS directly"
            );
        }
        assert!(RideStatus::DriverArrived.can_transition_to(RideStatus::InProgress));
    }

    #[test]
    fn test_happy_path_walk() {
        let path = [
            RideStatus::Requested,
            RideStatus::Matching,
            RideStatus::DriverAssigned,
            RideStatus::DriverEnRoute,
            RideStatus::DriverArrived,
            RideStatus::InProgress,
            RideStatus::Completed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{:?} -> {:?} must be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_happy_path_estimate_reference() {
        // MG Road to Koramangala, economy, roughly 4.9 km.
        let dist = ridelink_backend::geo::haversine_km(12.9716, 77.5946, 12.9352, 77.6245);
        assert!((4.4..5.4).contains(&dist), "distance {dist} out of range");

        let estimate = fare::estimate_fare(ridelink_backend::models::VehicleClass::Economy, dist);
        // 50 + dist * 12, expected around 109 (+/- 1 for rounding policy)
        assert!(
            (108.0..=110.0).contains(&estimate),
            "estimate {estimate} out of range"
        );
    }

    #[test]
    fn test_final_fare_reference() {
        // 5.0 km, 20 min, economy, no surge: 147.00 total, driver credited
        // 117.60.
        let fare = fare::compute_fare(
            ridelink_backend::models::VehicleClass::Economy,
            5.0,
            20.0,
            1.0,
        );
        assert_eq!(fare.total, 147.0);
        assert_eq!(fare::round2(fare.total * fare::DRIVER_SHARE), 117.6);
    }

    mod database {
        //! Scenarios needing live Postgres/Redis/Kafka. Run with
        //! `cargo test -- --ignored` against a provisioned environment.

        use std::sync::Arc;

        use sqlx::PgPool;
        use uuid::Uuid;

        use ridelink_backend::bus::EventBus;
        use ridelink_backend::cache::Cache;
        use ridelink_backend::geo::GeoIndex;
        use ridelink_backend::rides::{CreateRideRequest, RideService, RideStatus};
        use ridelink_backend::simulator::SimulatorRegistry;

        async fn setup_pool() -> PgPool {
            let database_url = std::env::var("TEST_DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/ridelink_test".to_string());

            sqlx::postgres::PgPoolOptions::new()
                .max_connections(4)
                .connect(&database_url)
                .await
                .expect("Failed to connect to test database")
        }

        async fn setup_rides(pool: PgPool) -> Arc<RideService> {
            let redis_url = std::env::var("TEST_REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
            let brokers =
                std::env::var("TEST_KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());

            let cache = Cache::connect(&redis_url).await.expect("redis");
            let geo = GeoIndex::connect(&redis_url).await.expect("redis geo");
            let bus = EventBus::connect(&brokers).expect("kafka");
            let sims = SimulatorRegistry::new(pool.clone(), geo.clone(), bus.clone(), 2, 30.0);

            Arc::new(RideService::new(pool, cache, bus, geo, sims))
        }

        async fn seed_tenant_and_rider(pool: &PgPool) -> (Uuid, Uuid) {
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

            (tenant_id, rider_id)
        }

        fn request(tenant_id: Uuid, rider_id: Uuid) -> CreateRideRequest {
            CreateRideRequest {
                tenant_id,
                rider_id,
                pickup_lat: 12.9716,
                pickup_lng: 77.5946,
                pickup_address: None,
                dropoff_lat: 12.9352,
                dropoff_lng: 77.6245,
                dropoff_address: None,
                tier: None,
                payment_method: None,
            }
        }

        #[tokio::test]
        #[ignore] // Requires database setup
        async fn test_create_then_cancel() {
            let pool = setup_pool().await;
            let rides = setup_rides(pool.clone()).await;
            let (tenant_id, rider_id) = seed_tenant_and_rider(&pool).await;

            let ride = rides
                .create(request(tenant_id, rider_id), None)
                .await
                .expect("create");
            assert_eq!(ride.status, RideStatus::Requested);
            assert_eq!(ride.version, 1);
            assert!(ride.estimated_fare > 0.0);

            let cancelled = rides
                .cancel(ride.id, Some("changed my mind".to_string()))
                .await
                .expect("cancel");
            assert_eq!(cancelled.status, RideStatus::Cancelled);
            assert_eq!(cancelled.version, 2);
            assert!(cancelled.cancelled_at.is_some());
        }

        #[tokio::test]
        #[ignore] // Requires database setup
        async fn test_version_monotonicity() {
            let pool = setup_pool().await;
            let rides = setup_rides(pool.clone()).await;
            let (tenant_id, rider_id) = seed_tenant_and_rider(&pool).await;

            let ride = rides
                .create(request(tenant_id, rider_id), None)
                .await
                .unwrap();

            let matching = rides.set_matching(ride.id, true).await.unwrap();
            assert_eq!(matching.version, ride.version + 1);

            let reverted = rides.set_matching(ride.id, false).await.unwrap();
            assert_eq!(reverted.version, matching.version + 1);
        }

        #[tokio::test]
        #[ignore] // Requires database setup
        async fn test_stale_version_rejected() {
            let pool = setup_pool().await;
            let rides = setup_rides(pool.clone()).await;
            let (tenant_id, rider_id) = seed_tenant_and_rider(&pool).await;

            let ride = rides
                .create(request(tenant_id, rider_id), None)
                .await
                .unwrap();

            // Progress transitions require a driver; a stale expected
            // version must fail before the guard does.
            let result = rides
                .progress(ride.id, RideStatus::DriverEnRoute, Some(ride.version + 10))
                .await;
            assert!(result.is_err());
        }

        #[tokio::test]
        #[ignore] // Requires database and Redis setup
        async fn test_ride_creation_idempotency() {
            let pool = setup_pool().await;
            let rides = setup_rides(pool.clone()).await;
            let (tenant_id, rider_id) = seed_tenant_and_rider(&pool).await;

            let key = format!("ride-key-{}", Uuid::new_v4());
            let first = rides
                .create(request(tenant_id, rider_id), Some(key.clone()))
                .await
                .unwrap();
            let second = rides
                .create(request(tenant_id, rider_id), Some(key))
                .await
                .unwrap();

            assert_eq!(first.id, second.id);
        }
    }
}
