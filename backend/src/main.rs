//! RideLink Backend Server
//!
//! Bootstraps the dispatch platform: configuration, the Postgres pool and
//! migrations, the Redis-backed geo index / cache / locks, the event bus,
//! the domain services, the background tasks (offer sweeper, location
//! flusher, notifications consumer), and the HTTP/WebSocket surface.

use axum::http::{HeaderValue, Method};
use axum::{routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use ridelink_backend::bus::EventBus;
use ridelink_backend::cache::Cache;
use ridelink_backend::config::Config;
use ridelink_backend::db;
use ridelink_backend::dispatch::{run_offer_sweeper, DispatchConfig, DispatchService};
use ridelink_backend::drivers::DriverService;
use ridelink_backend::geo::GeoIndex;
use ridelink_backend::location::LocationService;
use ridelink_backend::lock::LockManager;
use ridelink_backend::middleware;
use ridelink_backend::payments::{MockPsp, PaymentService};
use ridelink_backend::realtime::{self, run_notifications_consumer, WsState};
use ridelink_backend::riders::RiderService;
use ridelink_backend::rides::RideService;
use ridelink_backend::routes;
use ridelink_backend::simulator::SimulatorRegistry;
use ridelink_backend::state::AppState;
use ridelink_backend::tenants::TenantService;
use ridelink_backend::trips::TripService;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        "Starting RideLink backend"
    );

    // Persistent store
    let db_pool = match db::create_pool(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Database connection failed");
            std::process::exit(1);
        }
    };
    if let Err(e) = db::run_migrations(&db_pool).await {
        tracing::error!(error = %e, "Migrations failed");
        std::process::exit(1);
    }

    // Redis-backed adapters
    let cache = match Cache::connect(&config.redis_url).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Redis connection failed");
            std::process::exit(1);
        }
    };
    let geo = match GeoIndex::connect(&config.redis_url).await {
        Ok(g) => g,
        Err(e) => {
            tracing::error!(error = %e, "Geo index connection failed");
            std::process::exit(1);
        }
    };
    let locks = LockManager::new(cache.clone());

    // Event bus
    let bus = match EventBus::connect(&config.kafka_brokers) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "Event bus connection failed");
            std::process::exit(1);
        }
    };

    // Simulator supervisor
    let sims = SimulatorRegistry::new(
        db_pool.clone(),
        geo.clone(),
        bus.clone(),
        config.sim_tick_seconds,
        config.sim_speed_kmh,
    );

    // Domain services
    let tenants = Arc::new(TenantService::new(db_pool.clone()));
    let riders = Arc::new(RiderService::new(db_pool.clone(), cache.clone()));
    let drivers = Arc::new(DriverService::new(
        db_pool.clone(),
        cache.clone(),
        geo.clone(),
    ));
    let rides = Arc::new(RideService::new(
        db_pool.clone(),
        cache.clone(),
        bus.clone(),
        geo.clone(),
        sims.clone(),
    ));
    let dispatch = Arc::new(DispatchService::new(
        db_pool.clone(),
        cache.clone(),
        bus.clone(),
        geo.clone(),
        locks.clone(),
        sims.clone(),
        rides.clone(),
        DispatchConfig {
            radius_km: config.match_radius_km,
            max_candidates: config.match_max_candidates,
            offer_ttl_seconds: config.offer_ttl_seconds,
            lock_lease: Duration::from_millis(config.ride_lock_lease_ms),
        },
    ));
    let trips = Arc::new(TripService::new(
        db_pool.clone(),
        cache.clone(),
        bus.clone(),
        geo.clone(),
        sims.clone(),
        rides.clone(),
    ));
    let payments = Arc::new(PaymentService::new(
        db_pool.clone(),
        cache.clone(),
        bus.clone(),
        locks.clone(),
        MockPsp::new(config.card_success_rate),
        Duration::from_millis(config.payment_lock_lease_ms),
    ));
    let location = Arc::new(LocationService::new(
        db_pool.clone(),
        bus.clone(),
        geo.clone(),
        drivers.clone(),
    ));

    let ws_state = WsState::new();

    // Live driver positions survive a restart via the location history.
    if let Err(e) = drivers.restore_geo_index().await {
        tracing::warn!(error = %e, "Geo index restore failed");
    }

    // Background tasks
    tokio::spawn(run_offer_sweeper(db_pool.clone(), Duration::from_secs(1)));

    let flusher = location.clone();
    tokio::spawn(flusher.run_flusher(Duration::from_secs(1)));

    let consumer_bus = bus.clone();
    let consumer_group = config.consumer_group.clone();
    let consumer_ws = ws_state.clone();
    tokio::spawn(async move {
        if let Err(e) = run_notifications_consumer(consumer_bus, consumer_group, consumer_ws).await
        {
            tracing::error!(error = %e, "Notifications consumer exited");
        }
    });

    let rate_limiter = middleware::RateLimiter::new(config.rate_limit_rps);
    let prune_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            prune_limiter.prune(Duration::from_secs(300)).await;
        }
    });

    let app_state = AppState {
        config: Arc::new(config.clone()),
        db: db_pool.clone(),
        cache: cache.clone(),
        ws: ws_state.clone(),
        tenants,
        riders,
        drivers,
        rides,
        dispatch,
        trips,
        payments,
        location: location.clone(),
        sims: sims.clone(),
    };

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/ws", get(realtime::ws_handler))
        .merge(routes::tenant_routes())
        .merge(routes::rider_routes())
        .merge(routes::driver_routes())
        .merge(routes::ride_routes())
        .merge(routes::trip_routes())
        .merge(routes::payment_routes())
        .with_state(app_state)
        .layer(axum::middleware::from_fn(middleware::request_tracing))
        .layer(axum::middleware::from_fn(move |req, next| {
            let limiter = rate_limiter.clone();
            async move { middleware::rate_limit(limiter, req, next).await }
        }))
        .layer(configure_cors(&config));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);
    tracing::info!("WebSocket available at ws://{}/ws", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "Failed to bind {addr}");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    // Drain in-process state before exit.
    sims.stop_all().await;
    location.flush().await;

    tracing::info!("Server shutdown complete");
}

async fn root() -> &'static str {
    "RideLink API Server"
}

/// Health check response
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    database: String,
    cache: String,
    websocket_connections: usize,
    active_simulations: usize,
    version: &'static str,
}

/// Health check endpoint
async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<HealthResponse> {
    let database = match db::check_health(&state.db).await {
        Ok(()) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };
    let cache = match state.cache.ping().await {
        Ok(()) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    let status = if database == "connected" && cache == "connected" {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        database,
        cache,
        websocket_connections: state.ws.connection_count().await,
        active_simulations: state.sims.active_count().await,
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn configure_cors(config: &Config) -> CorsLayer {
    let Some(allowed) = config.cors_allowed_origins.as_deref() else {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    };

    let origins: Vec<HeaderValue> = allowed
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
