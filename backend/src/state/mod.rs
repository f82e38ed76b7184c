//! Application state shared across handlers

use std::sync::Arc;

use sqlx::PgPool;

use crate::cache::Cache;
use crate::config::Config;
use crate::dispatch::DispatchService;
use crate::drivers::DriverService;
use crate::location::LocationService;
use crate::payments::PaymentService;
use crate::realtime::WsState;
use crate::riders::RiderService;
use crate::rides::RideService;
use crate::simulator::SimulatorRegistry;
use crate::tenants::TenantService;
use crate::trips::TripService;

use axum::extract::FromRef;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: PgPool,
    pub cache: Cache,
    pub ws: WsState,
    pub tenants: Arc<TenantService>,
    pub riders: Arc<RiderService>,
    pub drivers: Arc<DriverService>,
    pub rides: Arc<RideService>,
    pub dispatch: Arc<DispatchService>,
    pub trips: Arc<TripService>,
    pub payments: Arc<PaymentService>,
    pub location: Arc<LocationService>,
    pub sims: Arc<SimulatorRegistry>,
}

impl FromRef<AppState> for WsState {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.ws.clone()
    }
}
