//! Driver route definitions

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn driver_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/drivers", post(create_driver))
        .route("/v1/drivers/:id", get(get_driver))
        .route("/v1/drivers/:id/status", patch(update_driver_status))
        .route("/v1/drivers/:id/location", post(report_location))
        .route("/v1/drivers/:id/accept", post(accept_offer))
        .route("/v1/drivers/:id/decline", post(decline_offer))
        .route("/v1/drivers/:id/current-ride", get(driver_current_ride))
        .route("/v1/drivers/:id/pending-offers", get(driver_pending_offers))
        .route("/v1/drivers/:id/rides", get(driver_rides))
}
