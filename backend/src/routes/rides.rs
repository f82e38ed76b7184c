//! Ride route definitions

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn ride_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/rides", post(create_ride))
        .route("/v1/rides/:id", get(get_ride))
        .route("/v1/rides/:id/cancel", post(cancel_ride))
        .route("/v1/rides/:id/status", patch(update_ride_status))
        .route("/v1/rides/:id/match", post(match_ride))
}
