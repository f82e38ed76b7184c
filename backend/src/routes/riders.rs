//! Rider route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn rider_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/riders", post(create_rider))
        .route("/v1/riders/:id", get(get_rider))
        .route("/v1/riders/:id/current-ride", get(rider_current_ride))
        .route("/v1/riders/:id/rides", get(rider_rides))
}
