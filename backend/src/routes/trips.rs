//! Trip route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn trip_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/trips/start", post(start_trip))
        .route("/v1/trips/:id", get(get_trip))
        .route("/v1/trips/:id/end", post(end_trip))
}
