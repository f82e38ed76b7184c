//! Payment route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments", post(create_payment))
        .route("/v1/payments/:id", get(get_payment))
        .route("/v1/payments/:id/retry", post(retry_payment))
        .route("/v1/payments/:id/refund", post(refund_payment))
}
