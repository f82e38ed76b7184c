//! Trip API handlers

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiResult;
use crate::models::ApiResponse;
use crate::state::AppState;
use crate::trips::{EndTripRequest, StartTripRequest, TripResponse};

/// Start the trip for a ride whose driver has arrived
pub async fn start_trip(
    State(state): State<AppState>,
    Json(request): Json<StartTripRequest>,
) -> ApiResult<Json<ApiResponse<TripResponse>>> {
    let trip = state.trips.start_trip(request.ride_id).await?;
    Ok(Json(ApiResponse::ok(trip.into())))
}

/// End an in-progress trip and settle the fare
pub async fn end_trip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<EndTripRequest>,
) -> ApiResult<Json<ApiResponse<TripResponse>>> {
    request.validate()?;
    let trip = state.trips.end_trip(id, request).await?;
    Ok(Json(ApiResponse::ok(trip.into())))
}

/// Get a trip by id
pub async fn get_trip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<TripResponse>>> {
    let trip = state.trips.get(id).await?;
    Ok(Json(ApiResponse::ok(trip.into())))
}
