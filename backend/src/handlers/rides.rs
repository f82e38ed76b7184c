//! Ride API handlers

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::dispatch::MatchOutcome;
use crate::error::ApiResult;
use crate::handlers::idempotency_header;
use crate::models::ApiResponse;
use crate::rides::{
    CancelRideRequest, CreateRideRequest, Ride, UpdateRideStatusRequest, VersionQuery,
};
use crate::state::AppState;

/// Create a ride and kick off matching in the background
pub async fn create_ride(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRideRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Ride>>)> {
    request.validate()?;

    let ride = state
        .rides
        .create(request, idempotency_header(&headers))
        .await?;

    // Matching runs asynchronously; drivers respond on their own time.
    let dispatch = state.dispatch.clone();
    let ride_id = ride.id;
    tokio::spawn(async move {
        if let Err(e) = dispatch.find_drivers(ride_id).await {
            tracing::warn!(%ride_id, error = %e, "Initial matching round failed");
        }
    });

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(ride))))
}

/// Get a ride by id
pub async fn get_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Ride>>> {
    let ride = state.rides.get(id).await?;
    Ok(Json(ApiResponse::ok(ride)))
}

/// Cancel a ride
pub async fn cancel_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRideRequest>>,
) -> ApiResult<Json<ApiResponse<Ride>>> {
    let reason = body.and_then(|Json(b)| b.reason);
    let ride = state.rides.cancel(id, reason).await?;
    Ok(Json(ApiResponse::ok(ride)))
}

/// Driver-progress status transition with optional optimistic version
pub async fn update_ride_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<VersionQuery>,
    Json(request): Json<UpdateRideStatusRequest>,
) -> ApiResult<Json<ApiResponse<Ride>>> {
    let ride = state
        .rides
        .progress(id, request.status, query.version)
        .await?;
    Ok(Json(ApiResponse::ok(ride)))
}

/// Run another matching round for a ride in REQUESTED or MATCHING
pub async fn match_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<MatchOutcome>>> {
    let outcome = state.dispatch.find_drivers(id).await?;
    Ok(Json(ApiResponse::ok(outcome)))
}
