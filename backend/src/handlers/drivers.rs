//! Driver API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::dispatch::RideOffer;
use crate::drivers::{
    AcceptOfferRequest, CreateDriverRequest, DeclineOfferRequest, Driver, DriverLocationRequest,
    UpdateDriverStatusRequest,
};
use crate::error::ApiResult;
use crate::models::ApiResponse;
use crate::rides::{ListRidesQuery, Ride};
use crate::state::AppState;

/// Create a driver
pub async fn create_driver(
    State(state): State<AppState>,
    Json(request): Json<CreateDriverRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Driver>>)> {
    request.validate()?;
    let driver = state.drivers.create(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(driver))))
}

/// Get a driver by id
pub async fn get_driver(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Driver>>> {
    let driver = state.drivers.get(id).await?;
    Ok(Json(ApiResponse::ok(driver)))
}

/// Change a driver's availability status
pub async fn update_driver_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateDriverStatusRequest>,
) -> ApiResult<Json<ApiResponse<Driver>>> {
    let driver = state.drivers.set_status(id, request.status).await?;
    Ok(Json(ApiResponse::ok(driver)))
}

/// REST telemetry fallback (the WebSocket path is preferred)
pub async fn report_location(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<DriverLocationRequest>,
) -> ApiResult<Json<ApiResponse<serde_json::Value>>> {
    request.validate()?;
    state
        .location
        .record(
            id,
            request.latitude,
            request.longitude,
            request.heading,
            request.speed,
            request.accuracy,
        )
        .await?;
    Ok(Json(ApiResponse::ok(
        json!({ "timestamp": chrono::Utc::now() }),
    )))
}

/// Accept a pending offer. Exactly one concurrent acceptance wins.
pub async fn accept_offer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AcceptOfferRequest>,
) -> ApiResult<Json<ApiResponse<Ride>>> {
    let ride = state.dispatch.accept_offer(request.ride_id, id).await?;
    Ok(Json(ApiResponse::ok(ride)))
}

/// Decline a pending offer
pub async fn decline_offer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<DeclineOfferRequest>,
) -> ApiResult<Json<ApiResponse<RideOffer>>> {
    let offer = state
        .dispatch
        .decline_offer(request.ride_id, id, request.reason)
        .await?;
    Ok(Json(ApiResponse::ok(offer)))
}

/// The driver's active ride, if any
pub async fn driver_current_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Option<Ride>>>> {
    let ride = state.drivers.current_ride(id).await?;
    Ok(Json(ApiResponse::ok(ride)))
}

/// Pending, unexpired offers for the driver
pub async fn driver_pending_offers(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Vec<RideOffer>>>> {
    let offers = state.drivers.pending_offers(id).await?;
    Ok(Json(ApiResponse::ok(offers)))
}

/// Ride history for the driver
pub async fn driver_rides(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListRidesQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Ride>>>> {
    let rides = state.drivers.list_rides(id, &query).await?;
    Ok(Json(ApiResponse::ok(rides)))
}
