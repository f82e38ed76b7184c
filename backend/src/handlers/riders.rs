//! Rider API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiResult;
use crate::models::{ApiResponse, CreateRiderRequest, Rider};
use crate::rides::{ListRidesQuery, Ride};
use crate::state::AppState;

/// Create a rider
pub async fn create_rider(
    State(state): State<AppState>,
    Json(request): Json<CreateRiderRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Rider>>)> {
    request.validate()?;
    let rider = state.riders.create(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(rider))))
}

/// Get a rider by id
pub async fn get_rider(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Rider>>> {
    let rider = state.riders.get(id).await?;
    Ok(Json(ApiResponse::ok(rider)))
}

/// The rider's current ride, if any
pub async fn rider_current_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Option<Ride>>>> {
    let ride = state.riders.current_ride(id).await?;
    Ok(Json(ApiResponse::ok(ride)))
}

/// Paginated ride history for the rider
pub async fn rider_rides(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListRidesQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Ride>>>> {
    let rides = state.riders.list_rides(id, &query).await?;
    Ok(Json(ApiResponse::ok(rides)))
}
