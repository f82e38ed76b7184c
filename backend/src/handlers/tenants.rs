//! Tenant API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiResult;
use crate::models::{ApiResponse, CreateTenantRequest, Tenant};
use crate::state::AppState;

/// Create a tenant
pub async fn create_tenant(
    State(state): State<AppState>,
    Json(request): Json<CreateTenantRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Tenant>>)> {
    request.validate()?;
    let tenant = state.tenants.create(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(tenant))))
}

/// Get a tenant by id
pub async fn get_tenant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Tenant>>> {
    let tenant = state.tenants.get(id).await?;
    Ok(Json(ApiResponse::ok(tenant)))
}
