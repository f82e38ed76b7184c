//! Tenant domain module
//!
//! Tenants are the isolation boundary: every rider, driver and ride belongs
//! to exactly one, and no ride ever crosses tenants.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{CreateTenantRequest, Tenant};

/// Tenant service
pub struct TenantService {
    pool: PgPool,
}

impl TenantService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a tenant
    pub async fn create(&self, request: CreateTenantRequest) -> ApiResult<Tenant> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "INSERT INTO tenants (name, region) VALUES ($1, $2) RETURNING *",
        )
        .bind(&request.name)
        .bind(&request.region)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(tenant_id = %tenant.id, name = %tenant.name, "Tenant created");
        Ok(tenant)
    }

    /// Get a tenant by id
    pub async fn get(&self, id: Uuid) -> ApiResult<Tenant> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Tenant {} not found", id)))
    }
}
