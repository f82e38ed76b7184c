//! Shared models and data structures for the RideLink backend

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::error::ErrorDetails;

/// Standard API response envelope: `{success, data?, error?, message?}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Successful response wrapping `data`
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    /// Successful response carrying only a message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            message: Some(message.into()),
        }
    }
}

/// Vehicle tier, which partitions the geo index and scales fares
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[sqlx(type_name = "vehicle_class", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    #[default]
    Economy,
    Premium,
    Xl,
}

impl VehicleClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Economy => "economy",
            VehicleClass::Premium => "premium",
            VehicleClass::Xl => "xl",
        }
    }
}

/// Payment method selected at ride creation
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Default)]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Card,
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Wallet => "wallet",
        }
    }
}

/// A WGS84 coordinate pair
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Tenant: isolated operator/region. Every rider, driver and ride carries
/// exactly one; no ride crosses tenants.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub region: String,
    pub created_at: DateTime<Utc>,
}

/// Request DTO for creating a tenant
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTenantRequest {
    #[validate(length(min = 2, max = 100))]
    pub name: String,

    #[validate(length(min = 2, max = 100))]
    pub region: String,
}

/// Rider model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Rider {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub phone: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request DTO for creating a rider
#[derive(Debug, Deserialize, Validate)]
pub struct CreateRiderRequest {
    pub tenant_id: Uuid,

    #[validate(length(min = 7, max = 20))]
    pub phone: String,

    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    #[validate(email)]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_class_as_str() {
        assert_eq!(VehicleClass::Economy.as_str(), "economy");
        assert_eq!(VehicleClass::Premium.as_str(), "premium");
        assert_eq!(VehicleClass::Xl.as_str(), "xl");
    }

    #[test]
    fn test_create_rider_validation() {
        let req = CreateRiderRequest {
            tenant_id: Uuid::new_v4(),
            phone: "+919812345678".to_string(),
            name: Some("Asha".to_string()),
            email: Some("asha@example.com".to_string()),
        };
        assert!(req.validate().is_ok());

        let bad = CreateRiderRequest {
            tenant_id: Uuid::new_v4(),
            phone: "123".to_string(),
            name: None,
            email: None,
        };
        assert!(bad.validate().is_err());
    }
}
