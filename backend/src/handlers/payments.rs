//! Payment API handlers

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiResult;
use crate::handlers::idempotency_header;
use crate::models::ApiResponse;
use crate::payments::{
    CreatePaymentRequest, Payment, PaymentOutcome, RefundPaymentRequest, RetryPaymentRequest,
};
use crate::state::AppState;

fn outcome_response(outcome: PaymentOutcome) -> Response {
    match outcome {
        PaymentOutcome::Settled(payment) => {
            (StatusCode::OK, Json(ApiResponse::ok(payment))).into_response()
        }
        PaymentOutcome::InFlight => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::<Payment>::message(
                "Payment is processing; poll the trip's payment for the outcome",
            )),
        )
            .into_response(),
    }
}

/// Process a payment for a completed trip. Idempotent per key: 200 with the
/// settled payment, or 202 while a concurrent request is still charging.
pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreatePaymentRequest>,
) -> ApiResult<Response> {
    request.validate()?;

    // Header and body both carry the key; when both are present they must
    // agree.
    if let Some(header_key) = idempotency_header(&headers) {
        if header_key != request.idempotency_key {
            return Err(crate::error::ApiError::BadRequest(
                "Idempotency-Key header does not match the request body".to_string(),
            ));
        }
    }

    let outcome = state
        .payments
        .process(request.trip_id, request.payment_method, &request.idempotency_key)
        .await?;
    Ok(outcome_response(outcome))
}

/// Get a payment by id
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Payment>>> {
    let payment = state.payments.get(id).await?;
    Ok(Json(ApiResponse::ok(payment)))
}

/// Retry a failed payment under a fresh idempotency key
pub async fn retry_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<RetryPaymentRequest>,
) -> ApiResult<Response> {
    request.validate()?;
    let outcome = state.payments.retry(id, &request.idempotency_key).await?;
    Ok(outcome_response(outcome))
}

/// Refund a completed, non-cash payment
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<RefundPaymentRequest>>,
) -> ApiResult<Json<ApiResponse<Payment>>> {
    let reason = body.and_then(|Json(b)| b.reason);
    let payment = state.payments.refund(id, reason).await?;
    Ok(Json(ApiResponse::ok(payment)))
}
