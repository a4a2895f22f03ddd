//! Gateway callbacks and payment back-office endpoints.
//!
//! SSLCommerz may deliver the same fields as a query string (browser redirect) or a
//! form body (POST redirect and IPN), so both verbs share one code path.

use super::common::{ok, ok_with_message};
use crate::{
    auth::StaffUser,
    entities::payment,
    errors::ServiceError,
    services::payments::{CallbackOutcome, RefundRequest, SslCallbackKind},
    ApiResult, AppState,
};
use axum::{
    extract::{Form, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

fn callback_kind(raw: &str) -> Result<SslCallbackKind, ServiceError> {
    match raw {
        "success" => Ok(SslCallbackKind::Success),
        "fail" => Ok(SslCallbackKind::Fail),
        "cancel" => Ok(SslCallbackKind::Cancel),
        "ipn" => Ok(SslCallbackKind::Ipn),
        other => Err(ServiceError::NotFound(format!("Unknown callback {}", other))),
    }
}

async fn sslcommerz_callback(
    state: AppState,
    kind: String,
    fields: BTreeMap<String, String>,
) -> Result<Response, ServiceError> {
    let kind = callback_kind(&kind)?;
    let result = state.services.payments.handle_sslcommerz(kind, fields).await;

    if kind == SslCallbackKind::Ipn {
        // The gateway only looks at the status code and a short body
        return Ok(match result {
            Ok(_) => (StatusCode::OK, "OK").into_response(),
            Err(ServiceError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "Payment not found").into_response()
            }
            Err(ServiceError::BadRequest(msg)) | Err(ServiceError::ValidationError(msg)) => {
                warn!(%msg, "Rejected IPN");
                (StatusCode::BAD_REQUEST, msg).into_response()
            }
            Err(other) => return Err(other),
        });
    }

    let outcome = result?;
    let message = outcome.message();
    Ok(ok_with_message(outcome, message).into_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/sslcommerz/{kind}",
    summary = "SSLCommerz redirect (query string)",
    params(("kind" = String, Path, description = "success, fail, cancel or ipn")),
    responses(
        (status = 200, description = "Callback reconciled", body = CallbackOutcome),
        (status = 400, description = "Invalid payload or signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn sslcommerz_callback_get(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(fields): Query<BTreeMap<String, String>>,
) -> Result<Response, ServiceError> {
    sslcommerz_callback(state, kind, fields).await
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/sslcommerz/{kind}",
    summary = "SSLCommerz redirect or IPN (form body)",
    params(("kind" = String, Path, description = "success, fail, cancel or ipn")),
    responses(
        (status = 200, description = "Callback reconciled; IPN answers `OK`", body = CallbackOutcome),
        (status = 400, description = "Invalid payload or signature"),
        (status = 404, description = "Payment not found"),
    ),
    tag = "Payments"
)]
pub async fn sslcommerz_callback_post(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Form(fields): Form<BTreeMap<String, String>>,
) -> Result<Response, ServiceError> {
    sslcommerz_callback(state, kind, fields).await
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct BkashCallbackQuery {
    #[serde(rename = "paymentID")]
    pub payment_id: String,
    pub status: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/bkash/callback",
    summary = "Customer returns from bKash",
    params(BkashCallbackQuery),
    responses(
        (status = 200, description = "Payment executed or marked failed", body = CallbackOutcome),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "bKash unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn bkash_callback(
    State(state): State<AppState>,
    Query(query): Query<BkashCallbackQuery>,
) -> ApiResult<CallbackOutcome> {
    let outcome = state
        .services
        .payments
        .handle_bkash(&query.payment_id, &query.status)
        .await?;
    let message = outcome.message();
    Ok(ok_with_message(outcome, message))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ManualConfirmationRequest {
    #[validate(length(min = 1, max = 100))]
    pub transaction_id: String,
    pub amount: Decimal,
    /// Reference the customer quoted from their Nagad or Rocket receipt
    #[validate(length(max = 100))]
    pub reference: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/manual/confirm",
    summary = "Record a Nagad or Rocket payment checked by staff",
    request_body = ManualConfirmationRequest,
    responses(
        (status = 200, description = "Payment reconciled", body = CallbackOutcome),
        (status = 400, description = "Not a manual payment", body = crate::errors::ErrorResponse),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing staff key", body = crate::errors::ErrorResponse),
        (status = 403, description = "Invalid staff key", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn confirm_manual_payment(
    State(state): State<AppState>,
    _staff: StaffUser,
    Json(request): Json<ManualConfirmationRequest>,
) -> ApiResult<CallbackOutcome> {
    request.validate()?;
    let outcome = state
        .services
        .payments
        .confirm_manual_payment(&request.transaction_id, request.amount, request.reference)
        .await?;
    let message = outcome.message();
    Ok(ok_with_message(outcome, message))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentView {
    pub id: Uuid,
    pub transaction_id: String,
    pub payment_method: crate::entities::order::PaymentMethod,
    pub amount: Decimal,
    pub status: payment::PaymentRecordStatus,
    pub review_required: bool,
    pub review_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<payment::Model> for PaymentView {
    fn from(p: payment::Model) -> Self {
        Self {
            id: p.id,
            transaction_id: p.transaction_id,
            payment_method: p.payment_method,
            amount: p.amount,
            status: p.status,
            review_required: p.review_required,
            review_reason: p.review_reason,
            created_at: p.created_at,
            completed_at: p.completed_at,
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/{transaction_id}/refund",
    summary = "Refund a completed payment",
    params(("transaction_id" = String, Path, description = "Gateway transaction id")),
    request_body = RefundRequest,
    responses(
        (status = 200, description = "Payment refunded", body = PaymentView),
        (status = 400, description = "Payment cannot be refunded", body = crate::errors::ErrorResponse),
        (status = 402, description = "Gateway refused the refund", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing staff key", body = crate::errors::ErrorResponse),
        (status = 403, description = "Invalid staff key", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(transaction_id): Path<String>,
    Json(request): Json<RefundRequest>,
) -> ApiResult<PaymentView> {
    let refunded = state
        .services
        .payments
        .refund(&transaction_id, request)
        .await?;
    Ok(ok(refunded.into()))
}
