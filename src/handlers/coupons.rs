use super::common::{created, ok_with_message};
use crate::{
    auth::{CustomerId, StaffUser},
    entities::coupon::{self, DiscountType},
    errors::ServiceError,
    services::coupons::{CouponPreview, CreateCouponRequest},
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 50))]
    pub code: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons/apply",
    summary = "Preview a coupon against the cart",
    description = "Validates the code for the current customer and cart subtotal without redeeming it",
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Coupon accepted", body = CouponPreview),
        (status = 400, description = "Coupon rejected; `details` carries the reason code", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing customer id", body = crate::errors::ErrorResponse),
    ),
    tag = "Coupons"
)]
pub async fn apply_coupon(
    State(state): State<AppState>,
    customer: CustomerId,
    Json(request): Json<ApplyCouponRequest>,
) -> ApiResult<CouponPreview> {
    request.validate()?;
    let user_id = customer.into_inner();
    let subtotal = state.services.cart.subtotal(user_id).await?;
    let preview = state
        .services
        .coupons
        .preview(&request.code, Some(user_id), subtotal)
        .await?;
    let message = preview.message.clone();
    Ok(ok_with_message(preview, message))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CouponView {
    pub id: Uuid,
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub min_purchase_amount: Decimal,
    pub max_uses: Option<i32>,
    pub max_uses_per_user: i32,
    pub used_count: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub is_active: bool,
}

impl From<coupon::Model> for CouponView {
    fn from(c: coupon::Model) -> Self {
        Self {
            id: c.id,
            code: c.code,
            description: c.description,
            discount_type: c.discount_type,
            discount_value: c.discount_value,
            max_discount_amount: c.max_discount_amount,
            min_purchase_amount: c.min_purchase_amount,
            max_uses: c.max_uses,
            max_uses_per_user: c.max_uses_per_user,
            used_count: c.used_count,
            valid_from: c.valid_from,
            valid_to: c.valid_to,
            is_active: c.is_active,
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    summary = "Create a coupon",
    request_body = CreateCouponRequest,
    responses(
        (status = 201, description = "Coupon created; the code is stored uppercase", body = CouponView),
        (status = 400, description = "Invalid coupon definition", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing staff key", body = crate::errors::ErrorResponse),
        (status = 403, description = "Invalid staff key", body = crate::errors::ErrorResponse),
    ),
    tag = "Coupons"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    _staff: StaffUser,
    Json(request): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CouponView>>), ServiceError> {
    let coupon = state.services.coupon_admin.create_coupon(request).await?;
    Ok(created(coupon.into()))
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons/{coupon_id}/deactivate",
    summary = "Stop accepting a coupon",
    params(("coupon_id" = Uuid, Path, description = "Coupon id")),
    responses(
        (status = 204, description = "Coupon deactivated"),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing staff key", body = crate::errors::ErrorResponse),
        (status = 403, description = "Invalid staff key", body = crate::errors::ErrorResponse),
    ),
    tag = "Coupons"
)]
pub async fn deactivate_coupon(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(coupon_id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .coupon_admin
        .deactivate_coupon(coupon_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
