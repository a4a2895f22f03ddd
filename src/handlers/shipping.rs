use super::common::ok;
use crate::{
    auth::StaffUser, entities::shipping_fee, errors::ServiceError, ApiResult, AppState,
};
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ShippingFeeQuery {
    /// Destination city; blank means no shipping
    pub city: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ShippingFeeQuote {
    pub city: Option<String>,
    pub fee: Decimal,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpsertShippingFeeRequest {
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    pub fee: Decimal,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SetDefaultShippingFeeRequest {
    #[validate(length(min = 1, max = 100))]
    pub city: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ShippingFeeView {
    pub id: Uuid,
    pub city_name: String,
    pub fee: Decimal,
    pub is_default: bool,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<shipping_fee::Model> for ShippingFeeView {
    fn from(row: shipping_fee::Model) -> Self {
        Self {
            id: row.id,
            city_name: row.city_name,
            fee: row.fee,
            is_default: row.is_default,
            is_active: row.is_active,
            updated_at: row.updated_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/shipping-fee",
    summary = "Shipping fee for a city",
    params(ShippingFeeQuery),
    responses(
        (status = 200, description = "Fee resolved", body = ShippingFeeQuote),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "Shipping"
)]
pub async fn get_shipping_fee(
    State(state): State<AppState>,
    Query(query): Query<ShippingFeeQuery>,
) -> ApiResult<ShippingFeeQuote> {
    let fee = state.services.shipping.resolve(query.city.as_deref()).await?;
    Ok(ok(ShippingFeeQuote {
        city: query.city,
        fee,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/shipping-fees",
    summary = "List configured shipping fees",
    responses((status = 200, description = "Configured rows", body = [ShippingFeeView])),
    tag = "Shipping"
)]
pub async fn list_shipping_fees(State(state): State<AppState>) -> ApiResult<Vec<ShippingFeeView>> {
    let rows = state.services.shipping.list_fees().await?;
    Ok(ok(rows.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    put,
    path = "/api/v1/shipping-fees",
    summary = "Create or update a city fee",
    request_body = UpsertShippingFeeRequest,
    responses(
        (status = 200, description = "Saved", body = ShippingFeeView),
        (status = 400, description = "Invalid fee", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing staff key", body = crate::errors::ErrorResponse),
        (status = 403, description = "Invalid staff key", body = crate::errors::ErrorResponse),
    ),
    tag = "Shipping"
)]
pub async fn upsert_shipping_fee(
    State(state): State<AppState>,
    _staff: StaffUser,
    axum::Json(request): axum::Json<UpsertShippingFeeRequest>,
) -> ApiResult<ShippingFeeView> {
    request.validate()?;
    let row = state
        .services
        .shipping
        .upsert_fee(&request.city, request.fee, request.is_active)
        .await?;
    Ok(ok(row.into()))
}

#[utoipa::path(
    post,
    path = "/api/v1/shipping-fees/default",
    summary = "Make a city's fee the default",
    request_body = SetDefaultShippingFeeRequest,
    responses(
        (status = 200, description = "Default updated"),
        (status = 404, description = "City not configured", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing staff key", body = crate::errors::ErrorResponse),
        (status = 403, description = "Invalid staff key", body = crate::errors::ErrorResponse),
    ),
    tag = "Shipping"
)]
pub async fn set_default_shipping_fee(
    State(state): State<AppState>,
    _staff: StaffUser,
    axum::Json(request): axum::Json<SetDefaultShippingFeeRequest>,
) -> Result<axum::http::StatusCode, ServiceError> {
    request.validate()?;
    state.services.shipping.set_default(&request.city).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
