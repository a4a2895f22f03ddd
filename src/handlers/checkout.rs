use crate::{
    auth::CustomerId,
    errors::ServiceError,
    services::checkout::{CheckoutRequest, PlacementResult},
    ApiResponse, AppState,
};
use axum::{extract::State, http::StatusCode, response::Json};

#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    summary = "Place an order from the cart",
    description = "Cash on delivery orders are confirmed immediately. Gateway orders stay pending and \
                   the response carries the payment step; if the gateway cannot be reached the order \
                   is still created and `warning` says so.",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order placed", body = PlacementResult),
        (status = 400, description = "Empty cart, invalid address or coupon", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing customer id", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn place_order(
    State(state): State<AppState>,
    customer: CustomerId,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PlacementResult>>), ServiceError> {
    let result = state
        .services
        .checkout
        .place_order(customer.into_inner(), request)
        .await?;
    let message = result
        .warning
        .clone()
        .unwrap_or_else(|| result.message.clone());
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(result, message)),
    ))
}
