use super::common::ok;
use crate::{
    auth::{CustomerId, StaffUser},
    services::{
        orders::{CancelOrderRequest, OrderResponse, TrackOrderRequest, UpdateOrderStatusRequest},
        payments::PaymentStep,
    },
    ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    response::Json,
};

#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_number}",
    summary = "Get one of the customer's orders",
    params(("order_number" = String, Path, description = "Public order number")),
    responses(
        (status = 200, description = "Order with items and history", body = OrderResponse),
        (status = 401, description = "Missing customer id", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    customer: CustomerId,
    Path(order_number): Path<String>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .get_for_user(customer.into_inner(), &order_number)
        .await?;
    Ok(ok(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/track",
    summary = "Track an order without signing in",
    request_body = TrackOrderRequest,
    responses(
        (status = 200, description = "Order found", body = OrderResponse),
        (status = 404, description = "No order with that number and phone", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn track_order(
    State(state): State<AppState>,
    Json(request): Json<TrackOrderRequest>,
) -> ApiResult<OrderResponse> {
    Ok(ok(state.services.orders.track(request).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_number}/cancel",
    summary = "Cancel a pending or confirmed order",
    params(("order_number" = String, Path, description = "Public order number")),
    request_body = CancelOrderRequest,
    responses(
        (status = 200, description = "Order cancelled, stock restored", body = OrderResponse),
        (status = 400, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    customer: CustomerId,
    Path(order_number): Path<String>,
    request: Option<Json<CancelOrderRequest>>,
) -> ApiResult<OrderResponse> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let order = state
        .services
        .orders
        .cancel(customer.into_inner(), &order_number, request)
        .await?;
    Ok(ok(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_number}/retry-payment",
    summary = "Start a new gateway payment for an unpaid order",
    params(("order_number" = String, Path, description = "Public order number")),
    responses(
        (status = 200, description = "Next payment step", body = PaymentStep),
        (status = 400, description = "Order is not awaiting payment", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable", body = crate::errors::ErrorResponse),
        (status = 504, description = "Gateway timed out", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn retry_payment(
    State(state): State<AppState>,
    customer: CustomerId,
    Path(order_number): Path<String>,
) -> ApiResult<PaymentStep> {
    let step = state
        .services
        .orders
        .retry_payment(customer.into_inner(), &order_number)
        .await?;
    Ok(ok(step))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{order_number}/status",
    summary = "Move an order along its lifecycle",
    params(("order_number" = String, Path, description = "Public order number")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = OrderResponse),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing staff key", body = crate::errors::ErrorResponse),
        (status = 403, description = "Invalid staff key", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(order_number): Path<String>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .update_status(&order_number, request)
        .await?;
    Ok(ok(order))
}
