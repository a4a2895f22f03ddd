use super::common::{created, ok};
use crate::{
    auth::CustomerId,
    errors::ServiceError,
    services::cart::{AddToCartRequest, CartView, UpdateCartLineRequest},
    ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    summary = "Current cart",
    responses(
        (status = 200, description = "Cart lines and subtotal", body = CartView),
        (status = 401, description = "Missing customer id", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn get_cart(State(state): State<AppState>, customer: CustomerId) -> ApiResult<CartView> {
    Ok(ok(state.services.cart.view(customer.into_inner()).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    summary = "Add a book to the cart",
    request_body = AddToCartRequest,
    responses(
        (status = 201, description = "Line saved", body = CartView),
        (status = 404, description = "Book not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    customer: CustomerId,
    Json(request): Json<AddToCartRequest>,
) -> Result<(StatusCode, Json<crate::ApiResponse<CartView>>), ServiceError> {
    let user_id = customer.into_inner();
    state.services.cart.add(user_id, request).await?;
    Ok(created(state.services.cart.view(user_id).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{line_id}",
    summary = "Change a line's quantity",
    params(("line_id" = Uuid, Path, description = "Cart line id")),
    request_body = UpdateCartLineRequest,
    responses(
        (status = 200, description = "Updated cart", body = CartView),
        (status = 404, description = "Line not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn update_cart_line(
    State(state): State<AppState>,
    customer: CustomerId,
    Path(line_id): Path<Uuid>,
    Json(request): Json<UpdateCartLineRequest>,
) -> ApiResult<CartView> {
    let user_id = customer.into_inner();
    state
        .services
        .cart
        .update_quantity(user_id, line_id, request)
        .await?;
    Ok(ok(state.services.cart.view(user_id).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{line_id}",
    summary = "Remove a line",
    params(("line_id" = Uuid, Path, description = "Cart line id")),
    responses(
        (status = 204, description = "Removed"),
        (status = 404, description = "Line not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn remove_cart_line(
    State(state): State<AppState>,
    customer: CustomerId,
    Path(line_id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .cart
        .remove(customer.into_inner(), line_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
