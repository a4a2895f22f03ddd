use super::common::{created, ok, ok_with_message};
use crate::{
    auth::CustomerId,
    errors::ServiceError,
    services::rentals::{
        ActivateRentalRequest, CreateRentalRequest, RenewRentalRequest, RentalPlanView, RentalQuote,
        RentalResponse,
    },
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Debug, Deserialize, IntoParams)]
pub struct QuoteQuery {
    pub book_id: Uuid,
    pub plan_id: Uuid,
}

#[utoipa::path(
    get,
    path = "/api/v1/rentals/plans",
    summary = "Active rental plans",
    responses((status = 200, description = "Plans in display order", body = [RentalPlanView])),
    tag = "Rentals"
)]
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Vec<RentalPlanView>> {
    Ok(ok(state.services.rentals.list_plans().await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/rentals/quote",
    summary = "Price a rental before creating it",
    params(QuoteQuery),
    responses(
        (status = 200, description = "Rental price and deposit", body = RentalQuote),
        (status = 404, description = "Book or plan not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Rentals"
)]
pub async fn quote(
    State(state): State<AppState>,
    Query(query): Query<QuoteQuery>,
) -> ApiResult<RentalQuote> {
    Ok(ok(state
        .services
        .rentals
        .quote(query.book_id, query.plan_id)
        .await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/rentals",
    summary = "Create a pending rental",
    request_body = CreateRentalRequest,
    responses(
        (status = 201, description = "Rental created and copy reserved", body = RentalResponse),
        (status = 400, description = "Rental limit reached", body = crate::errors::ErrorResponse),
        (status = 422, description = "Book not available for rent", body = crate::errors::ErrorResponse),
    ),
    tag = "Rentals"
)]
pub async fn create_rental(
    State(state): State<AppState>,
    customer: CustomerId,
    Json(request): Json<CreateRentalRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RentalResponse>>), ServiceError> {
    let rental = state
        .services
        .rentals
        .create(customer.into_inner(), request)
        .await?;
    Ok(created(rental))
}

#[utoipa::path(
    get,
    path = "/api/v1/rentals/{rental_number}",
    summary = "Get one of the customer's rentals",
    params(("rental_number" = String, Path, description = "Rental number")),
    responses(
        (status = 200, description = "Rental with history", body = RentalResponse),
        (status = 404, description = "Rental not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Rentals"
)]
pub async fn get_rental(
    State(state): State<AppState>,
    customer: CustomerId,
    Path(rental_number): Path<String>,
) -> ApiResult<RentalResponse> {
    Ok(ok(state
        .services
        .rentals
        .get(customer.into_inner(), &rental_number)
        .await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/rentals/{rental_number}/activate",
    summary = "Start the rental period",
    params(("rental_number" = String, Path, description = "Rental number")),
    request_body = ActivateRentalRequest,
    responses(
        (status = 200, description = "Rental active", body = RentalResponse),
        (status = 400, description = "Rental is not pending", body = crate::errors::ErrorResponse),
    ),
    tag = "Rentals"
)]
pub async fn activate_rental(
    State(state): State<AppState>,
    customer: CustomerId,
    Path(rental_number): Path<String>,
    Json(request): Json<ActivateRentalRequest>,
) -> ApiResult<RentalResponse> {
    let rental = state
        .services
        .rentals
        .activate(customer.into_inner(), &rental_number, request)
        .await?;
    Ok(ok_with_message(rental, "Rental activated successfully!"))
}

#[utoipa::path(
    post,
    path = "/api/v1/rentals/{rental_number}/renew",
    summary = "Extend an active rental",
    params(("rental_number" = String, Path, description = "Rental number")),
    request_body = RenewRentalRequest,
    responses(
        (status = 200, description = "Rental renewed", body = RentalResponse),
        (status = 400, description = "Rental cannot be renewed", body = crate::errors::ErrorResponse),
    ),
    tag = "Rentals"
)]
pub async fn renew_rental(
    State(state): State<AppState>,
    customer: CustomerId,
    Path(rental_number): Path<String>,
    request: Option<Json<RenewRentalRequest>>,
) -> ApiResult<RentalResponse> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let renewal = state
        .services
        .rentals
        .renew(customer.into_inner(), &rental_number, request)
        .await?;
    Ok(ok_with_message(renewal.rental, renewal.message))
}

#[utoipa::path(
    post,
    path = "/api/v1/rentals/{rental_number}/return",
    summary = "Return a rented book",
    params(("rental_number" = String, Path, description = "Rental number")),
    responses(
        (status = 200, description = "Rental closed; late fee applied if overdue", body = RentalResponse),
        (status = 400, description = "Rental is not out", body = crate::errors::ErrorResponse),
    ),
    tag = "Rentals"
)]
pub async fn return_rental(
    State(state): State<AppState>,
    customer: CustomerId,
    Path(rental_number): Path<String>,
) -> ApiResult<RentalResponse> {
    Ok(ok(state
        .services
        .rentals
        .return_rental(customer.into_inner(), &rental_number)
        .await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/rentals/{rental_number}/cancel",
    summary = "Cancel a pending rental",
    params(("rental_number" = String, Path, description = "Rental number")),
    responses(
        (status = 200, description = "Rental cancelled", body = RentalResponse),
        (status = 400, description = "Rental already started", body = crate::errors::ErrorResponse),
    ),
    tag = "Rentals"
)]
pub async fn cancel_rental(
    State(state): State<AppState>,
    customer: CustomerId,
    Path(rental_number): Path<String>,
) -> ApiResult<RentalResponse> {
    let rental = state
        .services
        .rentals
        .cancel(customer.into_inner(), &rental_number)
        .await?;
    Ok(ok_with_message(rental, "Rental cancelled successfully."))
}
