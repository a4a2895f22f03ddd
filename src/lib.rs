//! Bookstore API Library
//!
//! Order pricing, checkout, payment reconciliation and book rentals for the storefront
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    /// Success envelope carrying a customer-facing message
    pub fn with_message(data: T, message: String) -> Self {
        Self {
            message: Some(message),
            ..Self::success(data)
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn message_response_keeps_data_and_message() {
        let response = ApiResponse::with_message(7, "Order placed successfully!".into());

        assert!(response.success);
        assert_eq!(response.data, Some(7));
        assert_eq!(
            response.message.as_deref(),
            Some("Order placed successfully!")
        );
        assert!(response.meta.is_some());
    }

    #[tokio::test]
    async fn validation_errors_response_includes_metadata() {
        let response = crate::tracing::scope_request_id(
            crate::tracing::RequestId::new("meta-validation"),
            async { ApiResponse::<()>::validation_errors(vec!["missing".into()]) },
        )
        .await;

        assert!(!response.success);
        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-validation"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    let shipping = Router::new()
        .route("/shipping-fee", get(handlers::shipping::get_shipping_fee))
        .route(
            "/shipping-fees",
            get(handlers::shipping::list_shipping_fees).put(handlers::shipping::upsert_shipping_fee),
        )
        .route(
            "/shipping-fees/default",
            post(handlers::shipping::set_default_shipping_fee),
        );

    let cart = Router::new()
        .route("/cart", get(handlers::cart::get_cart))
        .route("/cart/items", post(handlers::cart::add_to_cart))
        .route(
            "/cart/items/:line_id",
            put(handlers::cart::update_cart_line).delete(handlers::cart::remove_cart_line),
        )
        .route("/coupons", post(handlers::coupons::create_coupon))
        .route("/coupons/apply", post(handlers::coupons::apply_coupon))
        .route(
            "/coupons/:coupon_id/deactivate",
            post(handlers::coupons::deactivate_coupon),
        )
        .route("/checkout", post(handlers::checkout::place_order));

    let orders = Router::new()
        .route("/orders/track", post(handlers::orders::track_order))
        .route("/orders/:order_number", get(handlers::orders::get_order))
        .route(
            "/orders/:order_number/cancel",
            post(handlers::orders::cancel_order),
        )
        .route(
            "/orders/:order_number/retry-payment",
            post(handlers::orders::retry_payment),
        )
        .route(
            "/orders/:order_number/status",
            put(handlers::orders::update_order_status),
        );

    // Gateway callbacks carry no customer header; they are verified against the gateway
    let payments = Router::new()
        .route(
            "/payments/sslcommerz/:kind",
            get(handlers::payments::sslcommerz_callback_get)
                .post(handlers::payments::sslcommerz_callback_post),
        )
        .route(
            "/payments/bkash/callback",
            get(handlers::payments::bkash_callback),
        )
        .route(
            "/payments/manual/confirm",
            post(handlers::payments::confirm_manual_payment),
        )
        .route(
            "/payments/:transaction_id/refund",
            post(handlers::payments::refund_payment),
        );

    let rentals = Router::new()
        .route("/rentals", post(handlers::rentals::create_rental))
        .route("/rentals/plans", get(handlers::rentals::list_plans))
        .route("/rentals/quote", get(handlers::rentals::quote))
        .route("/rentals/:rental_number", get(handlers::rentals::get_rental))
        .route(
            "/rentals/:rental_number/activate",
            post(handlers::rentals::activate_rental),
        )
        .route(
            "/rentals/:rental_number/renew",
            post(handlers::rentals::renew_rental),
        )
        .route(
            "/rentals/:rental_number/return",
            post(handlers::rentals::return_rental),
        )
        .route(
            "/rentals/:rental_number/cancel",
            post(handlers::rentals::cancel_rental),
        );

    Router::new()
        // Status and health endpoints
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .merge(shipping)
        .merge(cart)
        .merge(orders)
        .merge(payments)
        .merge(rentals)
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let version = env!("CARGO_PKG_VERSION");
    let git = option_env!("GIT_HASH").unwrap_or("unknown");
    let build_time = option_env!("BUILD_TIME").unwrap_or("unknown");
    let status_data = json!({
        "status": "ok",
        "version": version,
        "git": git,
        "build_time": build_time,
        "service": "bookstore-api",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "environment": std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
