use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bookstore API",
        version = "1.0.0",
        description = r#"
# Bookstore API

Storefront backend for cart checkout, order tracking, payment gateways and book rentals.

## Features

- **Shipping Fees**: Per-city delivery fees with a default fallback
- **Coupons**: Percentage and fixed discounts with usage limits
- **Checkout**: All-or-nothing order placement from the cart
- **Payments**: bKash, Nagad, Rocket and SSLCommerz with idempotent callbacks
- **Rentals**: Plan-based book rentals with renewals and late fees

## Customer identity

Customer endpoints read the caller from the `X-Customer-Id` header:

```
X-Customer-Id: 6c1f0d6e-2c55-4d0e-9f6f-1f7f3c9b8a10
```

## Error Handling

Errors share one envelope; coupon rejections carry the reason code in `details`:

```json
{
  "error": "Bad Request",
  "message": "minimum purchase amount ৳500 required",
  "details": "below_minimum_purchase",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Shipping", description = "Delivery fee lookup and administration"),
        (name = "Cart", description = "Shopping cart endpoints"),
        (name = "Coupons", description = "Coupon preview and administration"),
        (name = "Checkout", description = "Order placement"),
        (name = "Orders", description = "Order tracking and lifecycle"),
        (name = "Payments", description = "Gateway callbacks and payment back office"),
        (name = "Rentals", description = "Book rental endpoints")
    ),
    paths(
        // Shipping
        crate::handlers::shipping::get_shipping_fee,
        crate::handlers::shipping::list_shipping_fees,
        crate::handlers::shipping::upsert_shipping_fee,
        crate::handlers::shipping::set_default_shipping_fee,

        // Cart and checkout
        crate::handlers::cart::get_cart,
        crate::handlers::cart::add_to_cart,
        crate::handlers::cart::update_cart_line,
        crate::handlers::cart::remove_cart_line,
        crate::handlers::coupons::apply_coupon,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::deactivate_coupon,
        crate::handlers::checkout::place_order,

        // Orders
        crate::handlers::orders::get_order,
        crate::handlers::orders::track_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::retry_payment,
        crate::handlers::orders::update_order_status,

        // Payments
        crate::handlers::payments::sslcommerz_callback_get,
        crate::handlers::payments::sslcommerz_callback_post,
        crate::handlers::payments::bkash_callback,
        crate::handlers::payments::confirm_manual_payment,
        crate::handlers::payments::refund_payment,

        // Rentals
        crate::handlers::rentals::list_plans,
        crate::handlers::rentals::quote,
        crate::handlers::rentals::create_rental,
        crate::handlers::rentals::get_rental,
        crate::handlers::rentals::activate_rental,
        crate::handlers::rentals::renew_rental,
        crate::handlers::rentals::return_rental,
        crate::handlers::rentals::cancel_rental,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::services::pricing::PriceBreakdown,
            crate::services::checkout::CheckoutStage,
            crate::services::orders::StatusHistoryEntry,
            crate::services::rentals::RentalHistoryEntry,
            crate::services::rentals::RenewalResult,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_checkout_and_callbacks() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Bookstore API"));
        assert!(json.contains("/api/v1/checkout"));
        assert!(json.contains("/api/v1/payments/sslcommerz/{kind}"));
        assert!(json.contains("/api/v1/rentals/{rental_number}/renew"));
    }
}
