mod common;

use axum::http::{Method, StatusCode};
use common::{read_json, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

fn back_office_routes() -> Vec<(Method, String, Value)> {
    let coupon_id = Uuid::new_v4();
    vec![
        (
            Method::PUT,
            "/api/v1/orders/BS20240101120000123456/status".to_string(),
            json!({ "status": "processing" }),
        ),
        (
            Method::POST,
            "/api/v1/payments/manual/confirm".to_string(),
            json!({ "transaction_id": "NAGAD-BS1-abc", "amount": "100" }),
        ),
        (
            Method::POST,
            "/api/v1/payments/SSL-BS1-abc/refund".to_string(),
            json!({ "remarks": "damaged" }),
        ),
        (
            Method::POST,
            "/api/v1/coupons".to_string(),
            json!({
                "code": "FREEBIE",
                "discount_type": "fixed",
                "discount_value": "500",
                "min_purchase_amount": "0",
                "valid_from": "2024-01-01T00:00:00Z",
                "valid_to": "2099-01-01T00:00:00Z"
            }),
        ),
        (
            Method::POST,
            format!("/api/v1/coupons/{}/deactivate", coupon_id),
            Value::Null,
        ),
        (
            Method::PUT,
            "/api/v1/shipping-fees".to_string(),
            json!({ "city": "Dhaka", "fee": "0" }),
        ),
        (
            Method::POST,
            "/api/v1/shipping-fees/default".to_string(),
            json!({ "city": "Dhaka" }),
        ),
    ]
}

fn body_of(body: &Value) -> Option<Value> {
    (!body.is_null()).then(|| body.clone())
}

#[tokio::test]
async fn back_office_routes_require_the_staff_key() {
    let app = TestApp::new().await;

    for (method, uri, body) in back_office_routes() {
        let anonymous = app
            .request(method.clone(), &uri, body_of(&body), None)
            .await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED, "{} {}", method, uri);

        let customer = app
            .request(method.clone(), &uri, body_of(&body), Some(Uuid::new_v4()))
            .await;
        assert_eq!(customer.status(), StatusCode::UNAUTHORIZED, "{} {}", method, uri);

        let wrong_key = app
            .request_with_headers(
                method.clone(),
                &uri,
                body_of(&body),
                vec![("x-staff-key", "not-the-staff-key-0000".to_string())],
            )
            .await;
        assert_eq!(wrong_key.status(), StatusCode::FORBIDDEN, "{} {}", method, uri);
    }

    // Nothing was written by the rejected calls
    let fees = read_json(app.request(Method::GET, "/api/v1/shipping-fees", None, None).await).await;
    assert_eq!(fees["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn staff_key_unlocks_back_office_routes() {
    let app = TestApp::new().await;

    let response = app
        .staff_request(
            Method::PUT,
            "/api/v1/shipping-fees",
            Some(json!({ "city": "Sylhet", "fee": "90" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .staff_request(
            Method::POST,
            "/api/v1/shipping-fees/default",
            Some(json!({ "city": "Sylhet" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let (_, uri, body) = back_office_routes().remove(3);
    let response = app.staff_request(Method::POST, &uri, Some(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let coupon = read_json(response).await;
    let coupon_id = coupon["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .staff_request(
            Method::POST,
            &format!("/api/v1/coupons/{}/deactivate", coupon_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn staff_routes_stay_closed_without_a_configured_key() {
    let app = TestApp::with_config(|cfg| cfg.staff_api_key = None).await;

    let response = app
        .staff_request(
            Method::PUT,
            "/api/v1/shipping-fees",
            Some(json!({ "city": "Sylhet", "fee": "90" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn health_check_is_open_and_reports_the_database() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["checks"]["database"], "healthy");
}
