#![allow(dead_code)]

use std::str::FromStr;

use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
    Router,
};
use bookstore_api::{
    config::AppConfig,
    db,
    entities::{book, coupon, coupon::DiscountType, rental_plan},
    events::{self, EventSender},
    handlers::AppServices,
    notifications::LoggingNotifier,
    services::{cart::AddToCartRequest, coupons::CreateCouponRequest},
    AppState,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const STAFF_KEY: &str = "test-staff-key-000001";

/// Application backed by a throwaway SQLite file
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Lets a test point gateways at a mock server before services are built
    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir for test database");
        let db_path = db_dir.path().join("bookstore_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.cors_allow_any_origin = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.site_url = "http://bookstore.test".to_string();
        cfg.staff_api_key = Some(STAFF_KEY.to_string());
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            Arc::new(LoggingNotifier),
        ));

        let services = AppServices::new(db_arc.clone(), event_sender.clone(), &cfg)
            .expect("services for tests");

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", bookstore_api::api_v1_routes())
            .layer(axum::middleware::from_fn(
                bookstore_api::middleware_helpers::request_id_middleware,
            ))
            .with_state(state.clone());

        Self {
            router,
            state,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// JSON request, optionally on behalf of a customer
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        customer: Option<Uuid>,
    ) -> Response {
        let headers = customer
            .map(|c| vec![("x-customer-id", c.to_string())])
            .unwrap_or_default();
        self.request_with_headers(method, uri, body, headers).await
    }

    /// JSON request from back-office tooling
    pub async fn staff_request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request_with_headers(method, uri, body, vec![("x-staff-key", STAFF_KEY.to_string())])
            .await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: Vec<(&str, String)>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Form-encoded POST, the way gateways deliver callbacks
    pub async fn post_form(&self, uri: &str, fields: &[(&str, &str)]) -> Response {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(encoded))
            .expect("failed to build form request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_book(&self, title: &str, price: Decimal, stock: i32) -> book::Model {
        let now = Utc::now();
        book::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title.to_string()),
            author: Set("Satyajit Ray".to_string()),
            isbn: Set(None),
            price: Set(price),
            discount_price: Set(None),
            stock: Set(stock),
            sales: Set(0),
            is_available: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed book")
    }

    pub async fn seed_shipping(&self, city: &str, fee: Decimal, is_default: bool) {
        let shipping = &self.state.services.shipping;
        shipping
            .upsert_fee(city, fee, true)
            .await
            .expect("seed shipping fee");
        if is_default {
            shipping.set_default(city).await.expect("seed default fee");
        }
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: DiscountType,
        value: Decimal,
        tune: impl FnOnce(&mut CreateCouponRequest),
    ) -> coupon::Model {
        let now = Utc::now();
        let mut request = CreateCouponRequest {
            code: code.to_string(),
            description: None,
            discount_type,
            discount_value: value,
            max_discount_amount: None,
            min_purchase_amount: Decimal::ZERO,
            max_uses: None,
            max_uses_per_user: None,
            valid_from: now - Duration::days(1),
            valid_to: now + Duration::days(30),
        };
        tune(&mut request);
        self.state
            .services
            .coupon_admin
            .create_coupon(request)
            .await
            .expect("seed coupon")
    }

    pub async fn seed_plan(&self, name: &str, days: i32, price_percentage: Decimal) -> rental_plan::Model {
        rental_plan::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            days: Set(days),
            price_percentage: Set(price_percentage),
            is_active: Set(true),
            display_order: Set(days),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed rental plan")
    }

    pub async fn add_to_cart(&self, user_id: Uuid, book_id: Uuid, quantity: i32) {
        self.state
            .services
            .cart
            .add(user_id, AddToCartRequest { book_id, quantity })
            .await
            .expect("add to cart");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn read_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

pub async fn read_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

/// Reads a decimal that may be serialized as a string or a number
pub fn decimal_at(value: &Value, pointer: &str) -> Decimal {
    match value.pointer(pointer) {
        Some(Value::String(s)) => Decimal::from_str(s).expect("decimal string"),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("no decimal at {}: {:?}", pointer, other),
    }
}

pub fn checkout_body(city: &str, payment_method: &str, coupon_code: Option<&str>) -> Value {
    json!({
        "shipping": {
            "full_name": "Apu Roy",
            "phone": "01712345678",
            "email": "apu@example.com",
            "address_line1": "12 Lake Road",
            "city": city,
            "state": "Dhaka Division",
            "postal_code": "1205"
        },
        "payment_method": payment_method,
        "coupon_code": coupon_code,
    })
}
