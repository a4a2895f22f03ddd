mod common;

use axum::http::{Method, StatusCode};
use bookstore_api::entities::{
    book::Entity as BookEntity,
    cart_item::{self, Entity as CartItemEntity},
    coupon::{DiscountType, Entity as CouponEntity},
    coupon_usage::Entity as CouponUsageEntity,
    order::{self, Entity as OrderEntity, OrderStatus},
    order_item::Entity as OrderItemEntity,
    order_status_history::{self, Entity as HistoryEntity},
};
use common::{checkout_body, decimal_at, read_json, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

#[tokio::test]
async fn cod_order_with_percentage_coupon_is_confirmed() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let book = app.seed_book("Pather Panchali", dec!(750), 5).await;
    app.seed_shipping("Dhaka", dec!(60), false).await;
    app.seed_coupon("WELCOME10", DiscountType::Percentage, dec!(10), |c| {
        c.min_purchase_amount = dec!(100);
        c.max_discount_amount = Some(dec!(200));
    })
    .await;
    app.add_to_cart(user, book.id, 2).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("  dhaka ", "cod", Some("welcome10"))),
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;

    assert_eq!(body["data"]["stage"], "confirmed");
    assert_eq!(body["data"]["status"], "confirmed");
    assert_eq!(body["message"], "Order placed successfully!");
    assert_eq!(decimal_at(&body, "/data/pricing/subtotal"), dec!(1500));
    assert_eq!(decimal_at(&body, "/data/pricing/shipping_cost"), dec!(60));
    assert_eq!(decimal_at(&body, "/data/pricing/discount"), dec!(150));
    assert_eq!(decimal_at(&body, "/data/pricing/total"), dec!(1410));

    let order_number = body["data"]["order_number"].as_str().unwrap().to_string();
    assert!(order_number.starts_with("BS"));

    let stored = OrderEntity::find()
        .filter(order::Column::OrderNumber.eq(order_number.as_str()))
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("order persisted");
    assert_eq!(stored.status, OrderStatus::Confirmed);
    assert!(stored.confirmed_at.is_some());
    assert_eq!(stored.coupon_code.as_deref(), Some("WELCOME10"));
    assert_eq!(stored.city, "dhaka");

    let book = BookEntity::find_by_id(book.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(book.stock, 3);
    assert_eq!(book.sales, 2);

    let coupon = CouponEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(coupon.used_count, 1);

    let cart_lines = CartItemEntity::find()
        .filter(cart_item::Column::UserId.eq(user))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(cart_lines, 0);

    let history = HistoryEntity::find()
        .filter(order_status_history::Column::OrderId.eq(stored.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    let statuses: Vec<_> = history.iter().map(|h| h.status).collect();
    assert!(statuses.contains(&OrderStatus::Pending));
    assert!(statuses.contains(&OrderStatus::Confirmed));
}

#[tokio::test]
async fn coupon_below_minimum_blocks_placement() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let book = app.seed_book("Chander Pahar", dec!(150), 4).await;
    app.seed_coupon("SAVE50", DiscountType::Fixed, dec!(50), |c| {
        c.min_purchase_amount = dec!(200);
    })
    .await;
    app.add_to_cart(user, book.id, 1).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("Sylhet", "cod", Some("SAVE50"))),
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["message"], "minimum purchase amount ৳200 required");
    assert_eq!(body["details"], "below_minimum_purchase");

    assert_eq!(OrderEntity::find().count(&*app.state.db).await.unwrap(), 0);
    let book = BookEntity::find_by_id(book.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(book.stock, 4);
}

#[tokio::test]
async fn unknown_city_without_default_uses_fallback_fee() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let book = app.seed_book("Feluda Samagra", dec!(300), 2).await;
    app.seed_shipping("Dhaka", dec!(60), false).await;
    app.add_to_cart(user, book.id, 1).await;

    let quote = read_json(
        app.request(
            Method::GET,
            "/api/v1/shipping-fee?city=Unknown%20City",
            None,
            None,
        )
        .await,
    )
    .await;
    assert_eq!(decimal_at(&quote, "/data/fee"), dec!(120));

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("Unknown City", "cod", None)),
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(decimal_at(&body, "/data/pricing/shipping_cost"), dec!(120));
    assert_eq!(decimal_at(&body, "/data/pricing/total"), dec!(420));
}

#[tokio::test]
async fn default_fee_applies_to_unlisted_cities() {
    let app = TestApp::new().await;
    app.seed_shipping("Dhaka", dec!(60), false).await;
    app.seed_shipping("Outside Dhaka", dec!(100), true).await;

    let body = read_json(
        app.request(Method::GET, "/api/v1/shipping-fee?city=Khulna", None, None)
            .await,
    )
    .await;
    assert_eq!(decimal_at(&body, "/data/fee"), dec!(100));

    let body = read_json(
        app.request(Method::GET, "/api/v1/shipping-fee", None, None)
            .await,
    )
    .await;
    assert_eq!(decimal_at(&body, "/data/fee"), dec!(0));
}

#[tokio::test]
async fn insufficient_stock_creates_nothing() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let book = app.seed_book("Aranyak", dec!(400), 2).await;
    app.add_to_cart(user, book.id, 2).await;

    // Someone else bought a copy after the cart was filled
    BookEntity::update_many()
        .col_expr(
            bookstore_api::entities::book::Column::Stock,
            sea_orm::sea_query::Expr::value(1),
        )
        .exec(&*app.state.db)
        .await
        .unwrap();

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("Dhaka", "cod", None)),
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Aranyak has insufficient stock"));

    assert_eq!(OrderEntity::find().count(&*app.state.db).await.unwrap(), 0);
    let cart_lines = CartItemEntity::find()
        .filter(cart_item::Column::UserId.eq(user))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(cart_lines, 1);
}

#[tokio::test]
async fn stock_lost_inside_the_transaction_rolls_everything_back() {
    let app = TestApp::new().await;
    let db = &*app.state.db;
    let user = Uuid::new_v4();
    let kept = app.seed_book("Chander Pahar", dec!(300), 5).await;
    let drained = app.seed_book("Hanabad", dec!(200), 3).await;
    let coupon = app
        .seed_coupon("SAVE50", DiscountType::Fixed, dec!(50), |c| {
            c.max_uses = Some(10);
        })
        .await;
    app.add_to_cart(user, kept.id, 2).await;
    app.add_to_cart(user, drained.id, 1).await;

    // Stock passes the pre-check, then vanishes once the order row is written
    db.execute_unprepared(
        "CREATE TRIGGER drain_hanabad AFTER INSERT ON orders \
         BEGIN UPDATE books SET stock = 0 WHERE title = 'Hanabad'; END;",
    )
    .await
    .unwrap();

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("Dhaka", "cod", Some("SAVE50"))),
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Hanabad has insufficient stock"));

    assert_eq!(OrderEntity::find().count(db).await.unwrap(), 0);
    assert_eq!(OrderItemEntity::find().count(db).await.unwrap(), 0);
    assert_eq!(CouponUsageEntity::find().count(db).await.unwrap(), 0);
    assert_eq!(HistoryEntity::find().count(db).await.unwrap(), 0);
    let coupon = CouponEntity::find_by_id(coupon.id).one(db).await.unwrap().unwrap();
    assert_eq!(coupon.used_count, 0);

    // The trigger's drain and the first line's decrement were undone too
    let kept = BookEntity::find_by_id(kept.id).one(db).await.unwrap().unwrap();
    assert_eq!((kept.stock, kept.sales), (5, 0));
    let drained = BookEntity::find_by_id(drained.id).one(db).await.unwrap().unwrap();
    assert_eq!(drained.stock, 3);

    let cart_lines = CartItemEntity::find()
        .filter(cart_item::Column::UserId.eq(user))
        .count(db)
        .await
        .unwrap();
    assert_eq!(cart_lines, 2);
}

#[tokio::test]
async fn empty_cart_and_bad_address_are_rejected() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("Dhaka", "cod", None)),
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let book = app.seed_book("Kapalkundala", dec!(200), 3).await;
    app.add_to_cart(user, book.id, 1).await;
    let mut body = checkout_body("Dhaka", "cod", None);
    body["shipping"]["phone"] = "12345".into();
    let response = app
        .request(Method::POST, "/api/v1/checkout", Some(body), Some(user))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("Dhaka", "paypal", None)),
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("Dhaka", "cod", None)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn gateway_outage_keeps_order_pending_with_warning() {
    // No bKash credentials configured, so initiation fails
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let book = app.seed_book("Debdas", dec!(250), 3).await;
    app.add_to_cart(user, book.id, 1).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("Dhaka", "bkash", None)),
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["data"]["stage"], "payment_pending");
    assert_eq!(body["data"]["status"], "pending");
    assert!(body["data"]["payment"].is_null());
    assert!(body["data"]["warning"].is_string());

    let order_number = body["data"]["order_number"].as_str().unwrap();
    let order = read_json(
        app.request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_number),
            None,
            Some(user),
        )
        .await,
    )
    .await;
    assert_eq!(order["data"]["can_retry_payment"], true);
    assert_eq!(order["data"]["can_cancel"], true);
}

#[tokio::test]
async fn manual_payment_methods_wait_for_confirmation() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let book = app.seed_book("Shesher Kobita", dec!(180), 3).await;
    app.add_to_cart(user, book.id, 1).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("Chittagong", "nagad", None)),
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["data"]["payment"]["type"], "awaiting_payment");
    assert_eq!(body["data"]["payment"]["method"], "nagad");
    let transaction_id = body["data"]["payment"]["transaction_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(transaction_id.starts_with("NAGAD-BS"));

    let total = decimal_at(&body, "/data/pricing/total");
    let confirmation = serde_json::json!({
        "transaction_id": transaction_id,
        "amount": total.to_string(),
        "reference": "NGD123"
    });

    // Customers cannot confirm their own manual payments
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/manual/confirm",
            Some(confirmation.clone()),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .staff_request(Method::POST, "/api/v1/payments/manual/confirm", Some(confirmation))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = read_json(response).await;
    assert_eq!(outcome["data"]["outcome"], "completed");

    let order = OrderEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
}
