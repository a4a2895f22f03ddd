mod common;

use axum::http::{Method, StatusCode};
use bookstore_api::{
    entities::{
        book::Entity as BookEntity,
        coupon::{DiscountType, Entity as CouponEntity},
        coupon_usage::Entity as CouponUsageEntity,
        order::Entity as OrderEntity,
    },
    errors::ServiceError,
    services::coupons::{self, CouponRejection, Redemption},
};
use common::{checkout_body, read_json, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};
use uuid::Uuid;

#[tokio::test]
async fn single_use_coupon_is_redeemed_exactly_once() {
    let app = TestApp::new().await;
    let book = app.seed_book("Gitanjali", dec!(500), 5).await;
    app.seed_coupon("ONLYONE", DiscountType::Fixed, dec!(100), |c| {
        c.max_uses = Some(1);
    })
    .await;

    let (first_user, second_user) = (Uuid::new_v4(), Uuid::new_v4());
    app.add_to_cart(first_user, book.id, 1).await;
    app.add_to_cart(second_user, book.id, 1).await;

    let first_body = checkout_body("Dhaka", "cod", Some("ONLYONE"));
    let second_body = checkout_body("Dhaka", "cod", Some("ONLYONE"));
    let (first, second) = tokio::join!(
        app.request(Method::POST, "/api/v1/checkout", Some(first_body), Some(first_user)),
        app.request(Method::POST, "/api/v1/checkout", Some(second_body), Some(second_user)),
    );

    let mut statuses = vec![first.status(), second.status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::BAD_REQUEST]);

    let loser = if first.status() == StatusCode::BAD_REQUEST {
        first
    } else {
        second
    };
    let body = read_json(loser).await;
    assert_eq!(body["details"], "usage_limit_reached");

    let coupon = CouponEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(coupon.used_count, 1);
    assert_eq!(
        CouponUsageEntity::find().count(&*app.state.db).await.unwrap(),
        1
    );
    assert_eq!(OrderEntity::find().count(&*app.state.db).await.unwrap(), 1);

    // The rejected placement rolled back its stock reservation
    let book = BookEntity::find_by_id(book.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(book.stock, 4);
}

#[tokio::test]
async fn redeem_refuses_once_the_cap_is_reached() {
    let app = TestApp::new().await;
    let coupon = app
        .seed_coupon("CAPPED", DiscountType::Percentage, dec!(5), |c| {
            c.max_uses = Some(1);
        })
        .await;
    let db = &*app.state.db;

    // Usage rows reference orders, so redeem against real ones
    let user = Uuid::new_v4();
    let book = app.seed_book("Devdas", dec!(100), 5).await;
    app.add_to_cart(user, book.id, 1).await;
    let placed = read_json(
        app.request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("Dhaka", "cod", None)),
            Some(user),
        )
        .await,
    )
    .await;
    assert_eq!(placed["success"], true);
    let order = OrderEntity::find().one(db).await.unwrap().unwrap();

    let first = coupons::redeem(db, coupon.id, user, order.id).await.unwrap();
    assert_eq!(first, Redemption::Recorded);

    let second = coupons::redeem(db, coupon.id, user, order.id).await;
    assert!(matches!(
        second,
        Err(ServiceError::CouponRejected(CouponRejection::UsageLimitReached))
    ));

    let missing = coupons::redeem(db, Uuid::new_v4(), user, order.id)
        .await
        .unwrap();
    assert_eq!(missing, Redemption::CouponMissing);
}

#[tokio::test]
async fn concurrent_redemptions_never_pass_the_cap() {
    const ATTEMPTS: usize = 6;
    let app = TestApp::with_config(|cfg| cfg.db_max_connections = 4).await;
    let coupon = app
        .seed_coupon("RUSHHOUR", DiscountType::Fixed, dec!(20), |c| {
            c.max_uses = Some(ATTEMPTS as i32 - 1);
        })
        .await;

    let user = Uuid::new_v4();
    let book = app.seed_book("Kobita Samagra", dec!(100), 5).await;
    app.add_to_cart(user, book.id, 1).await;
    let placed = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body("Dhaka", "cod", None)),
            Some(user),
        )
        .await;
    assert_eq!(placed.status(), StatusCode::CREATED);
    let order = OrderEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();

    let tasks = (0..ATTEMPTS).map(|_| {
        let db = app.state.db.clone();
        let (coupon_id, order_id) = (coupon.id, order.id);
        tokio::spawn(async move { coupons::redeem(&*db, coupon_id, Uuid::new_v4(), order_id).await })
    });
    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("redeem task panicked"))
        .collect();

    let recorded = results
        .iter()
        .filter(|r| matches!(r, Ok(Redemption::Recorded)))
        .count();
    let refused = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(ServiceError::CouponRejected(CouponRejection::UsageLimitReached))
            )
        })
        .count();
    assert_eq!((recorded, refused), (ATTEMPTS - 1, 1));

    let coupon = CouponEntity::find_by_id(coupon.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(coupon.used_count, ATTEMPTS as i32 - 1);
    assert_eq!(
        CouponUsageEntity::find().count(&*app.state.db).await.unwrap(),
        (ATTEMPTS - 1) as u64
    );
}
