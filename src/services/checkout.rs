//! Order placement: turns a customer's cart into a persisted order.
//!
//! Stock decrements, order rows, coupon redemption, the placement history entry and
//! cart clean-up share one transaction. Gateway payments are started only after that
//! transaction commits.

use crate::{
    db::{self, DbPool},
    entities::{
        book::{self, Entity as BookEntity},
        cart_item::{self, Entity as CartItemEntity},
        order::{self, OrderStatus, PaymentMethod, PaymentStatus},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart,
        coupons::{self, DiscountCalculator, Redemption},
        order_status,
        payments::{PaymentService, PaymentStep},
        pricing::{PriceBreakdown, PricingAggregator},
        shipping_fees::ShippingFeeResolver,
    },
};
use chrono::{NaiveDate, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, sync::Arc};
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub const PAYMENT_INIT_FAILED: &str = "Payment initialization failed. Please try again.";

static BD_MOBILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^01[3-9]\d{8}$").unwrap());

fn validate_bd_mobile(phone: &str) -> Result<(), ValidationError> {
    if BD_MOBILE.is_match(phone.trim()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("phone");
        err.message = Some("Enter a valid Bangladeshi mobile number (01XXXXXXXXX)".into());
        Err(err)
    }
}

fn default_country() -> String {
    "Bangladesh".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 100))]
    pub full_name: String,
    #[validate(custom = "validate_bd_mobile")]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub address_line1: String,
    pub address_line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    #[serde(default = "default_country")]
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct GiftDetails {
    #[validate(length(max = 100))]
    pub from_name: Option<String>,
    pub from_phone: Option<String>,
    #[validate(length(max = 500))]
    pub message: Option<String>,
    pub deliver_date: Option<NaiveDate>,
    #[validate(length(max = 50))]
    pub occasion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate]
    pub shipping: ShippingAddress,
    /// One of cod, bkash, nagad, rocket, sslcommerz
    pub payment_method: String,
    pub coupon_code: Option<String>,
    #[validate(length(max = 1000))]
    pub customer_notes: Option<String>,
    #[validate]
    pub gift: Option<GiftDetails>,
}

/// Progress of a single checkout attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckoutStage {
    Draft,
    Validating,
    Persisted,
    PaymentPending,
    Confirmed,
    Failed,
}

impl CheckoutStage {
    pub fn can_advance_to(self, next: CheckoutStage) -> bool {
        use CheckoutStage::*;
        matches!(
            (self, next),
            (Draft, Validating)
                | (Validating, Persisted)
                | (Persisted, PaymentPending)
                | (Persisted, Confirmed)
                | (PaymentPending, Confirmed)
                | (PaymentPending, Failed)
        )
    }

    /// Moves to `next`; an illegal move is a bug in the caller
    pub fn advance(self, next: CheckoutStage) -> Result<CheckoutStage, ServiceError> {
        if !self.can_advance_to(next) {
            error!(from = %self, to = %next, "Illegal checkout stage transition");
            return Err(ServiceError::InternalError(format!(
                "illegal checkout stage transition {} -> {}",
                self, next
            )));
        }
        debug!(from = %self, to = %next, "Checkout stage");
        Ok(next)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlacementResult {
    pub order_id: Uuid,
    pub order_number: String,
    pub stage: CheckoutStage,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub pricing: PriceBreakdown,
    pub payment: Option<PaymentStep>,
    pub message: String,
    /// Set when the order exists but payment could not be started
    pub warning: Option<String>,
}

/// `BS{YYYYmmddHHMMSS}{6 digits}`
pub fn generate_order_number() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("BS{}{:06}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

#[derive(Clone)]
pub struct OrderPlacementService {
    db: Arc<DbPool>,
    shipping: ShippingFeeResolver,
    payments: PaymentService,
    events: EventSender,
}

impl OrderPlacementService {
    pub fn new(
        db: Arc<DbPool>,
        shipping: ShippingFeeResolver,
        payments: PaymentService,
        events: EventSender,
    ) -> Self {
        Self {
            db,
            shipping,
            payments,
            events,
        }
    }

    /// Places an order from the customer's cart
    #[instrument(skip(self, request), fields(user_id = %user_id, method = %request.payment_method))]
    pub async fn place_order(
        &self,
        user_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<PlacementResult, ServiceError> {
        let stage = CheckoutStage::Draft;
        let rows = cart::lines_with_books(&*self.db, user_id).await?;
        if rows.is_empty() {
            return Err(ServiceError::ValidationError("cart is empty".into()));
        }

        let stage = stage.advance(CheckoutStage::Validating)?;
        request.validate()?;
        let method = PaymentMethod::from_str(&request.payment_method.trim().to_lowercase())
            .map_err(|_| {
                ServiceError::ValidationError(format!(
                    "unsupported payment method: {}",
                    request.payment_method
                ))
            })?;

        let mut lines: Vec<(cart_item::Model, book::Model)> = Vec::with_capacity(rows.len());
        for (line, book) in rows {
            let book = book.ok_or_else(|| {
                ServiceError::ValidationError("a book in your cart is no longer available".into())
            })?;
            if !book.is_available || line.quantity > book.stock {
                return Err(ServiceError::InsufficientStock(format!(
                    "{} has insufficient stock",
                    book.title
                )));
            }
            lines.push((line, book));
        }

        let subtotal = PricingAggregator::subtotal(lines.iter().map(|(l, _)| (l.unit_price, l.quantity)));

        let coupon = match request
            .coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            Some(code) => Some(coupons::validate_on(&*self.db, code, Some(user_id), subtotal).await?),
            None => None,
        };
        let discount = coupon
            .as_ref()
            .map(|c| DiscountCalculator::calculate(c, subtotal))
            .unwrap_or(Decimal::ZERO);

        let shipping_cost = self.shipping.resolve(Some(&request.shipping.city)).await?;
        let pricing = PricingAggregator::aggregate(subtotal, shipping_cost, discount);

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_number = generate_order_number();
        let address = &request.shipping;
        let gift = request.gift.clone();

        let txn = db::begin(&self.db).await?;

        let mut order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            user_id: Set(user_id),
            full_name: Set(address.full_name.trim().to_string()),
            phone: Set(address.phone.trim().to_string()),
            email: Set(address.email.clone()),
            address_line1: Set(address.address_line1.clone()),
            address_line2: Set(address.address_line2.clone()),
            city: Set(address.city.trim().to_string()),
            state: Set(address.state.clone()),
            postal_code: Set(address.postal_code.clone()),
            country: Set(address.country.clone()),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            payment_method: Set(method),
            transaction_id: Set(None),
            subtotal: Set(pricing.subtotal),
            shipping_cost: Set(pricing.shipping_cost),
            discount: Set(pricing.discount),
            total: Set(pricing.total),
            coupon_code: Set(coupon.as_ref().map(|c| c.code.clone())),
            customer_notes: Set(request.customer_notes.clone()),
            is_gift: Set(gift.is_some()),
            gift_from_name: Set(gift.as_ref().and_then(|g| g.from_name.clone())),
            gift_from_phone: Set(gift.as_ref().and_then(|g| g.from_phone.clone())),
            gift_message: Set(gift.as_ref().and_then(|g| g.message.clone())),
            gift_deliver_date: Set(gift.as_ref().and_then(|g| g.deliver_date)),
            gift_occasion: Set(gift.as_ref().and_then(|g| g.occasion.clone())),
            tracking_number: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            confirmed_at: Set(None),
            shipped_at: Set(None),
            delivered_at: Set(None),
        }
        .insert(&txn)
        .await?;

        for (line, book) in &lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                book_id: Set(Some(book.id)),
                book_title: Set(book.title.clone()),
                book_author: Set(book.author.clone()),
                book_isbn: Set(book.isbn.clone()),
                quantity: Set(line.quantity),
                price: Set(line.unit_price),
                subtotal: Set(line.line_total()),
            }
            .insert(&txn)
            .await?;

            let decremented = BookEntity::update_many()
                .col_expr(
                    book::Column::Stock,
                    Expr::col(book::Column::Stock).sub(line.quantity),
                )
                .col_expr(
                    book::Column::Sales,
                    Expr::col(book::Column::Sales).add(line.quantity),
                )
                .filter(book::Column::Id.eq(book.id))
                .filter(book::Column::Stock.gte(line.quantity))
                .exec(&txn)
                .await?;
            if decremented.rows_affected == 0 {
                txn.rollback().await?;
                counter!("bookstore_orders.stock_race_lost", 1);
                return Err(ServiceError::InsufficientStock(format!(
                    "{} has insufficient stock",
                    book.title
                )));
            }
        }

        if let Some(coupon) = &coupon {
            if coupons::redeem(&txn, coupon.id, user_id, order_id).await? == Redemption::CouponMissing {
                warn!(%order_number, code = %coupon.code, "Order keeps discount of a vanished coupon");
            }
        }

        order_status::record_history(&txn, order_id, OrderStatus::Pending, "Order placed", None)
            .await?;

        let line_ids: Vec<Uuid> = lines.iter().map(|(l, _)| l.id).collect();
        CartItemEntity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::Id.is_in(line_ids))
            .exec(&txn)
            .await?;

        if method.is_cash_on_delivery() {
            order = order_status::apply_transition(
                &txn,
                &order,
                OrderStatus::Confirmed,
                "Cash on delivery order confirmed",
                None,
            )
            .await?;
        }

        db::commit(txn).await?;
        let stage = stage.advance(CheckoutStage::Persisted)?;

        counter!("bookstore_orders.placed", 1);
        info!(%order_number, total = %pricing.total, "Order placed");

        self.events
            .send_or_log(Event::OrderPlaced {
                order_id,
                order_number: order_number.clone(),
                payment_method: method,
                total: pricing.total,
            })
            .await;
        if let Some(coupon) = &coupon {
            self.events
                .send_or_log(Event::CouponRedeemed {
                    coupon_id: coupon.id,
                    order_id,
                })
                .await;
        }

        if method.is_cash_on_delivery() {
            let stage = stage.advance(CheckoutStage::Confirmed)?;
            self.events
                .send_or_log(Event::OrderConfirmed {
                    order_id,
                    order_number: order_number.clone(),
                })
                .await;
            return Ok(PlacementResult {
                order_id,
                order_number,
                stage,
                status: order.status,
                payment_method: method,
                pricing,
                payment: Some(PaymentStep::CashOnDelivery),
                message: "Order placed successfully!".to_string(),
                warning: None,
            });
        }

        let stage = stage.advance(CheckoutStage::PaymentPending)?;
        let (payment, message, warning) = match self.payments.initiate(&order).await {
            Ok(step) => (
                Some(step),
                format!(
                    "Order placed. Complete your {} payment to confirm it.",
                    method.display_name()
                ),
                None,
            ),
            Err(e) => {
                warn!(%order_number, error = %e, "Order left pending after gateway failure");
                (
                    None,
                    "Order placed.".to_string(),
                    Some(PAYMENT_INIT_FAILED.to_string()),
                )
            }
        };

        Ok(PlacementResult {
            order_id,
            order_number,
            stage,
            status: order.status,
            payment_method: method,
            pricing,
            payment,
            message,
            warning,
        })
    }
}
