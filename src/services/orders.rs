use crate::{
    db::{self, DbPool},
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus, PaymentMethod, PaymentStatus},
        order_item::{self, Entity as OrderItemEntity},
        order_status_history::{self, Entity as OrderStatusHistoryEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        order_status,
        payments::{PaymentService, PaymentStep},
    },
};
use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub book_id: Option<Uuid>,
    pub title: String,
    pub author: String,
    pub isbn: Option<String>,
    pub quantity: i32,
    pub price: Decimal,
    pub subtotal: Decimal,
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(item: order_item::Model) -> Self {
        Self {
            book_id: item.book_id,
            title: item.book_title,
            author: item.book_author,
            isbn: item.book_isbn,
            quantity: item.quantity,
            price: item.price,
            subtotal: item.subtotal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusHistoryEntry {
    pub status: OrderStatus,
    pub notes: Option<String>,
    pub changed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<order_status_history::Model> for StatusHistoryEntry {
    fn from(row: order_status_history::Model) -> Self {
        Self {
            status: row.status,
            notes: row.notes,
            changed_by: row.changed_by,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GiftInfo {
    pub from_name: Option<String>,
    pub message: Option<String>,
    pub deliver_date: Option<NaiveDate>,
    pub occasion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub full_name: String,
    pub phone: String,
    pub city: String,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub coupon_code: Option<String>,
    pub gift: Option<GiftInfo>,
    pub tracking_number: Option<String>,
    pub can_cancel: bool,
    pub can_retry_payment: bool,
    pub items: Vec<OrderItemResponse>,
    pub history: Vec<StatusHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OrderResponse {
    fn build(
        order: order::Model,
        items: Vec<order_item::Model>,
        history: Vec<order_status_history::Model>,
    ) -> Self {
        let gift = order.is_gift.then(|| GiftInfo {
            from_name: order.gift_from_name.clone(),
            message: order.gift_message.clone(),
            deliver_date: order.gift_deliver_date,
            occasion: order.gift_occasion.clone(),
        });
        Self {
            can_cancel: order.can_be_cancelled(),
            can_retry_payment: order.awaiting_payment(),
            id: order.id,
            order_number: order.order_number,
            status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method,
            transaction_id: order.transaction_id,
            full_name: order.full_name,
            phone: order.phone,
            city: order.city,
            subtotal: order.subtotal,
            shipping_cost: order.shipping_cost,
            discount: order.discount,
            total: order.total,
            coupon_code: order.coupon_code,
            gift,
            tracking_number: order.tracking_number,
            items: items.into_iter().map(Into::into).collect(),
            history: history.into_iter().map(Into::into).collect(),
            created_at: order.created_at,
            confirmed_at: order.confirmed_at,
            shipped_at: order.shipped_at,
            delivered_at: order.delivered_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct TrackOrderRequest {
    #[validate(length(min = 1, max = 50))]
    pub order_number: String,
    #[validate(length(min = 1, max = 20))]
    pub phone: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct CancelOrderRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub tracking_number: Option<String>,
    #[validate(length(max = 100))]
    pub changed_by: Option<String>,
}

/// Customer and back-office operations on placed orders
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    payments: PaymentService,
    events: EventSender,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, payments: PaymentService, events: EventSender) -> Self {
        Self {
            db,
            payments,
            events,
        }
    }

    /// An order as seen by the customer who placed it
    #[instrument(skip(self))]
    pub async fn get_for_user(
        &self,
        user_id: Uuid,
        order_number: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.owned_order(user_id, order_number).await?;
        self.load_response(order).await
    }

    /// Guest lookup; the phone number on the order acts as the secret
    #[instrument(skip(self, request), fields(order_number = %request.order_number))]
    pub async fn track(&self, request: TrackOrderRequest) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        let order = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(request.order_number.trim()))
            .filter(order::Column::Phone.eq(request.phone.trim()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(
                    "Order not found. Please check your order number and phone.".into(),
                )
            })?;
        self.load_response(order).await
    }

    /// Cancels a pending or confirmed order and returns its books to stock
    #[instrument(skip(self, request))]
    pub async fn cancel(
        &self,
        user_id: Uuid,
        order_number: &str,
        request: CancelOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        let order = self.owned_order(user_id, order_number).await?;
        if !order.can_be_cancelled() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} can no longer be cancelled",
                order.order_number
            )));
        }

        let notes = match request.reason.as_deref().map(str::trim) {
            Some(reason) if !reason.is_empty() => format!("Cancelled by customer: {}", reason),
            _ => "Cancelled by customer".to_string(),
        };

        let txn = db::begin(&self.db).await?;
        let cancelled = order_status::apply_transition(
            &txn,
            &order,
            OrderStatus::Cancelled,
            notes,
            Some(user_id.to_string()),
        )
        .await?;
        db::commit(txn).await?;

        counter!("bookstore_orders.cancelled", 1);
        if order.payment_status == PaymentStatus::Paid {
            warn!(order_number = %order.order_number, "Paid order cancelled; refund required");
        }
        self.events
            .send_or_log(Event::OrderCancelled {
                order_id: cancelled.id,
                order_number: cancelled.order_number.clone(),
            })
            .await;

        self.load_response(cancelled).await
    }

    /// Back-office status change along the order lifecycle
    #[instrument(skip(self, request), fields(to = %request.status))]
    pub async fn update_status(
        &self,
        order_number: &str,
        request: UpdateOrderStatusRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        let order = self.find_by_number(order_number).await?;
        let old_status = order.status;

        let notes = request
            .notes
            .clone()
            .unwrap_or_else(|| format!("Status changed to {}", request.status));

        let txn = db::begin(&self.db).await?;
        let mut updated = order_status::apply_transition(
            &txn,
            &order,
            request.status,
            notes,
            request.changed_by.clone(),
        )
        .await?;
        if let Some(tracking) = &request.tracking_number {
            let mut active: order::ActiveModel = updated.into();
            active.tracking_number = Set(Some(tracking.trim().to_string()));
            active.updated_at = Set(Utc::now());
            updated = active.update(&txn).await?;
        }
        db::commit(txn).await?;

        self.events
            .send_or_log(Event::OrderStatusChanged {
                order_id: updated.id,
                order_number: updated.order_number.clone(),
                old_status,
                new_status: updated.status,
            })
            .await;
        if updated.status == OrderStatus::Cancelled {
            self.events
                .send_or_log(Event::OrderCancelled {
                    order_id: updated.id,
                    order_number: updated.order_number.clone(),
                })
                .await;
        }

        self.load_response(updated).await
    }

    /// Starts a fresh gateway payment for an order that was never paid
    #[instrument(skip(self))]
    pub async fn retry_payment(
        &self,
        user_id: Uuid,
        order_number: &str,
    ) -> Result<PaymentStep, ServiceError> {
        let order = self.owned_order(user_id, order_number).await?;
        if !order.awaiting_payment() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is not awaiting payment",
                order.order_number
            )));
        }
        info!(order_number = %order.order_number, "Retrying payment");
        counter!("bookstore_payments.retried", 1);
        self.payments.initiate(&order).await
    }

    async fn find_by_number(&self, order_number: &str) -> Result<order::Model, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number.trim()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))
    }

    async fn owned_order(&self, user_id: Uuid, order_number: &str) -> Result<order::Model, ServiceError> {
        let order = self.find_by_number(order_number).await?;
        // Someone else's order is reported exactly like a missing one
        if order.user_id != user_id {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_number)));
        }
        Ok(order)
    }

    async fn load_response(&self, order: order::Model) -> Result<OrderResponse, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;
        let history = OrderStatusHistoryEntity::find()
            .filter(order_status_history::Column::OrderId.eq(order.id))
            .order_by_asc(order_status_history::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(OrderResponse::build(order, items, history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(status: OrderStatus, method: PaymentMethod) -> order::Model {
        let now = Utc::now();
        order::Model {
            id: Uuid::new_v4(),
            order_number: "BS20240101120000123456".into(),
            user_id: Uuid::new_v4(),
            full_name: "Rahim Uddin".into(),
            phone: "01712345678".into(),
            email: None,
            address_line1: "House 12".into(),
            address_line2: None,
            city: "Dhaka".into(),
            state: "Dhaka".into(),
            postal_code: "1207".into(),
            country: "Bangladesh".into(),
            status,
            payment_status: PaymentStatus::Pending,
            payment_method: method,
            transaction_id: None,
            subtotal: dec!(900),
            shipping_cost: dec!(60),
            discount: dec!(0),
            total: dec!(960),
            coupon_code: None,
            customer_notes: None,
            is_gift: true,
            gift_from_name: Some("Karim".into()),
            gift_from_phone: None,
            gift_message: Some("Happy birthday".into()),
            gift_deliver_date: None,
            gift_occasion: Some("birthday".into()),
            tracking_number: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            shipped_at: None,
            delivered_at: None,
        }
    }

    #[test]
    fn response_exposes_actions_and_gift() {
        let response = OrderResponse::build(order(OrderStatus::Pending, PaymentMethod::Bkash), vec![], vec![]);
        assert!(response.can_cancel);
        assert!(response.can_retry_payment);
        assert_eq!(
            response.gift.and_then(|g| g.message).as_deref(),
            Some("Happy birthday")
        );
    }

    #[test]
    fn cod_orders_never_offer_payment_retry() {
        let response = OrderResponse::build(order(OrderStatus::Pending, PaymentMethod::Cod), vec![], vec![]);
        assert!(!response.can_retry_payment);
        let shipped = OrderResponse::build(order(OrderStatus::Shipped, PaymentMethod::Bkash), vec![], vec![]);
        assert!(!shipped.can_cancel);
        assert!(!shipped.can_retry_payment);
    }
}
