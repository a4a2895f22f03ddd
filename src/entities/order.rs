use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Fulfilment status of an order; transitions live in `services::order_status`
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "cod")]
    Cod,
    #[sea_orm(string_value = "bkash")]
    Bkash,
    #[sea_orm(string_value = "nagad")]
    Nagad,
    #[sea_orm(string_value = "rocket")]
    Rocket,
    #[sea_orm(string_value = "sslcommerz")]
    Sslcommerz,
}

impl PaymentMethod {
    /// Cash on delivery needs no gateway round-trip
    pub fn is_cash_on_delivery(self) -> bool {
        matches!(self, PaymentMethod::Cod)
    }

    /// Prefix of gateway transaction ids, `None` for cash on delivery
    pub fn transaction_prefix(self) -> Option<&'static str> {
        match self {
            PaymentMethod::Cod => None,
            PaymentMethod::Bkash => Some("BKASH"),
            PaymentMethod::Nagad => Some("NAGAD"),
            PaymentMethod::Rocket => Some("ROCKET"),
            PaymentMethod::Sslcommerz => Some("SSL"),
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            PaymentMethod::Cod => "Cash on Delivery",
            PaymentMethod::Bkash => "bKash",
            PaymentMethod::Nagad => "Nagad",
            PaymentMethod::Rocket => "Rocket",
            PaymentMethod::Sslcommerz => "SSLCommerz",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub user_id: Uuid,

    // Shipping address snapshot
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,

    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,

    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub coupon_code: Option<String>,
    pub customer_notes: Option<String>,

    pub is_gift: bool,
    pub gift_from_name: Option<String>,
    pub gift_from_phone: Option<String>,
    pub gift_message: Option<String>,
    pub gift_deliver_date: Option<NaiveDate>,
    pub gift_occasion: Option<String>,

    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn can_be_cancelled(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    /// A gateway payment can be retried while nothing has been collected
    pub fn awaiting_payment(&self) -> bool {
        self.status == OrderStatus::Pending
            && !self.payment_method.is_cash_on_delivery()
            && self.payment_status != PaymentStatus::Paid
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_many = "super::order_status_history::Entity")]
    StatusHistory,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::order_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
