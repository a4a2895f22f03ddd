use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

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
pub enum RentalStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "returned")]
    Returned,
    #[sea_orm(string_value = "overdue")]
    Overdue,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
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
pub enum RentalPaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "book_rentals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub rental_number: String,
    pub user_id: Uuid,
    pub book_id: Uuid,
    pub plan_id: Uuid,
    pub rental_price: Decimal,
    pub security_deposit: Decimal,
    pub total_amount: Decimal,
    pub status: RentalStatus,
    pub payment_status: RentalPaymentStatus,
    pub payment_method: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub return_date: Option<DateTime<Utc>>,
    pub late_fee: Decimal,
    pub late_days: i32,
    pub renewal_count: i32,
    pub can_renew: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Whole days past the due date at `now`, zero when not late
    pub fn days_overdue(&self, now: DateTime<Utc>) -> i64 {
        match self.due_date {
            Some(due) if now > due => (now - due).num_days(),
            _ => 0,
        }
    }

    /// Whole days until the due date, negative once overdue
    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.due_date.map(|due| (due - now).num_days())
    }

    /// Books still out with the customer
    pub fn is_outstanding(&self) -> bool {
        matches!(
            self.status,
            RentalStatus::Pending | RentalStatus::Active | RentalStatus::Overdue
        )
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::book::Entity",
        from = "Column::BookId",
        to = "super::book::Column::Id"
    )]
    Book,
    #[sea_orm(
        belongs_to = "super::rental_plan::Entity",
        from = "Column::PlanId",
        to = "super::rental_plan::Column::Id"
    )]
    Plan,
    #[sea_orm(has_many = "super::rental_status_history::Entity")]
    StatusHistory,
}

impl Related<super::book::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Book.def()
    }
}

impl Related<super::rental_plan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Plan.def()
    }
}

impl Related<super::rental_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
