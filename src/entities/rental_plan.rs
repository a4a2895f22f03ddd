use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rental_plans")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub days: i32,
    /// Share of the book price charged for the rental, 0..=100
    pub price_percentage: Decimal,
    pub is_active: bool,
    pub display_order: i32,
}

impl Model {
    pub fn rental_price(&self, book_price: Decimal) -> Decimal {
        (book_price * self.price_percentage / Decimal::ONE_HUNDRED).round_dp(2)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::book_rental::Entity")]
    Rentals,
}

impl Related<super::book_rental::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rentals.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
