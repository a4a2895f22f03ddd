use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "books")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub isbn: Option<String>,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    pub stock: i32,
    pub sales: i32,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Price a customer pays today
    pub fn final_price(&self) -> Decimal {
        self.discount_price.unwrap_or(self.price)
    }

    pub fn in_stock(&self) -> bool {
        self.is_available && self.stock > 0
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
    #[sea_orm(has_many = "super::book_rental::Entity")]
    Rentals,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl Related<super::book_rental::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rentals.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
