use crate::{
    db::DbPool,
    entities::{
        book::{self, Entity as BookEntity},
        cart_item::{self, Entity as CartItemEntity},
    },
    errors::ServiceError,
    services::pricing::PricingAggregator,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddToCartRequest {
    pub book_id: Uuid,
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateCartLineRequest {
    /// Zero removes the line
    #[validate(range(min = 0, max = 100))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLineView {
    pub id: Uuid,
    pub book_id: Uuid,
    pub title: String,
    pub author: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub in_stock: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub lines: Vec<CartLineView>,
    pub item_count: i32,
    pub subtotal: Decimal,
}

/// Cart lines joined with their books, oldest first.
///
/// Lines whose book has been removed come back with `None`.
pub async fn lines_with_books<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Vec<(cart_item::Model, Option<book::Model>)>, ServiceError> {
    Ok(CartItemEntity::find()
        .filter(cart_item::Column::UserId.eq(user_id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .find_also_related(BookEntity)
        .all(conn)
        .await?)
}

/// Customer carts: one line per (customer, book)
#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
}

impl CartService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn view(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let rows = lines_with_books(&*self.db, user_id).await?;

        let lines: Vec<CartLineView> = rows
            .into_iter()
            .filter_map(|(line, book)| {
                book.map(|book| CartLineView {
                    id: line.id,
                    book_id: book.id,
                    in_stock: book.is_available && book.stock >= line.quantity,
                    title: book.title,
                    author: book.author,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    line_total: line.line_total(),
                })
            })
            .collect();

        let subtotal = PricingAggregator::subtotal(lines.iter().map(|l| (l.unit_price, l.quantity)));
        Ok(CartView {
            item_count: lines.iter().map(|l| l.quantity).sum(),
            subtotal,
            lines,
        })
    }

    /// Cart subtotal, used by coupon previews
    pub async fn subtotal(&self, user_id: Uuid) -> Result<Decimal, ServiceError> {
        Ok(self.view(user_id).await?.subtotal)
    }

    /// Adds a book, merging with an existing line for the same book
    #[instrument(skip(self, request), fields(book_id = %request.book_id))]
    pub async fn add(
        &self,
        user_id: Uuid,
        request: AddToCartRequest,
    ) -> Result<cart_item::Model, ServiceError> {
        request.validate()?;

        let book = self.available_book(request.book_id).await?;
        let existing = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::BookId.eq(book.id))
            .one(&*self.db)
            .await?;

        let now = Utc::now();
        let line = match existing {
            Some(line) => {
                let quantity = line.quantity + request.quantity;
                ensure_stock(&book, quantity)?;
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(quantity);
                active.unit_price = Set(book.final_price());
                active.updated_at = Set(now);
                active.update(&*self.db).await?
            }
            None => {
                ensure_stock(&book, request.quantity)?;
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    book_id: Set(book.id),
                    quantity: Set(request.quantity),
                    unit_price: Set(book.final_price()),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db)
                .await?
            }
        };

        info!(cart_line = %line.id, quantity = line.quantity, "Cart line saved");
        Ok(line)
    }

    /// Sets a line's quantity; zero removes it
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        line_id: Uuid,
        request: UpdateCartLineRequest,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        request.validate()?;
        let line = self.owned_line(user_id, line_id).await?;

        if request.quantity == 0 {
            CartItemEntity::delete_by_id(line.id).exec(&*self.db).await?;
            return Ok(None);
        }

        let book = self.available_book(line.book_id).await?;
        ensure_stock(&book, request.quantity)?;

        let mut active: cart_item::ActiveModel = line.into();
        active.quantity = Set(request.quantity);
        active.unit_price = Set(book.final_price());
        active.updated_at = Set(Utc::now());
        Ok(Some(active.update(&*self.db).await?))
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, user_id: Uuid, line_id: Uuid) -> Result<(), ServiceError> {
        let line = self.owned_line(user_id, line_id).await?;
        CartItemEntity::delete_by_id(line.id).exec(&*self.db).await?;
        Ok(())
    }

    async fn owned_line(&self, user_id: Uuid, line_id: Uuid) -> Result<cart_item::Model, ServiceError> {
        CartItemEntity::find_by_id(line_id)
            .filter(cart_item::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart line {} not found", line_id)))
    }

    async fn available_book(&self, book_id: Uuid) -> Result<book::Model, ServiceError> {
        let book = BookEntity::find_by_id(book_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Book {} not found", book_id)))?;
        if !book.is_available {
            return Err(ServiceError::InvalidOperation(format!(
                "{} is not available",
                book.title
            )));
        }
        Ok(book)
    }
}

fn ensure_stock(book: &book::Model, quantity: i32) -> Result<(), ServiceError> {
    if quantity > book.stock {
        return Err(ServiceError::InsufficientStock(format!(
            "{} has insufficient stock",
            book.title
        )));
    }
    Ok(())
}
