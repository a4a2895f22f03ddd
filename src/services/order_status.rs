//! Order lifecycle state machine.
//!
//! Every status change in the crate goes through [`apply_transition`], which checks
//! [`can_transition`] and performs a conditional update so concurrent writers cannot
//! both move the same order.

use crate::{
    entities::{
        book::{self, Entity as BookEntity},
        order::{self, Entity as OrderEntity, OrderStatus},
        order_item::{self, Entity as OrderItemEntity},
        order_status_history,
    },
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    Set,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Statuses reachable from `from` in one step
pub fn allowed_next(from: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match from {
        Pending => &[Confirmed, Cancelled],
        Confirmed => &[Processing, Cancelled],
        Processing => &[Shipped],
        Shipped => &[Delivered],
        Delivered => &[Refunded],
        Cancelled => &[Refunded],
        Refunded => &[],
    }
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_next(from).contains(&to)
}

pub fn ensure_transition(from: OrderStatus, to: OrderStatus) -> Result<(), ServiceError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(ServiceError::InvalidStatus(format!(
            "cannot move order from {} to {}",
            from, to
        )))
    }
}

/// Appends a row to the order's status history
pub async fn record_history<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    status: OrderStatus,
    notes: impl Into<String>,
    changed_by: Option<String>,
) -> Result<(), ServiceError> {
    order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        status: Set(status),
        notes: Set(Some(notes.into())),
        changed_by: Set(changed_by),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(())
}

/// Moves `order` to `to`, stamping lifecycle timestamps and writing history.
///
/// Cancelling returns the ordered quantities to stock. Returns the updated order;
/// fails with `Conflict` if another writer changed the status first.
pub async fn apply_transition<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
    to: OrderStatus,
    notes: impl Into<String>,
    changed_by: Option<String>,
) -> Result<order::Model, ServiceError> {
    ensure_transition(order.status, to)?;

    let now = Utc::now();
    let mut changes = order::ActiveModel {
        status: Set(to),
        updated_at: Set(now),
        ..Default::default()
    };
    match to {
        OrderStatus::Confirmed => changes.confirmed_at = Set(Some(now)),
        OrderStatus::Shipped => changes.shipped_at = Set(Some(now)),
        OrderStatus::Delivered => changes.delivered_at = Set(Some(now)),
        _ => {}
    }

    let result = OrderEntity::update_many()
        .set(changes)
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::Status.eq(order.status))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        warn!(order_number = %order.order_number, "Order status changed concurrently");
        return Err(ServiceError::Conflict(format!(
            "Order {} was modified concurrently",
            order.order_number
        )));
    }

    if to == OrderStatus::Cancelled {
        restore_stock(conn, order.id).await?;
    }

    record_history(conn, order.id, to, notes, changed_by).await?;

    info!(
        order_number = %order.order_number,
        from = %order.status,
        to = %to,
        "Order status changed"
    );

    OrderEntity::find_by_id(order.id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.order_number)))
}

async fn restore_stock<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> Result<(), ServiceError> {
    let items = OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(conn)
        .await?;

    for item in items {
        // Books deleted from the catalog keep their snapshot but have nothing to restock
        let Some(book_id) = item.book_id else { continue };
        BookEntity::update_many()
            .col_expr(
                book::Column::Stock,
                Expr::col(book::Column::Stock).add(item.quantity),
            )
            .col_expr(
                book::Column::Sales,
                Expr::col(book::Column::Sales).sub(item.quantity),
            )
            .filter(book::Column::Id.eq(book_id))
            .exec(conn)
            .await?;
    }
    Ok(())
}
