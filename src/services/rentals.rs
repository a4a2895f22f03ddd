//! Book rentals.
//!
//! Policy values (deposit share, late fee, limits) come from [`RentalSettings`] handed
//! to the service at construction. Creating a rental takes one copy out of stock;
//! returning or cancelling puts it back.

use crate::{
    config::RentalSettings,
    db::{self, DbPool},
    entities::{
        book::{self, Entity as BookEntity},
        book_rental::{self, Entity as BookRentalEntity, RentalPaymentStatus, RentalStatus},
        rental_plan::{self, Entity as RentalPlanEntity},
        rental_status_history::{self, Entity as RentalStatusHistoryEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// `RNT{YYYYmmddHHMMSS}{6 digits}`
pub fn generate_rental_number() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("RNT{}{:06}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RentalPlanView {
    pub id: Uuid,
    pub name: String,
    pub days: i32,
    pub price_percentage: Decimal,
}

impl From<rental_plan::Model> for RentalPlanView {
    fn from(plan: rental_plan::Model) -> Self {
        Self {
            id: plan.id,
            name: plan.name,
            days: plan.days,
            price_percentage: plan.price_percentage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RentalQuote {
    pub days: i32,
    pub rental_price: Decimal,
    pub security_deposit: Decimal,
    pub total_amount: Decimal,
}

impl RentalQuote {
    pub fn compute(plan: &rental_plan::Model, book_price: Decimal, settings: &RentalSettings) -> Self {
        let rental_price = plan.rental_price(book_price);
        let security_deposit =
            (book_price * settings.security_deposit_percentage / Decimal::ONE_HUNDRED).round_dp(2);
        Self {
            days: plan.days,
            rental_price,
            security_deposit,
            total_amount: rental_price + security_deposit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateRentalRequest {
    pub book_id: Uuid,
    pub plan_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ActivateRentalRequest {
    #[validate(length(min = 1, max = 32))]
    pub payment_method: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct RenewRentalRequest {
    /// Defaults to the plan length
    #[validate(range(min = 1, max = 90))]
    pub days: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RentalHistoryEntry {
    pub status: RentalStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RentalResponse {
    pub id: Uuid,
    pub rental_number: String,
    pub book_id: Uuid,
    pub plan_id: Uuid,
    pub status: RentalStatus,
    pub payment_status: RentalPaymentStatus,
    pub payment_method: Option<String>,
    pub rental_price: Decimal,
    pub security_deposit: Decimal,
    pub total_amount: Decimal,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub return_date: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub due_soon: bool,
    pub late_days: i32,
    pub late_fee: Decimal,
    pub renewal_count: i32,
    pub can_renew: bool,
    pub history: Vec<RentalHistoryEntry>,
}

impl RentalResponse {
    fn build(
        rental: book_rental::Model,
        history: Vec<rental_status_history::Model>,
        settings: &RentalSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let days_remaining = match rental.status {
            RentalStatus::Active | RentalStatus::Overdue => rental.days_remaining(now),
            _ => None,
        };
        Self {
            due_soon: days_remaining
                .map(|d| d >= 0 && d <= i64::from(settings.due_soon_days))
                .unwrap_or(false),
            days_remaining,
            id: rental.id,
            rental_number: rental.rental_number,
            book_id: rental.book_id,
            plan_id: rental.plan_id,
            status: rental.status,
            payment_status: rental.payment_status,
            payment_method: rental.payment_method,
            rental_price: rental.rental_price,
            security_deposit: rental.security_deposit,
            total_amount: rental.total_amount,
            start_date: rental.start_date,
            due_date: rental.due_date,
            return_date: rental.return_date,
            late_days: rental.late_days,
            late_fee: rental.late_fee,
            renewal_count: rental.renewal_count,
            can_renew: rental.can_renew,
            history: history
                .into_iter()
                .map(|h| RentalHistoryEntry {
                    status: h.status,
                    notes: h.notes,
                    created_at: h.created_at,
                })
                .collect(),
        }
    }
}

/// What a renewal did, with the customer-facing message
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RenewalResult {
    pub rental: RentalResponse,
    pub message: String,
}

async fn record_history<C: ConnectionTrait>(
    conn: &C,
    rental_id: Uuid,
    status: RentalStatus,
    notes: impl Into<String>,
) -> Result<(), ServiceError> {
    rental_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        rental_id: Set(rental_id),
        status: Set(status),
        notes: Set(Some(notes.into())),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(())
}

async fn restock<C: ConnectionTrait>(conn: &C, book_id: Uuid) -> Result<(), ServiceError> {
    BookEntity::update_many()
        .col_expr(book::Column::Stock, Expr::col(book::Column::Stock).add(1))
        .filter(book::Column::Id.eq(book_id))
        .exec(conn)
        .await?;
    Ok(())
}

#[derive(Clone)]
pub struct RentalService {
    db: Arc<DbPool>,
    events: EventSender,
    settings: RentalSettings,
}

impl RentalService {
    pub fn new(db: Arc<DbPool>, events: EventSender, settings: RentalSettings) -> Self {
        Self {
            db,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> &RentalSettings {
        &self.settings
    }

    pub async fn list_plans(&self) -> Result<Vec<RentalPlanView>, ServiceError> {
        Ok(RentalPlanEntity::find()
            .filter(rental_plan::Column::IsActive.eq(true))
            .order_by_asc(rental_plan::Column::DisplayOrder)
            .order_by_asc(rental_plan::Column::Days)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn quote(&self, book_id: Uuid, plan_id: Uuid) -> Result<RentalQuote, ServiceError> {
        let book = self.find_book(book_id).await?;
        let plan = self.find_active_plan(plan_id).await?;
        Ok(RentalQuote::compute(&plan, book.final_price(), &self.settings))
    }

    /// Creates a pending rental and reserves one copy of the book
    #[instrument(skip(self, request), fields(book_id = %request.book_id))]
    pub async fn create(
        &self,
        user_id: Uuid,
        request: CreateRentalRequest,
    ) -> Result<RentalResponse, ServiceError> {
        let book = self.find_book(request.book_id).await?;
        let plan = self.find_active_plan(request.plan_id).await?;

        if !book.is_available || book.stock < self.settings.min_stock_for_rental {
            return Err(ServiceError::InsufficientStock(format!(
                "{} is not available for rent right now",
                book.title
            )));
        }

        let outstanding = BookRentalEntity::find()
            .filter(book_rental::Column::UserId.eq(user_id))
            .filter(book_rental::Column::Status.is_in([
                RentalStatus::Pending,
                RentalStatus::Active,
                RentalStatus::Overdue,
            ]))
            .count(&*self.db)
            .await?;
        let limit = self.settings.max_active_rentals_per_user;
        if outstanding >= u64::from(limit) {
            return Err(ServiceError::InvalidOperation(format!(
                "You have reached the maximum limit of {} active rentals.",
                limit
            )));
        }

        let quote = RentalQuote::compute(&plan, book.final_price(), &self.settings);
        let now = Utc::now();

        let txn = db::begin(&self.db).await?;
        let reserved = BookEntity::update_many()
            .col_expr(book::Column::Stock, Expr::col(book::Column::Stock).sub(1))
            .filter(book::Column::Id.eq(book.id))
            .filter(book::Column::Stock.gte(self.settings.min_stock_for_rental))
            .exec(&txn)
            .await?;
        if reserved.rows_affected == 0 {
            txn.rollback().await?;
            return Err(ServiceError::InsufficientStock(format!(
                "{} has insufficient stock",
                book.title
            )));
        }

        let rental = book_rental::ActiveModel {
            id: Set(Uuid::new_v4()),
            rental_number: Set(generate_rental_number()),
            user_id: Set(user_id),
            book_id: Set(book.id),
            plan_id: Set(plan.id),
            rental_price: Set(quote.rental_price),
            security_deposit: Set(quote.security_deposit),
            total_amount: Set(quote.total_amount),
            status: Set(RentalStatus::Pending),
            payment_status: Set(RentalPaymentStatus::Pending),
            payment_method: Set(None),
            start_date: Set(None),
            due_date: Set(None),
            return_date: Set(None),
            late_fee: Set(Decimal::ZERO),
            late_days: Set(0),
            renewal_count: Set(0),
            can_renew: Set(self.settings.max_renewals > 0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        record_history(&txn, rental.id, RentalStatus::Pending, "Rental created").await?;
        db::commit(txn).await?;

        counter!("bookstore_rentals.created", 1);
        info!(rental_number = %rental.rental_number, "Rental created");
        self.load_response(rental).await
    }

    pub async fn get(&self, user_id: Uuid, rental_number: &str) -> Result<RentalResponse, ServiceError> {
        let rental = self.owned_rental(user_id, rental_number).await?;
        self.load_response(rental).await
    }

    /// Starts the rental clock once the customer has chosen how to pay.
    ///
    /// Cash on delivery rentals stay unpaid until the cash is collected.
    #[instrument(skip(self, request))]
    pub async fn activate(
        &self,
        user_id: Uuid,
        rental_number: &str,
        request: ActivateRentalRequest,
    ) -> Result<RentalResponse, ServiceError> {
        request.validate()?;
        let rental = self.owned_rental(user_id, rental_number).await?;
        if rental.status != RentalStatus::Pending {
            return Err(ServiceError::InvalidStatus(format!(
                "rental is {}, only pending rentals can be activated",
                rental.status
            )));
        }
        let plan = RentalPlanEntity::find_by_id(rental.plan_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Rental plan not found".into()))?;

        let method = request.payment_method.trim().to_lowercase();
        let payment_status = if method == "cod" {
            RentalPaymentStatus::Pending
        } else {
            RentalPaymentStatus::Paid
        };
        let now = Utc::now();

        let txn = db::begin(&self.db).await?;
        let mut active: book_rental::ActiveModel = rental.into();
        active.status = Set(RentalStatus::Active);
        active.payment_status = Set(payment_status);
        active.payment_method = Set(Some(method.clone()));
        active.start_date = Set(Some(now));
        active.due_date = Set(Some(now + Duration::days(i64::from(plan.days))));
        active.updated_at = Set(now);
        let rental = active.update(&txn).await?;
        record_history(
            &txn,
            rental.id,
            RentalStatus::Active,
            format!("Rental activated - Payment via {}", method),
        )
        .await?;
        db::commit(txn).await?;

        counter!("bookstore_rentals.activated", 1);
        if self.settings.enable_notifications {
            self.events
                .send_or_log(Event::RentalConfirmed {
                    rental_id: rental.id,
                    rental_number: rental.rental_number.clone(),
                })
                .await;
        }
        self.load_response(rental).await
    }

    /// Extends an active rental; blocked once the renewal limit is reached
    #[instrument(skip(self, request))]
    pub async fn renew(
        &self,
        user_id: Uuid,
        rental_number: &str,
        request: RenewRentalRequest,
    ) -> Result<RenewalResult, ServiceError> {
        request.validate()?;
        let rental = self.owned_rental(user_id, rental_number).await?;
        if !rental.can_renew {
            return Err(ServiceError::InvalidOperation(
                "This rental cannot be renewed".into(),
            ));
        }
        if rental.status != RentalStatus::Active {
            return Err(ServiceError::InvalidOperation(
                "Only active rentals can be renewed".into(),
            ));
        }
        let Some(due) = rental.due_date else {
            return Err(ServiceError::InvalidOperation("Invalid renewal period".into()));
        };

        let days = match request.days {
            Some(days) => days,
            None => {
                RentalPlanEntity::find_by_id(rental.plan_id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound("Rental plan not found".into()))?
                    .days
            }
        };

        let renewal_count = rental.renewal_count + 1;
        let can_renew = renewal_count < self.settings.max_renewals as i32;

        let txn = db::begin(&self.db).await?;
        let mut active: book_rental::ActiveModel = rental.into();
        active.due_date = Set(Some(due + Duration::days(i64::from(days))));
        active.renewal_count = Set(renewal_count);
        active.can_renew = Set(can_renew);
        active.updated_at = Set(Utc::now());
        let rental = active.update(&txn).await?;
        let message = format!("Rental renewed for {} days", days);
        record_history(&txn, rental.id, RentalStatus::Active, message.clone()).await?;
        db::commit(txn).await?;

        counter!("bookstore_rentals.renewed", 1);
        Ok(RenewalResult {
            rental: self.load_response(rental).await?,
            message,
        })
    }

    /// Closes an active or overdue rental, charging late days
    #[instrument(skip(self))]
    pub async fn return_rental(
        &self,
        user_id: Uuid,
        rental_number: &str,
    ) -> Result<RentalResponse, ServiceError> {
        let rental = self.owned_rental(user_id, rental_number).await?;
        if !matches!(rental.status, RentalStatus::Active | RentalStatus::Overdue) {
            return Err(ServiceError::InvalidStatus(format!(
                "rental is {}, only active or overdue rentals can be returned",
                rental.status
            )));
        }

        let now = Utc::now();
        let late_days = rental.days_overdue(now);
        let late_fee = self.settings.daily_late_fee * Decimal::from(late_days);
        let book_id = rental.book_id;

        let txn = db::begin(&self.db).await?;
        let updated = BookRentalEntity::update_many()
            .set(book_rental::ActiveModel {
                status: Set(RentalStatus::Returned),
                return_date: Set(Some(now)),
                late_days: Set(late_days as i32),
                late_fee: Set(late_fee),
                can_renew: Set(false),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(book_rental::Column::Id.eq(rental.id))
            .filter(book_rental::Column::Status.eq(rental.status))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            txn.rollback().await?;
            return Err(ServiceError::Conflict(format!(
                "Rental {} was modified concurrently",
                rental.rental_number
            )));
        }
        restock(&txn, book_id).await?;
        let notes = if late_days > 0 {
            format!("Book returned {} day(s) late, late fee ৳{}", late_days, late_fee.normalize())
        } else {
            "Book returned".to_string()
        };
        record_history(&txn, rental.id, RentalStatus::Returned, notes).await?;
        db::commit(txn).await?;

        counter!("bookstore_rentals.returned", 1);
        self.load_by_id(rental.id).await
    }

    /// Cancels a rental that never started and releases the copy
    #[instrument(skip(self))]
    pub async fn cancel(&self, user_id: Uuid, rental_number: &str) -> Result<RentalResponse, ServiceError> {
        let rental = self.owned_rental(user_id, rental_number).await?;
        if rental.status != RentalStatus::Pending {
            return Err(ServiceError::InvalidOperation(
                "Only pending rentals can be cancelled".into(),
            ));
        }

        let txn = db::begin(&self.db).await?;
        let updated = BookRentalEntity::update_many()
            .set(book_rental::ActiveModel {
                status: Set(RentalStatus::Cancelled),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(book_rental::Column::Id.eq(rental.id))
            .filter(book_rental::Column::Status.eq(RentalStatus::Pending))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            txn.rollback().await?;
            return Err(ServiceError::Conflict(format!(
                "Rental {} was modified concurrently",
                rental.rental_number
            )));
        }
        restock(&txn, rental.book_id).await?;
        record_history(&txn, rental.id, RentalStatus::Cancelled, "Rental cancelled by customer").await?;
        db::commit(txn).await?;

        counter!("bookstore_rentals.cancelled", 1);
        self.load_by_id(rental.id).await
    }

    /// Moves active rentals past their due date to overdue and prices the late fee.
    ///
    /// Returns how many rentals changed status.
    #[instrument(skip(self))]
    pub async fn mark_overdue(&self, now: DateTime<Utc>) -> Result<usize, ServiceError> {
        let due = BookRentalEntity::find()
            .filter(book_rental::Column::Status.eq(RentalStatus::Active))
            .filter(book_rental::Column::DueDate.lt(now))
            .all(&*self.db)
            .await?;

        let mut updated = 0;
        for rental in due {
            let late_days = rental.days_overdue(now);
            let late_fee = self.settings.daily_late_fee * Decimal::from(late_days);

            let txn = db::begin(&self.db).await?;
            let result = BookRentalEntity::update_many()
                .set(book_rental::ActiveModel {
                    status: Set(RentalStatus::Overdue),
                    late_days: Set(late_days as i32),
                    late_fee: Set(late_fee),
                    updated_at: Set(now),
                    ..Default::default()
                })
                .filter(book_rental::Column::Id.eq(rental.id))
                .filter(book_rental::Column::Status.eq(RentalStatus::Active))
                .exec(&txn)
                .await?;
            if result.rows_affected == 0 {
                txn.rollback().await?;
                continue;
            }
            let due_date = rental
                .due_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            record_history(
                &txn,
                rental.id,
                RentalStatus::Overdue,
                format!("Rental became overdue. Due date was {}", due_date),
            )
            .await?;
            db::commit(txn).await?;
            updated += 1;

            if self.settings.enable_notifications {
                self.events
                    .send_or_log(Event::RentalOverdue {
                        rental_id: rental.id,
                        rental_number: rental.rental_number.clone(),
                        late_fee,
                    })
                    .await;
            }
        }

        if updated > 0 {
            warn!(count = updated, "Rentals marked overdue");
        }
        gauge!("bookstore_rentals.marked_overdue", updated as f64);
        Ok(updated)
    }

    async fn find_book(&self, book_id: Uuid) -> Result<book::Model, ServiceError> {
        BookEntity::find_by_id(book_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Book {} not found", book_id)))
    }

    async fn find_active_plan(&self, plan_id: Uuid) -> Result<rental_plan::Model, ServiceError> {
        RentalPlanEntity::find_by_id(plan_id)
            .filter(rental_plan::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Rental plan not found".into()))
    }

    async fn owned_rental(&self, user_id: Uuid, rental_number: &str) -> Result<book_rental::Model, ServiceError> {
        BookRentalEntity::find()
            .filter(book_rental::Column::RentalNumber.eq(rental_number.trim()))
            .filter(book_rental::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Rental {} not found", rental_number)))
    }

    async fn load_by_id(&self, rental_id: Uuid) -> Result<RentalResponse, ServiceError> {
        let rental = BookRentalEntity::find_by_id(rental_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Rental not found".into()))?;
        self.load_response(rental).await
    }

    async fn load_response(&self, rental: book_rental::Model) -> Result<RentalResponse, ServiceError> {
        let history = RentalStatusHistoryEntity::find()
            .filter(rental_status_history::Column::RentalId.eq(rental.id))
            .order_by_asc(rental_status_history::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(RentalResponse::build(rental, history, &self.settings, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn plan(days: i32, pct: Decimal) -> rental_plan::Model {
        rental_plan::Model {
            id: Uuid::new_v4(),
            name: format!("{} days", days),
            days,
            price_percentage: pct,
            is_active: true,
            display_order: 0,
        }
    }

    #[test]
    fn quote_adds_deposit_to_rental_price() {
        let settings = RentalSettings::default();
        let quote = RentalQuote::compute(&plan(14, dec!(15)), dec!(500), &settings);
        assert_eq!(quote.rental_price, dec!(75));
        assert_eq!(quote.security_deposit, dec!(100));
        assert_eq!(quote.total_amount, dec!(175));
        assert_eq!(quote.days, 14);
    }

    #[test]
    fn deposit_follows_injected_settings() {
        let settings = RentalSettings {
            security_deposit_percentage: dec!(50),
            ..Default::default()
        };
        let quote = RentalQuote::compute(&plan(7, dec!(10)), dec!(300), &settings);
        assert_eq!(quote.security_deposit, dec!(150));
        assert_eq!(quote.total_amount, dec!(180));
    }

    #[test]
    fn rental_numbers_have_fixed_shape() {
        let number = generate_rental_number();
        assert!(number.starts_with("RNT"));
        assert_eq!(number.len(), 3 + 14 + 6);
    }

    #[test]
    fn due_soon_window_uses_settings() {
        let now = Utc::now();
        let rental = book_rental::Model {
            id: Uuid::new_v4(),
            rental_number: "RNT20240101120000000001".into(),
            user_id: Uuid::new_v4(),
            book_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            rental_price: dec!(75),
            security_deposit: dec!(100),
            total_amount: dec!(175),
            status: RentalStatus::Active,
            payment_status: RentalPaymentStatus::Paid,
            payment_method: Some("bkash".into()),
            start_date: Some(now - Duration::days(12)),
            due_date: Some(now + Duration::days(2) + Duration::hours(1)),
            return_date: None,
            late_fee: Decimal::ZERO,
            late_days: 0,
            renewal_count: 0,
            can_renew: true,
            created_at: now,
            updated_at: now,
        };
        let settings = RentalSettings::default();
        let response = RentalResponse::build(rental.clone(), vec![], &settings, now);
        assert_eq!(response.days_remaining, Some(2));
        assert!(response.due_soon);

        let strict = RentalSettings {
            due_soon_days: 1,
            ..Default::default()
        };
        assert!(!RentalResponse::build(rental, vec![], &strict, now).due_soon);
    }
}
