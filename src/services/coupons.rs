use crate::{
    db::DbPool,
    entities::{
        coupon::{self, DiscountType, Entity as CouponEntity},
        coupon_usage::{self, Entity as CouponUsageEntity},
    },
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Why a coupon cannot be used. Variants are ordered the way the rules are checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CouponRejection {
    #[error("invalid coupon code")]
    UnknownCode,
    #[error("coupon is no longer active")]
    Inactive,
    #[error("coupon has expired or is not yet valid")]
    OutsideValidityWindow,
    #[error("coupon usage limit reached")]
    UsageLimitReached,
    #[error("you have already used this coupon {limit} time(s)")]
    PerUserLimitReached { limit: i32 },
    #[error("minimum purchase amount ৳{} required", .required.normalize())]
    BelowMinimumPurchase { required: Decimal },
}

impl CouponRejection {
    /// Stable machine-readable reason
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownCode => "unknown_code",
            Self::Inactive => "inactive",
            Self::OutsideValidityWindow => "outside_validity_window",
            Self::UsageLimitReached => "usage_limit_reached",
            Self::PerUserLimitReached { .. } => "per_user_limit_reached",
            Self::BelowMinimumPurchase { .. } => "below_minimum_purchase",
        }
    }
}

/// Canonical form of a customer-entered code
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Applies rules 2..=6 to a coupon that exists. `user_usages` is `None` for guests.
pub fn evaluate(
    coupon: &coupon::Model,
    now: DateTime<Utc>,
    user_usages: Option<u64>,
    subtotal: Decimal,
) -> Result<(), CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::Inactive);
    }
    if !coupon.within_window(now) {
        return Err(CouponRejection::OutsideValidityWindow);
    }
    if !coupon.has_remaining_uses() {
        return Err(CouponRejection::UsageLimitReached);
    }
    if let Some(used) = user_usages {
        if used >= coupon.max_uses_per_user.max(0) as u64 {
            return Err(CouponRejection::PerUserLimitReached {
                limit: coupon.max_uses_per_user,
            });
        }
    }
    if subtotal < coupon.min_purchase_amount {
        return Err(CouponRejection::BelowMinimumPurchase {
            required: coupon.min_purchase_amount,
        });
    }
    Ok(())
}

/// Turns a coupon and a subtotal into a discount amount
pub struct DiscountCalculator;

impl DiscountCalculator {
    pub fn calculate(coupon: &coupon::Model, subtotal: Decimal) -> Decimal {
        Self::discount_for(
            coupon.discount_type,
            coupon.discount_value,
            coupon.max_discount_amount,
            subtotal,
        )
    }

    /// Percentage discounts are capped by `cap`; every discount is clamped to `[0, subtotal]`
    pub fn discount_for(
        discount_type: DiscountType,
        value: Decimal,
        cap: Option<Decimal>,
        subtotal: Decimal,
    ) -> Decimal {
        let raw = match discount_type {
            DiscountType::Percentage => {
                let pct = subtotal * value / Decimal::ONE_HUNDRED;
                match cap {
                    Some(cap) => pct.min(cap),
                    None => pct,
                }
            }
            DiscountType::Fixed => value,
        };

        raw.min(subtotal)
            .max(Decimal::ZERO)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// Result of a coupon preview against the current cart
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CouponPreview {
    pub code: String,
    pub description: Option<String>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub message: String,
}

/// What happened when a redemption was recorded inside the order transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    Recorded,
    /// The coupon row disappeared after validation; the order keeps its discount
    CouponMissing,
}

/// Checks codes against the validity rules; first failing rule wins
#[derive(Clone)]
pub struct CouponValidator {
    db: Arc<DbPool>,
}

impl CouponValidator {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(code = %code))]
    pub async fn validate(
        &self,
        code: &str,
        user_id: Option<Uuid>,
        subtotal: Decimal,
    ) -> Result<coupon::Model, ServiceError> {
        validate_on(&*self.db, code, user_id, subtotal).await
    }

    /// Validates and prices a code without touching usage counters
    #[instrument(skip(self), fields(code = %code))]
    pub async fn preview(
        &self,
        code: &str,
        user_id: Option<Uuid>,
        subtotal: Decimal,
    ) -> Result<CouponPreview, ServiceError> {
        let coupon = self.validate(code, user_id, subtotal).await?;
        let discount = DiscountCalculator::calculate(&coupon, subtotal);
        Ok(CouponPreview {
            code: coupon.code,
            description: coupon.description,
            subtotal,
            discount,
            message: format!("Coupon applied! You saved ৳{}", discount.normalize()),
        })
    }
}

/// Validation against an arbitrary connection so checkout can reuse it
pub async fn validate_on<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    user_id: Option<Uuid>,
    subtotal: Decimal,
) -> Result<coupon::Model, ServiceError> {
    let normalized = normalize_code(code);
    if normalized.is_empty() {
        return Err(CouponRejection::UnknownCode.into());
    }

    let coupon = CouponEntity::find()
        .filter(coupon::Column::Code.eq(normalized.as_str()))
        .one(conn)
        .await?
        .ok_or(CouponRejection::UnknownCode)?;

    let user_usages = match user_id {
        Some(user_id) => Some(
            CouponUsageEntity::find()
                .filter(coupon_usage::Column::CouponId.eq(coupon.id))
                .filter(coupon_usage::Column::UserId.eq(user_id))
                .count(conn)
                .await?,
        ),
        None => None,
    };

    if let Err(rejection) = evaluate(&coupon, Utc::now(), user_usages, subtotal) {
        counter!("bookstore_coupons.rejected", 1);
        info!(code = %normalized, reason = rejection.code(), "Coupon rejected");
        return Err(rejection.into());
    }

    Ok(coupon)
}

/// Atomically bumps `used_count` and records the usage row.
/// Must run inside the order transaction after the order row exists.
pub async fn redeem<C: ConnectionTrait>(
    conn: &C,
    coupon_id: Uuid,
    user_id: Uuid,
    order_id: Uuid,
) -> Result<Redemption, ServiceError> {
    let result = CouponEntity::update_many()
        .col_expr(
            coupon::Column::UsedCount,
            Expr::col(coupon::Column::UsedCount).add(1),
        )
        .filter(coupon::Column::Id.eq(coupon_id))
        .filter(
            Condition::any()
                .add(coupon::Column::MaxUses.is_null())
                .add(Expr::col(coupon::Column::UsedCount).lt(Expr::col(coupon::Column::MaxUses))),
        )
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return match CouponEntity::find_by_id(coupon_id).one(conn).await? {
            None => {
                warn!(%coupon_id, %order_id, "Coupon vanished before redemption; keeping discount");
                Ok(Redemption::CouponMissing)
            }
            Some(_) => {
                counter!("bookstore_coupons.cap_race_lost", 1);
                Err(CouponRejection::UsageLimitReached.into())
            }
        };
    }

    coupon_usage::ActiveModel {
        id: Set(Uuid::new_v4()),
        coupon_id: Set(coupon_id),
        user_id: Set(user_id),
        order_id: Set(order_id),
        used_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;

    counter!("bookstore_coupons.redeemed", 1);
    Ok(Redemption::Recorded)
}

fn validate_coupon_code(code: &str) -> Result<(), ValidationError> {
    let trimmed = code.trim();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::new("coupon_code"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateCouponRequest {
    #[validate(length(min = 3, max = 50), custom = "validate_coupon_code")]
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount_amount: Option<Decimal>,
    #[serde(default)]
    pub min_purchase_amount: Decimal,
    #[validate(range(min = 1))]
    pub max_uses: Option<i32>,
    #[validate(range(min = 1))]
    pub max_uses_per_user: Option<i32>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

/// Coupon administration; coupons are deactivated, never deleted
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DbPool>,
}

impl CouponService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_coupon(
        &self,
        request: CreateCouponRequest,
    ) -> Result<coupon::Model, ServiceError> {
        request.validate()?;

        if request.discount_value <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "discount value must be positive".into(),
            ));
        }
        if request.discount_type == DiscountType::Percentage
            && request.discount_value > Decimal::ONE_HUNDRED
        {
            return Err(ServiceError::ValidationError(
                "percentage discount cannot exceed 100".into(),
            ));
        }
        if request.valid_to < request.valid_from {
            return Err(ServiceError::ValidationError(
                "valid_to must not be before valid_from".into(),
            ));
        }

        let code = normalize_code(&request.code);
        let existing = CouponEntity::find()
            .filter(coupon::Column::Code.eq(code.as_str()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon {} already exists",
                code
            )));
        }

        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            description: Set(request.description),
            discount_type: Set(request.discount_type),
            discount_value: Set(request.discount_value),
            max_discount_amount: Set(request.max_discount_amount),
            min_purchase_amount: Set(request.min_purchase_amount.max(Decimal::ZERO)),
            max_uses: Set(request.max_uses),
            max_uses_per_user: Set(request.max_uses_per_user.unwrap_or(1)),
            used_count: Set(0),
            valid_from: Set(request.valid_from),
            valid_to: Set(request.valid_to),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        info!(coupon_id = %model.id, "Coupon created");
        Ok(model)
    }

    #[instrument(skip(self))]
    pub async fn deactivate_coupon(&self, coupon_id: Uuid) -> Result<(), ServiceError> {
        let coupon = CouponEntity::find_by_id(coupon_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", coupon_id)))?;

        let mut active: coupon::ActiveModel = coupon.into();
        active.is_active = Set(false);
        active.update(&*self.db).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn coupon(discount_type: DiscountType, value: Decimal) -> coupon::Model {
        let now = Utc::now();
        coupon::Model {
            id: Uuid::new_v4(),
            code: "BOIMELA".into(),
            description: None,
            discount_type,
            discount_value: value,
            max_discount_amount: None,
            min_purchase_amount: Decimal::ZERO,
            max_uses: None,
            max_uses_per_user: 1,
            used_count: 0,
            valid_from: now - Duration::days(1),
            valid_to: now + Duration::days(1),
            is_active: true,
            created_at: now,
        }
    }

    #[test]
    fn percentage_discount_is_capped() {
        let mut c = coupon(DiscountType::Percentage, dec!(10));
        c.max_discount_amount = Some(dec!(50));
        assert_eq!(DiscountCalculator::calculate(&c, dec!(1000)), dec!(50));
        assert_eq!(DiscountCalculator::calculate(&c, dec!(300)), dec!(30));
    }

    #[test]
    fn fixed_discount_never_exceeds_subtotal() {
        let c = coupon(DiscountType::Fixed, dec!(200));
        assert_eq!(DiscountCalculator::calculate(&c, dec!(150)), dec!(150));
        assert_eq!(DiscountCalculator::calculate(&c, dec!(500)), dec!(200));
    }

    #[test]
    fn discount_rounds_half_away_from_zero() {
        let c = coupon(DiscountType::Percentage, dec!(15));
        // 15% of 10.10 = 1.515
        assert_eq!(DiscountCalculator::calculate(&c, dec!(10.10)), dec!(1.52));
    }

    #[test]
    fn valid_coupon_passes() {
        let c = coupon(DiscountType::Fixed, dec!(50));
        assert_eq!(evaluate(&c, Utc::now(), Some(0), dec!(100)), Ok(()));
    }

    #[rstest]
    #[case::inactive(|c: &mut coupon::Model| c.is_active = false, CouponRejection::Inactive)]
    #[case::expired(
        |c: &mut coupon::Model| c.valid_to = Utc::now() - Duration::hours(1),
        CouponRejection::OutsideValidityWindow
    )]
    #[case::not_started(
        |c: &mut coupon::Model| c.valid_from = Utc::now() + Duration::hours(1),
        CouponRejection::OutsideValidityWindow
    )]
    #[case::exhausted(
        |c: &mut coupon::Model| { c.max_uses = Some(5); c.used_count = 5; },
        CouponRejection::UsageLimitReached
    )]
    fn single_rule_failures(
        #[case] mutate: fn(&mut coupon::Model),
        #[case] expected: CouponRejection,
    ) {
        let mut c = coupon(DiscountType::Fixed, dec!(50));
        mutate(&mut c);
        assert_eq!(evaluate(&c, Utc::now(), Some(0), dec!(100)), Err(expected));
    }

    #[test]
    fn per_user_limit_reports_the_limit() {
        let mut c = coupon(DiscountType::Fixed, dec!(50));
        c.max_uses_per_user = 2;
        assert_eq!(evaluate(&c, Utc::now(), Some(1), dec!(100)), Ok(()));
        let err = evaluate(&c, Utc::now(), Some(2), dec!(100)).unwrap_err();
        assert_eq!(err, CouponRejection::PerUserLimitReached { limit: 2 });
        assert_eq!(err.to_string(), "you have already used this coupon 2 time(s)");
    }

    #[test]
    fn guests_skip_the_per_user_rule() {
        let c = coupon(DiscountType::Fixed, dec!(50));
        assert_eq!(evaluate(&c, Utc::now(), None, dec!(100)), Ok(()));
    }

    #[test]
    fn below_minimum_purchase_message() {
        let mut c = coupon(DiscountType::Fixed, dec!(50));
        c.min_purchase_amount = dec!(500.00);
        let err = evaluate(&c, Utc::now(), Some(0), dec!(499.99)).unwrap_err();
        assert_matches!(err, CouponRejection::BelowMinimumPurchase { .. });
        assert_eq!(err.to_string(), "minimum purchase amount ৳500 required");
    }

    #[test]
    fn first_failing_rule_wins() {
        let mut c = coupon(DiscountType::Fixed, dec!(50));
        c.is_active = false;
        c.valid_to = Utc::now() - Duration::days(3);
        c.min_purchase_amount = dec!(1000);
        assert_eq!(
            evaluate(&c, Utc::now(), Some(9), dec!(10)),
            Err(CouponRejection::Inactive)
        );
    }

    #[test]
    fn codes_are_normalized() {
        assert_eq!(normalize_code("  boiMela10 "), "BOIMELA10");
    }

    #[test]
    fn coupon_code_validator_rejects_spaces() {
        assert!(validate_coupon_code("EID 50").is_err());
        assert!(validate_coupon_code("EID-50").is_ok());
    }
}
