use crate::{
    cache::{get_json, set_json, CacheBackend},
    config::ShippingConfig,
    db::{self, DbPool},
    entities::shipping_fee::{self, Entity as ShippingFeeEntity},
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const CACHE_PREFIX: &str = "shipping_fee:";

/// Lookup key for a city: trimmed and lowercased
pub fn city_key(city: &str) -> String {
    city.trim().to_lowercase()
}

/// Resolves the delivery charge for a destination city.
///
/// Lookup order is the city's own active row, then the active default row, then
/// the configured fallback. Results are cached per city for the configured TTL.
#[derive(Clone)]
pub struct ShippingFeeResolver {
    db: Arc<DbPool>,
    cache: Arc<dyn CacheBackend>,
    config: ShippingConfig,
}

impl ShippingFeeResolver {
    pub fn new(db: Arc<DbPool>, cache: Arc<dyn CacheBackend>, config: ShippingConfig) -> Self {
        Self { db, cache, config }
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, city: Option<&str>) -> Result<Decimal, ServiceError> {
        let key = match city.map(city_key) {
            Some(key) if !key.is_empty() => key,
            _ => return Ok(Decimal::ZERO),
        };
        let cache_key = format!("{}{}", CACHE_PREFIX, key);

        match get_json::<Decimal>(self.cache.as_ref(), &cache_key).await {
            Ok(Some(fee)) => {
                debug!(city = %key, %fee, "Shipping fee served from cache");
                return Ok(fee);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Shipping fee cache read failed"),
        }

        let fee = self.lookup(&key).await?;

        if let Err(e) = set_json(
            self.cache.as_ref(),
            &cache_key,
            &fee,
            Some(self.config.cache_ttl()),
        )
        .await
        {
            warn!(error = %e, "Shipping fee cache write failed");
        }

        Ok(fee)
    }

    async fn lookup(&self, key: &str) -> Result<Decimal, ServiceError> {
        let by_city = ShippingFeeEntity::find()
            .filter(shipping_fee::Column::CityKey.eq(key))
            .filter(shipping_fee::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?;
        if let Some(row) = by_city {
            return Ok(row.fee);
        }

        let default = ShippingFeeEntity::find()
            .filter(shipping_fee::Column::IsDefault.eq(true))
            .filter(shipping_fee::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?;

        Ok(match default {
            Some(row) => row.fee,
            None => {
                debug!(city = %key, "No shipping row or default; using fallback fee");
                self.config.fallback_fee
            }
        })
    }

    /// Creates or updates the fee for a city and drops its cached value
    #[instrument(skip(self))]
    pub async fn upsert_fee(
        &self,
        city: &str,
        fee: Decimal,
        is_active: bool,
    ) -> Result<shipping_fee::Model, ServiceError> {
        let key = city_key(city);
        if key.is_empty() {
            return Err(ServiceError::ValidationError("city is required".into()));
        }
        if fee < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "shipping fee cannot be negative".into(),
            ));
        }

        let existing = ShippingFeeEntity::find()
            .filter(shipping_fee::Column::CityKey.eq(key.as_str()))
            .one(&*self.db)
            .await?;

        let model = match existing {
            Some(row) => {
                let mut active: shipping_fee::ActiveModel = row.into();
                active.city_name = Set(city.trim().to_string());
                active.fee = Set(fee);
                active.is_active = Set(is_active);
                active.updated_at = Set(Utc::now());
                active.update(&*self.db).await?
            }
            None => {
                shipping_fee::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    city_name: Set(city.trim().to_string()),
                    city_key: Set(key.clone()),
                    fee: Set(fee),
                    is_default: Set(false),
                    is_active: Set(is_active),
                    updated_at: Set(Utc::now()),
                }
                .insert(&*self.db)
                .await?
            }
        };

        // A default row's fee feeds every unmatched city
        if model.is_default {
            self.invalidate_all().await;
        } else {
            self.invalidate(&key).await;
        }

        info!(city = %key, %fee, "Shipping fee saved");
        Ok(model)
    }

    /// Marks one city as the default; exactly one default row remains afterwards
    #[instrument(skip(self))]
    pub async fn set_default(&self, city: &str) -> Result<(), ServiceError> {
        let key = city_key(city);
        let txn = db::begin(&self.db).await?;

        let target = ShippingFeeEntity::find()
            .filter(shipping_fee::Column::CityKey.eq(key.as_str()))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Shipping fee for {} not found", city)))?;

        ShippingFeeEntity::update_many()
            .col_expr(shipping_fee::Column::IsDefault, Expr::value(false))
            .filter(shipping_fee::Column::IsDefault.eq(true))
            .exec(&txn)
            .await?;

        let mut active: shipping_fee::ActiveModel = target.into();
        active.is_default = Set(true);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        db::commit(txn).await?;
        self.invalidate_all().await;
        info!(city = %key, "Default shipping fee changed");
        Ok(())
    }

    /// Drops the cached fee for one city
    pub async fn invalidate(&self, city: &str) {
        let cache_key = format!("{}{}", CACHE_PREFIX, city_key(city));
        if let Err(e) = self.cache.delete(&cache_key).await {
            warn!(error = %e, "Shipping fee cache delete failed");
        }
    }

    /// Drops every cached shipping fee, leaving other cache users alone
    async fn invalidate_all(&self) {
        match self.cache.delete_prefix(CACHE_PREFIX).await {
            Ok(dropped) => debug!(dropped, "Shipping fee cache cleared"),
            Err(e) => warn!(error = %e, "Shipping fee cache clear failed"),
        }
    }

    pub async fn list_fees(&self) -> Result<Vec<shipping_fee::Model>, ServiceError> {
        Ok(ShippingFeeEntity::find()
            .filter(shipping_fee::Column::IsActive.eq(true))
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    async fn resolver(ttl_secs: u64) -> (ShippingFeeResolver, Arc<DbPool>) {
        resolver_with_cache(ttl_secs, Arc::new(InMemoryCache::new())).await
    }

    async fn resolver_with_cache(
        ttl_secs: u64,
        cache: Arc<dyn CacheBackend>,
    ) -> (ShippingFeeResolver, Arc<DbPool>) {
        let pool = db::establish_connection_with_config(&db::DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        db::run_migrations(&pool).await.unwrap();
        let pool = Arc::new(pool);
        let config = ShippingConfig {
            fallback_fee: dec!(120),
            cache_ttl_secs: ttl_secs,
        };
        (
            ShippingFeeResolver::new(pool.clone(), cache, config),
            pool,
        )
    }

    async fn set_fee_directly(pool: &DbPool, key: &str, fee: Decimal) {
        ShippingFeeEntity::update_many()
            .col_expr(shipping_fee::Column::Fee, Expr::value(fee))
            .filter(shipping_fee::Column::CityKey.eq(key))
            .exec(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn blank_city_costs_nothing() {
        let (resolver, _) = resolver(60).await;
        assert_eq!(resolver.resolve(None).await.unwrap(), Decimal::ZERO);
        assert_eq!(resolver.resolve(Some("   ")).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn falls_back_to_constant_then_default_row() {
        let (resolver, _) = resolver(60).await;
        assert_eq!(resolver.resolve(Some("Sylhet")).await.unwrap(), dec!(120));

        resolver.upsert_fee("Outside Dhaka", dec!(100), true).await.unwrap();
        resolver.set_default("outside dhaka").await.unwrap();
        assert_eq!(resolver.resolve(Some("Sylhet")).await.unwrap(), dec!(100));
    }

    #[tokio::test]
    async fn city_lookup_is_case_and_space_insensitive() {
        let (resolver, _) = resolver(60).await;
        resolver.upsert_fee("Dhaka", dec!(60), true).await.unwrap();
        assert_eq!(resolver.resolve(Some("  DHAKA ")).await.unwrap(), dec!(60));
    }

    #[tokio::test]
    async fn cached_fee_survives_storage_change_until_invalidated() {
        let (resolver, pool) = resolver(60).await;
        resolver.upsert_fee("Dhaka", dec!(60), true).await.unwrap();
        assert_eq!(resolver.resolve(Some("Dhaka")).await.unwrap(), dec!(60));

        set_fee_directly(&pool, "dhaka", dec!(80)).await;
        assert_eq!(resolver.resolve(Some("dhaka")).await.unwrap(), dec!(60));

        resolver.invalidate("Dhaka").await;
        assert_eq!(resolver.resolve(Some("dhaka")).await.unwrap(), dec!(80));
    }

    #[tokio::test]
    async fn cached_fee_expires_after_ttl() {
        let (resolver, pool) = resolver(1).await;
        resolver.upsert_fee("Khulna", dec!(100), true).await.unwrap();
        assert_eq!(resolver.resolve(Some("Khulna")).await.unwrap(), dec!(100));

        set_fee_directly(&pool, "khulna", dec!(90)).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(resolver.resolve(Some("Khulna")).await.unwrap(), dec!(90));
    }

    #[tokio::test]
    async fn default_change_only_drops_shipping_entries() {
        let shared = Arc::new(InMemoryCache::new());
        let (resolver, pool) = resolver_with_cache(60, shared.clone()).await;
        shared.set("rentals:plans", "[]", None).await.unwrap();

        resolver.upsert_fee("Barishal", dec!(110), true).await.unwrap();
        assert_eq!(resolver.resolve(Some("Barishal")).await.unwrap(), dec!(110));
        set_fee_directly(&pool, "barishal", dec!(95)).await;

        resolver.set_default("Barishal").await.unwrap();
        assert_eq!(resolver.resolve(Some("Barishal")).await.unwrap(), dec!(95));
        assert_eq!(
            shared.get("rentals:plans").await.unwrap().as_deref(),
            Some("[]")
        );
    }

    #[tokio::test]
    async fn inactive_city_uses_fallback() {
        let (resolver, _) = resolver(60).await;
        resolver.upsert_fee("Rangpur", dec!(150), false).await.unwrap();
        assert_eq!(resolver.resolve(Some("Rangpur")).await.unwrap(), dec!(120));
    }

    #[tokio::test]
    async fn negative_fee_is_rejected() {
        let (resolver, _) = resolver(60).await;
        assert!(matches!(
            resolver.upsert_fee("Dhaka", dec!(-1), true).await,
            Err(ServiceError::ValidationError(_))
        ));
    }
}
