pub mod cart;
pub mod checkout;
pub mod common;
pub mod coupons;
pub mod orders;
pub mod payments;
pub mod rentals;
pub mod shipping;

use crate::{
    cache::{CacheBackend, InMemoryCache},
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        cart::CartService,
        checkout::OrderPlacementService,
        coupons::{CouponService, CouponValidator},
        orders::OrderService, payments::PaymentService, rentals::RentalService,
        shipping_fees::ShippingFeeResolver,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub shipping: ShippingFeeResolver,
    pub cart: CartService,
    pub coupons: CouponValidator,
    pub coupon_admin: CouponService,
    pub checkout: OrderPlacementService,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub rentals: RentalService,
}

impl AppServices {
    /// Wires every service against one pool, event channel and configuration
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCache::new());
        Self::with_cache(db_pool, event_sender, config, cache)
    }

    pub fn with_cache(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        config: &AppConfig,
        cache: Arc<dyn CacheBackend>,
    ) -> Result<Self, ServiceError> {
        let shipping = ShippingFeeResolver::new(db_pool.clone(), cache, config.shipping.clone());
        let payments = PaymentService::new(db_pool.clone(), event_sender.clone(), config)?;

        Ok(Self {
            cart: CartService::new(db_pool.clone()),
            coupons: CouponValidator::new(db_pool.clone()),
            coupon_admin: CouponService::new(db_pool.clone()),
            checkout: OrderPlacementService::new(
                db_pool.clone(),
                shipping.clone(),
                payments.clone(),
                event_sender.clone(),
            ),
            orders: OrderService::new(db_pool.clone(), payments.clone(), event_sender.clone()),
            rentals: RentalService::new(db_pool, event_sender, config.rentals.clone()),
            shipping,
            payments,
        })
    }
}
