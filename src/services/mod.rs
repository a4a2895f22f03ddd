pub mod cart;
pub mod checkout;
pub mod coupons;
pub mod order_status;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod rentals;
pub mod shipping_fees;
