pub mod book;
pub mod book_rental;
pub mod cart_item;
pub mod coupon;
pub mod coupon_usage;
pub mod order;
pub mod order_item;
pub mod order_status_history;
pub mod payment;
pub mod rental_plan;
pub mod rental_status_history;
pub mod shipping_fee;
