//! Property-based tests for the pricing pipeline.
//!
//! Amounts are generated as whole paisa so every value is exact in `Decimal`.

use bookstore_api::{
    entities::{coupon::DiscountType, order::OrderStatus},
    services::{
        coupons::{normalize_code, DiscountCalculator},
        order_status::{allowed_next, can_transition},
        pricing::PricingAggregator,
        shipping_fees::city_key,
    },
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use sea_orm::Iterable;

fn money_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..10_000_000).prop_map(|paisa| Decimal::new(paisa, 2))
}

fn percentage_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..=10_000).prop_map(|basis| Decimal::new(basis, 2))
}

fn discount_type_strategy() -> impl Strategy<Value = DiscountType> {
    prop_oneof![Just(DiscountType::Percentage), Just(DiscountType::Fixed)]
}

fn status_strategy() -> impl Strategy<Value = OrderStatus> {
    proptest::sample::select(OrderStatus::iter().collect::<Vec<_>>())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn discount_never_exceeds_subtotal(
        discount_type in discount_type_strategy(),
        value in money_strategy(),
        cap in proptest::option::of(money_strategy()),
        subtotal in money_strategy(),
    ) {
        let discount = DiscountCalculator::discount_for(discount_type, value, cap, subtotal);
        prop_assert!(discount >= Decimal::ZERO, "negative discount {}", discount);
        prop_assert!(discount <= subtotal, "discount {} above subtotal {}", discount, subtotal);
        prop_assert!(discount.scale() <= 2);
    }

    #[test]
    fn percentage_discount_respects_cap(
        pct in percentage_strategy(),
        cap in money_strategy(),
        subtotal in money_strategy(),
    ) {
        let discount =
            DiscountCalculator::discount_for(DiscountType::Percentage, pct, Some(cap), subtotal);
        prop_assert!(discount <= cap, "discount {} above cap {}", discount, cap);
    }

    #[test]
    fn fixed_discount_is_value_or_subtotal(value in money_strategy(), subtotal in money_strategy()) {
        let discount = DiscountCalculator::discount_for(DiscountType::Fixed, value, None, subtotal);
        prop_assert_eq!(discount, value.min(subtotal));
    }

    #[test]
    fn total_is_never_negative_with_clamped_discount(
        discount_type in discount_type_strategy(),
        value in money_strategy(),
        subtotal in money_strategy(),
        shipping in money_strategy(),
    ) {
        let discount = DiscountCalculator::discount_for(discount_type, value, None, subtotal);
        let breakdown = PricingAggregator::aggregate(subtotal, shipping, discount);
        prop_assert_eq!(breakdown.total, subtotal + shipping - discount);
        prop_assert!(breakdown.total >= shipping);
    }

    #[test]
    fn subtotal_matches_line_sum(lines in proptest::collection::vec((money_strategy(), 1i32..20), 0..10)) {
        let expected = lines
            .iter()
            .fold(Decimal::ZERO, |acc, (price, qty)| acc + *price * Decimal::from(*qty));
        prop_assert_eq!(PricingAggregator::subtotal(lines), expected);
    }
}

proptest! {
    #[test]
    fn city_keys_are_case_and_space_insensitive(city in "[A-Za-z ]{0,24}") {
        let key = city_key(&city);
        prop_assert_eq!(city_key(&key), key.clone());
        prop_assert_eq!(city_key(&format!("  {}  ", city.to_uppercase())), key);
    }

    #[test]
    fn coupon_codes_normalize_idempotently(code in "[A-Za-z0-9]{1,16}") {
        let normalized = normalize_code(&format!(" {} ", code));
        prop_assert_eq!(normalize_code(&normalized), normalized.clone());
        prop_assert!(normalized.chars().all(|c| !c.is_ascii_lowercase()));
    }

    #[test]
    fn transitions_never_return_to_pending(from in status_strategy(), to in status_strategy()) {
        if to == OrderStatus::Pending {
            prop_assert!(!can_transition(from, to));
        }
        prop_assert!(!can_transition(from, from));
        prop_assert_eq!(can_transition(from, to), allowed_next(from).contains(&to));
    }
}
