use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Priced view of a checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

/// Combines the pricing components into a total.
///
/// The total is not floored: a discount larger than subtotal plus shipping
/// cannot occur because discounts are clamped to the subtotal upstream.
pub struct PricingAggregator;

impl PricingAggregator {
    /// Sum of `unit_price * quantity` over the lines
    pub fn subtotal<I>(lines: I) -> Decimal
    where
        I: IntoIterator<Item = (Decimal, i32)>,
    {
        lines
            .into_iter()
            .map(|(unit_price, quantity)| unit_price * Decimal::from(quantity))
            .sum()
    }

    pub fn aggregate(subtotal: Decimal, shipping_cost: Decimal, discount: Decimal) -> PriceBreakdown {
        PriceBreakdown {
            subtotal,
            shipping_cost,
            discount,
            total: subtotal + shipping_cost - discount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test_case(dec!(1000), dec!(60), dec!(100) => dec!(960) ; "percentage coupon inside dhaka")]
    #[test_case(dec!(300), dec!(120), dec!(0) => dec!(420) ; "no coupon fallback shipping")]
    #[test_case(dec!(0), dec!(0), dec!(0) => dec!(0) ; "empty")]
    fn totals(subtotal: Decimal, shipping: Decimal, discount: Decimal) -> Decimal {
        PricingAggregator::aggregate(subtotal, shipping, discount).total
    }

    #[test]
    fn subtotal_sums_lines() {
        let lines = vec![(dec!(250), 2), (dec!(99.50), 1)];
        assert_eq!(PricingAggregator::subtotal(lines), dec!(599.50));
    }

    #[test]
    fn aggregation_is_deterministic() {
        let a = PricingAggregator::aggregate(dec!(450), dec!(60), dec!(45));
        let b = PricingAggregator::aggregate(dec!(450), dec!(60), dec!(45));
        assert_eq!(a, b);
    }
}
