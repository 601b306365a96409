//! Exact-decimal price and amount math.
//!
//! All rounding is tick-aware: prices are quantized to the market's
//! minimum increment, amounts to base-asset precision (8 fractional
//! digits). No floats anywhere near money.

use rust_decimal::{Decimal, RoundingStrategy};

/// Base-asset fractional digits (BTC precision).
pub const BASE_PRECISION: u32 = 8;

/// Round a price up to the next multiple of `tick`.
///
/// For any valid tick `t > 0`: `round_up(p, t) >= p` and
/// `round_up(p, t) - p < t`.
pub fn round_up_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    (price / tick).ceil() * tick
}

/// Round a price down to the previous multiple of `tick`.
pub fn round_down_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    (price / tick).floor() * tick
}

/// Floor an amount to base-asset precision.
pub fn floor_to_base_precision(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(BASE_PRECISION, RoundingStrategy::ToZero)
}

/// Base amount purchasable with `quote_amount` at `price`, floored to
/// base precision. Returns zero when the result is below `min_amount`,
/// signalling the caller that no valid order exists.
pub fn base_amount_for_quote(quote_amount: Decimal, price: Decimal, min_amount: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let amount = floor_to_base_precision(quote_amount / price);
    if amount < min_amount {
        Decimal::ZERO
    } else {
        amount
    }
}

/// Format a limit price for the API with exactly the tick's precision.
pub fn format_limit_price(price: Decimal, tick: Decimal) -> String {
    let decimals = tick.normalize().scale();
    let quantized = price.round_dp_with_strategy(decimals, RoundingStrategy::ToZero);
    format!("{:.*}", decimals as usize, quantized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_up_to_tick() {
        assert_eq!(round_up_to_tick(dec!(100.3), dec!(1)), dec!(101));
        assert_eq!(round_up_to_tick(dec!(100), dec!(1)), dec!(100));
        assert_eq!(round_up_to_tick(dec!(0.123), dec!(0.01)), dec!(0.13));
        assert_eq!(round_up_to_tick(dec!(0.12), dec!(0.01)), dec!(0.12));
    }

    #[test]
    fn test_round_down_to_tick() {
        assert_eq!(round_down_to_tick(dec!(100.9), dec!(1)), dec!(100));
        assert_eq!(round_down_to_tick(dec!(100), dec!(1)), dec!(100));
        assert_eq!(round_down_to_tick(dec!(0.129), dec!(0.01)), dec!(0.12));
    }

    #[test]
    fn test_rounding_bounds_property() {
        // round_up(p, t) >= p, round_up(p, t) - p < t; mirror for down.
        let ticks = [dec!(1), dec!(0.01), dec!(0.5), dec!(25)];
        let prices = [dec!(0.004), dec!(99.99), dec!(12345.678), dec!(3)];
        for tick in ticks {
            for price in prices {
                let up = round_up_to_tick(price, tick);
                assert!(up >= price, "up {up} < {price} at tick {tick}");
                assert!(up - price < tick, "up {up} - {price} >= {tick}");

                let down = round_down_to_tick(price, tick);
                assert!(down <= price);
                assert!(price - down < tick);
            }
        }
    }

    #[test]
    fn test_floor_to_base_precision() {
        assert_eq!(floor_to_base_precision(dec!(0.123456789)), dec!(0.12345678));
        assert_eq!(floor_to_base_precision(dec!(0.1)), dec!(0.1));
    }

    #[test]
    fn test_base_amount_for_quote() {
        // 100_000 CLP at 45_000_000 CLP/BTC -> 0.00222222 BTC
        let amount = base_amount_for_quote(dec!(100000), dec!(45000000), dec!(0.00002));
        assert_eq!(amount, dec!(0.00222222));
    }

    #[test]
    fn test_base_amount_below_minimum_is_zero() {
        let amount = base_amount_for_quote(dec!(500), dec!(45000000), dec!(0.00002));
        assert_eq!(amount, Decimal::ZERO);
    }

    #[test]
    fn test_base_amount_zero_price() {
        assert_eq!(base_amount_for_quote(dec!(1000), Decimal::ZERO, dec!(0.01)), Decimal::ZERO);
    }

    #[test]
    fn test_format_limit_price() {
        assert_eq!(format_limit_price(dec!(45000001), dec!(1)), "45000001");
        assert_eq!(format_limit_price(dec!(912.34), dec!(0.01)), "912.34");
        assert_eq!(format_limit_price(dec!(912.3), dec!(0.01)), "912.30");
    }
}
