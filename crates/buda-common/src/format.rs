//! Human-readable amount formatting for logs and summaries.
//!
//! CLP uses Chilean conventions: dot as thousands separator, comma as
//! decimal separator.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Format a CLP amount, e.g. `$1.234.567 CLP` or `-$10,50 CLP`.
pub fn format_clp(amount: Decimal) -> String {
    let sign = if amount.is_sign_negative() { "-" } else { "" };
    let amount = amount.abs().round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

    let int_part = amount.trunc();
    let grouped = group_thousands(&int_part.to_string());

    let frac = amount.fract();
    if frac.is_zero() {
        format!("{sign}${grouped} CLP")
    } else {
        let cents = (frac * Decimal::ONE_HUNDRED).trunc().to_u32().unwrap_or(0);
        format!("{sign}${grouped},{cents:02} CLP")
    }
}

/// Format a crypto amount with per-currency precision
/// (8 digits for BTC, 6 otherwise), e.g. `0.00123456 BTC`.
pub fn format_crypto(amount: Decimal, currency: &str) -> String {
    let upper = currency.to_uppercase();
    let decimals = if upper == "BTC" { 8 } else { 6 };
    format!("{:.*} {upper}", decimals, amount)
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let len = digits.len();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_clp_whole() {
        assert_eq!(format_clp(dec!(1234567)), "$1.234.567 CLP");
        assert_eq!(format_clp(dec!(999)), "$999 CLP");
        assert_eq!(format_clp(dec!(1000)), "$1.000 CLP");
        assert_eq!(format_clp(Decimal::ZERO), "$0 CLP");
    }

    #[test]
    fn test_format_clp_fractional() {
        assert_eq!(format_clp(dec!(912.34)), "$912,34 CLP");
        assert_eq!(format_clp(dec!(912.3)), "$912,30 CLP");
    }

    #[test]
    fn test_format_clp_negative() {
        assert_eq!(format_clp(dec!(-2500)), "-$2.500 CLP");
    }

    #[test]
    fn test_format_crypto() {
        assert_eq!(format_crypto(dec!(0.00123456), "btc"), "0.00123456 BTC");
        assert_eq!(format_crypto(dec!(12.5), "usdc"), "12.500000 USDC");
    }
}
