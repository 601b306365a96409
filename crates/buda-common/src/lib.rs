//! Shared types and utilities for the Buda execution bot.
//!
//! This crate contains:
//! - Core domain types (`Side`, `OrderStatus`, `OrderSnapshot`, `PriceLevel`, `MarketSpec`)
//! - Exact-decimal tick rounding and order-amount math
//! - Display formatting for CLP and crypto amounts

pub mod format;
pub mod numeric;
pub mod types;

pub use format::{format_clp, format_crypto};
pub use numeric::{
    base_amount_for_quote, floor_to_base_precision, format_limit_price, round_down_to_tick,
    round_up_to_tick,
};
pub use types::{MarketSpec, OrderSnapshot, OrderStatus, PriceLevel, Side, decimal_from_value};
