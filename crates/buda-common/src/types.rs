//! Core domain types shared across the bot.
//!
//! Buda's API wraps most numeric fields as `[value, currency]` tuples, and
//! some payloads omit fields entirely. Everything crossing the transport
//! boundary is normalized here into canonical shapes so the engine never
//! sees raw JSON.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Order type string expected by the Buda API.
    pub fn api_order_type(&self) -> &'static str {
        match self {
            Side::Buy => "Bid",
            Side::Sell => "Ask",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Lifecycle state of an exchange order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Resting on the book, possibly partially traded.
    Pending,
    /// Fully filled.
    Traded,
    /// Cancel requested, not yet confirmed by the matching engine.
    Canceling,
    /// Canceled without any remaining liability.
    Canceled,
    /// Canceled after a partial fill.
    CanceledAndTraded,
    /// Anything the exchange sends that we do not recognize.
    Unknown,
}

impl OrderStatus {
    /// Terminal states: the order can no longer trade.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Traded | OrderStatus::Canceled | OrderStatus::CanceledAndTraded
        )
    }
}

impl FromStr for OrderStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" | "received" => OrderStatus::Pending,
            "traded" => OrderStatus::Traded,
            "canceling" => OrderStatus::Canceling,
            "canceled" => OrderStatus::Canceled,
            "canceled_and_traded" => OrderStatus::CanceledAndTraded,
            _ => OrderStatus::Unknown,
        })
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Traded => "traded",
            OrderStatus::Canceling => "canceling",
            OrderStatus::Canceled => "canceled",
            OrderStatus::CanceledAndTraded => "canceled_and_traded",
            OrderStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, amount: Decimal) -> Self {
        Self { price, amount }
    }

    /// Parse a `[price, amount]` (or `[price, amount, ...]`) wire entry.
    /// Entries with non-numeric or missing fields yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let entry = value.as_array()?;
        if entry.len() < 2 {
            return None;
        }
        let price = decimal_from_value(&entry[0])?;
        let amount = decimal_from_value(&entry[1])?;
        Some(Self { price, amount })
    }
}

/// Normalized view of an exchange order.
///
/// Only the fields the engine consumes. Fields missing from a payload
/// default to zero / `Unknown` instead of failing the decode, so a sparse
/// streaming event can never abort a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: String,
    pub status: OrderStatus,
    /// Base currency amount already traded.
    pub traded_amount: Decimal,
    /// Limit price of the order.
    pub limit_price: Decimal,
    /// Quote currency exchanged so far.
    pub total_exchanged: Decimal,
}

impl OrderSnapshot {
    /// Decode an order object from a Buda payload.
    ///
    /// Accepts both scalar and `[value, currency]` tuple field shapes.
    /// Returns `None` only when the payload carries no order id.
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = match value.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return None,
        };
        let status = value
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .parse()
            .unwrap_or(OrderStatus::Unknown);

        Some(Self {
            id,
            status,
            traded_amount: field_decimal(value, "traded_amount"),
            limit_price: field_decimal(value, "limit"),
            total_exchanged: field_decimal(value, "total_exchanged"),
        })
    }
}

/// Extract a decimal field, unwrapping one level of `[value, currency]`.
/// Missing or malformed fields become zero.
fn field_decimal(value: &Value, key: &str) -> Decimal {
    value
        .get(key)
        .and_then(decimal_from_value)
        .unwrap_or(Decimal::ZERO)
}

/// Decode a decimal that may arrive as a string, a number, or the first
/// element of a `[value, currency]` tuple.
pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        Value::Array(items) => items.first().and_then(decimal_from_value),
        _ => None,
    }
}

/// Static per-market trading constants.
///
/// Immutable after lookup; the engine receives one of these at
/// construction and never consults a mutable table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketSpec {
    /// Market identifier, e.g. "btc-clp".
    pub id: &'static str,
    /// Base currency code, e.g. "btc".
    pub base: &'static str,
    /// Quote currency code, e.g. "clp".
    pub quote: &'static str,
    /// Minimum tradable base amount.
    pub min_base_amount: Decimal,
    /// Minimum tradable quote notional.
    pub min_quote_amount: Decimal,
    /// Minimum price increment.
    pub price_tick: Decimal,
}

impl MarketSpec {
    /// Look up the spec for a market id. Unknown markets are rejected.
    pub fn for_market(market_id: &str) -> Option<&'static MarketSpec> {
        MARKETS.iter().find(|m| m.id == market_id)
    }

    /// Channel name used by the realtime endpoint ("btc-clp" -> "btcclp").
    pub fn realtime_channel(&self) -> String {
        self.id.replace('-', "")
    }
}

/// Supported markets.
static MARKETS: &[MarketSpec] = &[
    MarketSpec {
        id: "btc-clp",
        base: "btc",
        quote: "clp",
        min_base_amount: Decimal::from_parts(2, 0, 0, false, 5), // 0.00002
        min_quote_amount: Decimal::from_parts(2000, 0, 0, false, 0),
        price_tick: Decimal::ONE,
    },
    MarketSpec {
        id: "usdc-clp",
        base: "usdc",
        quote: "clp",
        min_base_amount: Decimal::from_parts(1, 0, 0, false, 2), // 0.01
        min_quote_amount: Decimal::from_parts(10, 0, 0, false, 0),
        price_tick: Decimal::from_parts(1, 0, 0, false, 2), // 0.01
    },
];
