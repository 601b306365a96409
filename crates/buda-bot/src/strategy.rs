//! Target price computation.
//!
//! Two placement strategies: `top` keeps the order one tick inside the
//! best same-side price without ever crossing the spread; `depth` walks
//! the book from the touch outward until a configured fraction of the
//! side's resting volume sits in front of the order.

use rust_decimal::Decimal;
use thiserror::Error;

use buda_common::{PriceLevel, Side, round_down_to_tick, round_up_to_tick};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StrategyError {
    #[error("order book side is empty")]
    EmptySide,
    #[error("order book side has zero resting volume")]
    ZeroVolume,
}

/// One tick inside the touch, falling back to joining the touch when a
/// tick improvement would meet or cross the opposite side.
pub fn top_price(side: Side, best_bid: Decimal, best_ask: Decimal, tick: Decimal) -> Decimal {
    match side {
        Side::Buy => {
            let improved = round_up_to_tick(best_bid + tick, tick);
            if improved >= best_ask {
                round_up_to_tick(best_bid, tick)
            } else {
                improved
            }
        }
        Side::Sell => {
            let improved = round_down_to_tick(best_ask - tick, tick);
            if improved <= best_bid {
                round_down_to_tick(best_ask, tick)
            } else {
                improved
            }
        }
    }
}

/// Price of the level where cumulative volume from the touch first reaches
/// `depth_ratio` of the side's total.
///
/// `levels` must be ordered touch-first: bids descending for a buy, asks
/// ascending for a sell. Buys round the result down, sells round up, so
/// the order always rests at or behind the selected level.
pub fn depth_price(
    side: Side,
    levels: &[PriceLevel],
    depth_ratio: Decimal,
    tick: Decimal,
) -> Result<Decimal, StrategyError> {
    if levels.is_empty() {
        return Err(StrategyError::EmptySide);
    }
    let total: Decimal = levels.iter().map(|l| l.amount).sum();
    if total <= Decimal::ZERO {
        return Err(StrategyError::ZeroVolume);
    }

    let threshold = depth_ratio * total;
    let mut cumulative = Decimal::ZERO;
    let mut selected = levels[levels.len() - 1].price;
    for level in levels {
        cumulative += level.amount;
        if cumulative >= threshold {
            selected = level.price;
            break;
        }
    }

    Ok(match side {
        Side::Buy => round_down_to_tick(selected, tick),
        Side::Sell => round_up_to_tick(selected, tick),
    })
}
