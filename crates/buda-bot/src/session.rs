//! Per-run execution accounting.
//!
//! An [`ExecutionSession`] tracks the cumulative result of one buy or sell
//! run across any number of cancel/replace cycles. Each exchange order is
//! folded into the totals exactly once, at the moment its slot is freed;
//! in between, `observe_order` surfaces incremental fills for progress
//! reporting without touching the cumulative totals.

use rust_decimal::Decimal;
use tracing::{info, warn};

use buda_common::{MarketSpec, Side, format_clp, format_crypto};

/// Final accounting for one execution run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub side: Side,
    /// Quote units for buys, base units for sells.
    pub target: Decimal,
    pub executed_quote: Decimal,
    pub executed_base: Decimal,
    /// Unexecuted portion of the target, in target units.
    pub remaining: Decimal,
    pub average_price: Option<Decimal>,
}

pub struct ExecutionSession {
    side: Side,
    market: &'static MarketSpec,
    target: Decimal,
    executed_quote: Decimal,
    executed_base: Decimal,
    // Cumulative fills already observed on the live order, so progress
    // reports show deltas and folding stays exactly-once.
    seen_base: Decimal,
    seen_quote: Decimal,
}

impl ExecutionSession {
    /// `target` is a quote amount for buys and a base amount for sells.
    pub fn new(side: Side, market: &'static MarketSpec, target: Decimal) -> Self {
        Self {
            side,
            market,
            target,
            executed_quote: Decimal::ZERO,
            executed_base: Decimal::ZERO,
            seen_base: Decimal::ZERO,
            seen_quote: Decimal::ZERO,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn target(&self) -> Decimal {
        self.target
    }

    /// Record the live order's cumulative fill figures and return the
    /// newly filled portion since the last observation, if any.
    pub fn observe_order(
        &mut self,
        traded_base: Decimal,
        traded_quote: Decimal,
    ) -> Option<(Decimal, Decimal)> {
        let new_base = traded_base - self.seen_base;
        let new_quote = traded_quote - self.seen_quote;
        if new_base <= Decimal::ZERO {
            return None;
        }
        self.seen_base = traded_base;
        self.seen_quote = traded_quote;
        Some((new_base, new_quote))
    }

    /// Fold a freed order's cumulative fills into the run totals.
    ///
    /// Takes the order's final cumulative figures, not a delta; resets the
    /// per-order watermark for the next order in the slot.
    pub fn fold_order(&mut self, traded_base: Decimal, traded_quote: Decimal) {
        self.executed_base += traded_base;
        self.executed_quote += traded_quote;
        self.seen_base = Decimal::ZERO;
        self.seen_quote = Decimal::ZERO;
    }

    /// Unexecuted portion of the target, in target units.
    pub fn remaining(&self) -> Decimal {
        let executed = match self.side {
            Side::Buy => self.executed_quote,
            Side::Sell => self.executed_base,
        };
        (self.target - executed).max(Decimal::ZERO)
    }

    /// Whether the remainder still clears the market minimum for a new order.
    pub fn can_continue(&self) -> bool {
        match self.side {
            Side::Buy => self.remaining() >= self.market.min_quote_amount,
            Side::Sell => self.remaining() >= self.market.min_base_amount,
        }
    }

    pub fn log_progress(&self) {
        let executed = match self.side {
            Side::Buy => self.executed_quote,
            Side::Sell => self.executed_base,
        };
        let pct = if self.target > Decimal::ZERO {
            executed / self.target * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        info!(
            side = %self.side,
            progress = %format!("{pct:.1}%"),
            executed_quote = %format_clp(self.executed_quote),
            executed_base = %format_crypto(self.executed_base, self.market.base),
            "execution progress"
        );
    }

    pub fn summary(&self) -> SessionSummary {
        let average_price = (self.executed_base > Decimal::ZERO)
            .then(|| self.executed_quote / self.executed_base);
        SessionSummary {
            side: self.side,
            target: self.target,
            executed_quote: self.executed_quote,
            executed_base: self.executed_base,
            remaining: self.remaining(),
            average_price,
        }
    }

    /// Emit the final summary. Called exactly once per run, on every exit
    /// path.
    pub fn log_summary(&self) {
        let summary = self.summary();
        info!(side = %self.side, market = self.market.id, "execution summary");
        match self.side {
            Side::Buy => {
                info!(target = %format_clp(summary.target), "  target spend");
                info!(executed = %format_clp(summary.executed_quote), "  executed");
                info!(
                    received = %format_crypto(summary.executed_base, self.market.base),
                    "  received"
                );
            }
            Side::Sell => {
                info!(
                    target = %format_crypto(summary.target, self.market.base),
                    "  target amount"
                );
                info!(
                    executed = %format_crypto(summary.executed_base, self.market.base),
                    "  executed"
                );
                info!(received = %format_clp(summary.executed_quote), "  received");
            }
        }
        if let Some(avg) = summary.average_price {
            info!(average_price = %format_clp(avg), "  average price");
        }
        if summary.remaining > Decimal::ZERO {
            warn!(
                remaining = %summary.remaining,
                "  unexecuted remainder"
            );
        }
    }
}
