//! Execution engine.
//!
//! Maintains one resting limit order at the strategy's target price,
//! repricing as the market moves and folding partial fills into the
//! session totals until the target is executed, the order terminates, or
//! the run is interrupted. The monitoring loop is strictly sequential: no
//! two exchange actions are ever in flight for the same order.

use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use buda_common::{
    OrderSnapshot, OrderStatus, PriceLevel, Side, base_amount_for_quote, floor_to_base_precision,
    format_clp, format_crypto, format_limit_price,
};

use crate::api::{ApiError, ExchangeApi, OrderBookSnapshot};
use crate::config::{BotConfig, PricingStrategy};
use crate::realtime::RealtimeClient;
use crate::session::{ExecutionSession, SessionSummary};
use crate::shutdown::ShutdownToken;
use crate::strategy::{self, StrategyError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error("amount {amount} is below the {market} minimum {minimum}")]
    BelowMinimum {
        market: &'static str,
        amount: Decimal,
        minimum: Decimal,
    },

    #[error("order book has no {0} levels")]
    EmptyBook(&'static str),

    #[error("insufficient {currency} balance: have {available}, need {needed}")]
    InsufficientFunds {
        currency: String,
        available: Decimal,
        needed: Decimal,
    },
}

impl EngineError {
    /// Fatal errors end the run; everything else is retried on the next
    /// monitoring iteration.
    fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Api(ApiError::Auth)
                | EngineError::Api(ApiError::InsufficientBalance(_))
                | EngineError::InsufficientFunds { .. }
        )
    }
}

/// How a run ended. Every variant converges on the same summary emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// The order filled completely.
    Completed,
    /// Someone outside this process canceled the order.
    ExternallyCanceled,
    /// The unexecuted remainder can no longer sustain a valid order.
    RemainderBelowMinimum,
    /// Shutdown was requested mid-run.
    Interrupted,
}

/// The engine's slot for the single order it may have resting.
#[derive(Debug, Clone)]
struct ActiveOrder {
    id: String,
    price: Decimal,
    /// An engine-issued cancel is awaiting confirmation. While set, a
    /// canceling/canceled state observed for this order resumes the
    /// replace path rather than finishing as an external cancellation.
    cancel_requested: bool,
}

pub struct TradingBot<A> {
    api: Arc<A>,
    config: BotConfig,
    shutdown: ShutdownToken,
    realtime: Option<RealtimeClient>,
    slot: Option<ActiveOrder>,
    last_action: Option<Instant>,
    dry_run_counter: u64,
}

impl<A: ExchangeApi> TradingBot<A> {
    pub fn new(api: Arc<A>, config: BotConfig, shutdown: ShutdownToken) -> Self {
        Self {
            api,
            config,
            shutdown,
            realtime: None,
            slot: None,
            last_action: None,
            dry_run_counter: 0,
        }
    }

    /// Use a pre-built realtime session instead of connecting one. The
    /// session's caches are consulted as-is; the engine does not start it.
    pub fn with_realtime_session(mut self, session: RealtimeClient) -> Self {
        self.realtime = Some(session);
        self
    }

    /// Spend `quote_amount` of the quote currency buying the base asset.
    /// Blocks for the run's duration and returns the final accounting.
    pub async fn execute_buy(&mut self, quote_amount: Decimal) -> Result<SessionSummary, EngineError> {
        self.run(Side::Buy, quote_amount).await
    }

    /// Sell `base_amount` of the base asset for the quote currency.
    pub async fn execute_sell(&mut self, base_amount: Decimal) -> Result<SessionSummary, EngineError> {
        self.run(Side::Sell, base_amount).await
    }

    async fn run(&mut self, side: Side, target: Decimal) -> Result<SessionSummary, EngineError> {
        let market = self.config.market;
        info!(
            market = market.id,
            %side,
            %target,
            strategy = ?self.config.strategy,
            interval = ?self.config.interval,
            dry_run = self.config.dry_run,
            "starting execution run"
        );

        self.validate_target(side, target)?;
        self.check_balance(side, target).await?;

        let mut session = ExecutionSession::new(side, market, target);
        self.start_realtime().await;

        let result = self.run_session(&mut session).await;

        // Wind-down: best-effort cancel of anything still resting, with the
        // same fold-partial-fill discipline as a normal reprice.
        if let Err(e) = self.release_slot(&mut session).await {
            warn!(error = %e, "failed to cancel resting order during wind-down");
        }
        self.stop_realtime().await;

        session.log_summary();
        match result {
            Ok(outcome) => {
                info!(?outcome, "execution run finished");
                Ok(session.summary())
            }
            Err(e) => Err(e),
        }
    }

    fn validate_target(&self, side: Side, target: Decimal) -> Result<(), EngineError> {
        let market = self.config.market;
        let minimum = match side {
            Side::Buy => market.min_quote_amount,
            Side::Sell => market.min_base_amount,
        };
        if target < minimum {
            return Err(EngineError::BelowMinimum {
                market: market.id,
                amount: target,
                minimum,
            });
        }
        Ok(())
    }

    async fn check_balance(&self, side: Side, target: Decimal) -> Result<(), EngineError> {
        let market = self.config.market;
        let currency = match side {
            Side::Buy => market.quote,
            Side::Sell => market.base,
        };
        let balance = self.api.get_balance(currency).await?;
        info!(
            currency,
            available = %balance.available,
            frozen = %balance.frozen,
            "balance checked"
        );
        if balance.available < target {
            return Err(EngineError::InsufficientFunds {
                currency: currency.to_string(),
                available: balance.available,
                needed: target,
            });
        }
        Ok(())
    }

    async fn start_realtime(&mut self) {
        if !self.config.realtime {
            info!("realtime session disabled, monitoring over REST");
            return;
        }
        if self.realtime.is_none() {
            let pubsub_key = if self.config.dry_run {
                None
            } else {
                match self.api.get_session_key().await {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(error = %e, "realtime order channel unavailable");
                        None
                    }
                }
            };

            let mut realtime = RealtimeClient::new(self.config.market, pubsub_key);
            realtime.start();
            self.realtime = Some(realtime);
        }
        if let Some(realtime) = &self.realtime {
            if !realtime.book.wait_ready(self.config.book_ready_timeout).await {
                warn!("realtime book not ready, using REST until it catches up");
            }
        }
    }

    async fn stop_realtime(&mut self) {
        if let Some(mut realtime) = self.realtime.take() {
            realtime.stop().await;
        }
    }

    /// The monitoring loop. Returns how the run ended; only fatal errors
    /// escape as `Err`.
    async fn run_session(&mut self, session: &mut ExecutionSession) -> Result<Outcome, EngineError> {
        match self.place_for_remaining(session).await {
            Ok(true) => {}
            Ok(false) => return Ok(Outcome::RemainderBelowMinimum),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(error = %e, "initial placement failed, retrying next interval"),
        }

        let mut last_reconcile = Instant::now();

        loop {
            if self.shutdown.is_triggered() {
                return Ok(Outcome::Interrupted);
            }

            self.wait_for_tick().await;

            if self.shutdown.is_triggered() {
                return Ok(Outcome::Interrupted);
            }

            if last_reconcile.elapsed() >= self.config.reconcile_interval {
                match self.fetch_book().await {
                    Ok(_) => debug!("book reconciled from REST snapshot"),
                    Err(e) => warn!(error = %e, "reconciliation failed"),
                }
                last_reconcile = Instant::now();
            }

            match self.step(session).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(error = %e, "iteration error, retrying next interval"),
            }
        }
    }

    /// Wake on a top-of-book change, the monitoring interval, or shutdown,
    /// whichever comes first.
    async fn wait_for_tick(&self) {
        let interval = self.config.interval;
        match &self.realtime {
            Some(realtime) => {
                tokio::select! {
                    _ = realtime.book.wait_for_top_change(interval) => {}
                    _ = self.shutdown.cancelled() => {}
                }
            }
            None => {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = self.shutdown.cancelled() => {}
                }
            }
        }
    }

    /// One monitoring iteration.
    async fn step(&mut self, session: &mut ExecutionSession) -> Result<Option<Outcome>, EngineError> {
        let market = self.config.market;

        let Some(active) = self.slot.clone() else {
            // A previous cycle freed the slot without replacing the order.
            return if self.place_for_remaining(session).await? {
                Ok(None)
            } else {
                Ok(Some(Outcome::RemainderBelowMinimum))
            };
        };

        let order = self.order_state(&active.id).await?;

        if let Some((base, quote)) = session.observe_order(order.traded_amount, order.total_exchanged)
        {
            info!(
                fill = %format_crypto(base, market.base),
                spent = %format_clp(quote),
                "partial fill"
            );
            session.log_progress();
        }

        match order.status {
            OrderStatus::Traded => {
                session.fold_order(order.traded_amount, order.total_exchanged);
                self.slot = None;
                info!(order_id = %active.id, "order fully executed");
                Ok(Some(Outcome::Completed))
            }
            OrderStatus::CanceledAndTraded => {
                warn!(order_id = %active.id, "order partially executed then canceled");
                session.fold_order(order.traded_amount, order.total_exchanged);
                self.slot = None;
                session.log_progress();
                if self.place_for_remaining(session).await? {
                    Ok(None)
                } else {
                    Ok(Some(Outcome::RemainderBelowMinimum))
                }
            }
            // With no cancel of ours in flight, a canceling state seen
            // here is external and ends the run. A pending cancel whose
            // confirmation timed out instead keeps settling across
            // iterations and, once terminal, resumes the replace path.
            OrderStatus::Canceled | OrderStatus::Canceling => {
                if active.cancel_requested {
                    if order.status == OrderStatus::Canceling {
                        debug!(order_id = %active.id, "cancel still settling");
                        return Ok(None);
                    }
                    info!(order_id = %active.id, "pending cancel confirmed");
                    session.fold_order(order.traded_amount, order.total_exchanged);
                    self.slot = None;
                    return if self.place_for_remaining(session).await? {
                        Ok(None)
                    } else {
                        Ok(Some(Outcome::RemainderBelowMinimum))
                    };
                }
                warn!(order_id = %active.id, "order canceled externally, finishing");
                session.fold_order(order.traded_amount, order.total_exchanged);
                self.slot = None;
                Ok(Some(Outcome::ExternallyCanceled))
            }
            OrderStatus::Pending | OrderStatus::Unknown => {
                if active.cancel_requested {
                    // The cancel request has not surfaced in the order's
                    // state yet; never issue a second one.
                    debug!(order_id = %active.id, "cancel still settling");
                    return Ok(None);
                }
                if !self.needs_reposition(session.side(), active.price).await? {
                    debug!(price = %active.price, "still best positioned");
                    return Ok(None);
                }
                if let Some(last) = self.last_action {
                    if last.elapsed() < self.config.min_action_interval {
                        debug!("reposition debounced");
                        return Ok(None);
                    }
                }
                self.reprice(session).await
            }
        }
    }

    async fn needs_reposition(&mut self, side: Side, current_price: Decimal) -> Result<bool, EngineError> {
        match self.config.strategy {
            PricingStrategy::Top => {
                let (best_bid, best_ask) = self.best_prices().await?;
                let outpriced = match side {
                    Side::Buy => current_price < best_bid,
                    Side::Sell => current_price > best_ask,
                };
                if outpriced {
                    warn!(
                        current = %current_price,
                        best_bid = %best_bid,
                        best_ask = %best_ask,
                        "order no longer best positioned"
                    );
                }
                Ok(outpriced)
            }
            PricingStrategy::Depth => {
                let target = self.target_price(side).await?;
                Ok(target != current_price)
            }
        }
    }

    /// Cancel the resting order, wait for confirmation, fold whatever
    /// traded, then place a replacement for the remainder.
    async fn reprice(&mut self, session: &mut ExecutionSession) -> Result<Option<Outcome>, EngineError> {
        let Some(active) = self.slot.clone() else {
            return Ok(None);
        };
        let market = self.config.market;
        info!(order_id = %active.id, price = %active.price, "repositioning order");

        let Some(final_state) = self.cancel_and_confirm(&active.id).await? else {
            // Two live orders is worse than one stale price. Remember the
            // in-flight cancel so later iterations keep confirming it.
            warn!(order_id = %active.id, "cancel unconfirmed, resuming next cycle");
            if let Some(slot) = self.slot.as_mut() {
                slot.cancel_requested = true;
            }
            return Ok(None);
        };

        session.fold_order(final_state.traded_amount, final_state.total_exchanged);
        self.slot = None;
        if final_state.traded_amount > Decimal::ZERO {
            info!(
                filled = %format_crypto(final_state.traded_amount, market.base),
                "fill captured before cancel"
            );
            session.log_progress();
        }

        if final_state.status == OrderStatus::Traded {
            info!(order_id = %active.id, "order filled before cancel landed");
            return Ok(Some(Outcome::Completed));
        }

        if self.place_for_remaining(session).await? {
            Ok(None)
        } else {
            Ok(Some(Outcome::RemainderBelowMinimum))
        }
    }

    /// Request cancellation and poll until a terminal state is observed.
    /// Returns `None` when confirmation times out; the slot stays occupied.
    async fn cancel_and_confirm(&mut self, order_id: &str) -> Result<Option<OrderSnapshot>, EngineError> {
        if self.config.dry_run {
            info!(order_id, "[dry-run] would cancel order");
            self.last_action = Some(Instant::now());
            return Ok(Some(OrderSnapshot {
                id: order_id.to_string(),
                status: OrderStatus::Canceled,
                traded_amount: Decimal::ZERO,
                limit_price: Decimal::ZERO,
                total_exchanged: Decimal::ZERO,
            }));
        }

        let snapshot = self.api.cancel_order(order_id).await?;
        self.last_action = Some(Instant::now());
        if snapshot.status.is_terminal() {
            return Ok(Some(snapshot));
        }

        for _ in 0..self.config.cancel_confirm_retries {
            tokio::time::sleep(self.config.cancel_confirm_delay).await;
            // REST is authoritative here; the order cache may lag.
            let snapshot = self.api.get_order(order_id).await?;
            if snapshot.status.is_terminal() {
                return Ok(Some(snapshot));
            }
        }
        Ok(None)
    }

    /// Place an order for the session's unexecuted remainder. Returns
    /// `false` when the remainder is below the market minimum.
    async fn place_for_remaining(&mut self, session: &mut ExecutionSession) -> Result<bool, EngineError> {
        let market = self.config.market;
        let side = session.side();

        if !session.can_continue() {
            warn!(
                remaining = %session.remaining(),
                "remainder below market minimum, finishing"
            );
            return Ok(false);
        }
        let remaining = session.remaining();

        let price = self.target_price(side).await?;
        let amount = match side {
            Side::Buy => base_amount_for_quote(remaining, price, market.min_base_amount),
            Side::Sell => floor_to_base_precision(remaining),
        };
        if amount < market.min_base_amount || amount.is_zero() {
            warn!(
                %amount,
                minimum = %market.min_base_amount,
                "computed amount below market minimum, finishing"
            );
            return Ok(false);
        }

        let order = self.place_order(side, amount, price).await?;
        info!(
            order_id = %order.id,
            price = %format_limit_price(price, market.price_tick),
            amount = %format_crypto(amount, market.base),
            "order placed"
        );
        self.slot = Some(ActiveOrder {
            id: order.id,
            price,
            cancel_requested: false,
        });
        self.last_action = Some(Instant::now());
        Ok(true)
    }

    async fn place_order(
        &mut self,
        side: Side,
        amount: Decimal,
        price: Decimal,
    ) -> Result<OrderSnapshot, EngineError> {
        let market = self.config.market;
        if self.config.dry_run {
            self.dry_run_counter += 1;
            info!(
                %side,
                amount = %format_crypto(amount, market.base),
                price = %format_limit_price(price, market.price_tick),
                total = %format_clp(amount * price),
                "[dry-run] would place order"
            );
            return Ok(OrderSnapshot {
                id: format!("dry-run-{}", self.dry_run_counter),
                status: OrderStatus::Pending,
                traded_amount: Decimal::ZERO,
                limit_price: price,
                total_exchanged: Decimal::ZERO,
            });
        }
        Ok(self
            .api
            .create_limit_order(market.id, side, amount, price)
            .await?)
    }

    async fn target_price(&mut self, side: Side) -> Result<Decimal, EngineError> {
        let tick = self.config.market.price_tick;
        match self.config.strategy {
            PricingStrategy::Top => {
                let (best_bid, best_ask) = self.best_prices().await?;
                Ok(strategy::top_price(side, best_bid, best_ask, tick))
            }
            PricingStrategy::Depth => {
                let (bids, asks) = self.book_sides().await?;
                let levels = match side {
                    Side::Buy => bids,
                    Side::Sell => asks,
                };
                Ok(strategy::depth_price(side, &levels, self.config.depth_ratio, tick)?)
            }
        }
    }

    /// Latest order state: dry-run synthesizes a resting order, otherwise
    /// the realtime cache is consulted before falling back to REST.
    async fn order_state(&self, order_id: &str) -> Result<OrderSnapshot, EngineError> {
        if self.config.dry_run {
            return Ok(OrderSnapshot {
                id: order_id.to_string(),
                status: OrderStatus::Pending,
                traded_amount: Decimal::ZERO,
                limit_price: Decimal::ZERO,
                total_exchanged: Decimal::ZERO,
            });
        }
        if let Some(realtime) = &self.realtime {
            if let Some(order) = realtime.orders.get_order(order_id) {
                return Ok(order);
            }
        }
        Ok(self.api.get_order(order_id).await?)
    }

    /// Best bid and ask, from the realtime cache when fresh, otherwise a
    /// REST snapshot that also re-primes the cache.
    async fn best_prices(&self) -> Result<(Decimal, Decimal), EngineError> {
        if let Some(realtime) = &self.realtime {
            if !realtime.book.is_stale(self.config.staleness_threshold()) {
                if let Some(best) = realtime.book.get_best() {
                    return Ok(best);
                }
            } else if let Some(age) = realtime.book.age() {
                warn!(age = ?age, "realtime book stale, falling back to REST");
            }
        }
        let snapshot = self.fetch_book().await?;
        Ok((snapshot.bids[0].price, snapshot.asks[0].price))
    }

    /// Full book sides ordered touch-first, for the depth strategy.
    async fn book_sides(&self) -> Result<(Vec<PriceLevel>, Vec<PriceLevel>), EngineError> {
        if let Some(realtime) = &self.realtime {
            if !realtime.book.is_stale(self.config.staleness_threshold()) {
                let (bids, asks) = realtime.book.get_snapshot();
                if !bids.is_empty() && !asks.is_empty() {
                    return Ok((bids, asks));
                }
            }
        }
        let snapshot = self.fetch_book().await?;
        Ok((snapshot.bids, snapshot.asks))
    }

    async fn fetch_book(&self) -> Result<OrderBookSnapshot, EngineError> {
        let snapshot = self.api.get_order_book(self.config.market.id).await?;
        if snapshot.bids.is_empty() {
            return Err(EngineError::EmptyBook("bid"));
        }
        if snapshot.asks.is_empty() {
            return Err(EngineError::EmptyBook("ask"));
        }
        if let Some(realtime) = &self.realtime {
            realtime.book.apply_snapshot(&snapshot.bids, &snapshot.asks);
        }
        Ok(snapshot)
    }

    /// Cancel whatever is resting in the slot, folding late fills into the
    /// session. A no-op when the slot is empty.
    async fn release_slot(&mut self, session: &mut ExecutionSession) -> Result<(), EngineError> {
        let Some(active) = self.slot.clone() else {
            return Ok(());
        };
        let market = self.config.market;
        info!(order_id = %active.id, "canceling resting order");

        match self.cancel_and_confirm(&active.id).await? {
            Some(final_state) => {
                session.fold_order(final_state.traded_amount, final_state.total_exchanged);
                self.slot = None;
                if final_state.traded_amount > Decimal::ZERO {
                    info!(
                        filled = %format_crypto(final_state.traded_amount, market.base),
                        "partial fill captured before shutdown cancel"
                    );
                }
            }
            None => warn!(
                order_id = %active.id,
                "cancel unconfirmed, order may remain live on the exchange"
            ),
        }
        Ok(())
    }
}
