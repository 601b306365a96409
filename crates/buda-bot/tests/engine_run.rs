//! End-to-end engine runs against a scripted exchange mock.
//!
//! The mock returns canned order states per order id (repeating the last
//! entry once a script is exhausted), so each test drives the monitoring
//! loop through a specific lifecycle without real network access.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use buda_bot::api::{ApiError, Balance, ExchangeApi, OrderBookSnapshot};
use buda_bot::{BotConfig, EngineError, RealtimeClient, ShutdownToken, TradingBot};
use buda_common::{MarketSpec, OrderSnapshot, OrderStatus, PriceLevel, Side};

#[derive(Default)]
struct MockState {
    available: Decimal,
    /// Book snapshots served in order; the last one repeats.
    books: VecDeque<OrderBookSnapshot>,
    /// Per-order state scripts; the last entry repeats.
    order_scripts: HashMap<String, VecDeque<OrderSnapshot>>,
    /// What `cancel_order` returns per id.
    cancel_results: HashMap<String, OrderSnapshot>,
    placed: Vec<(Side, Decimal, Decimal)>,
    canceled: Vec<String>,
    book_fetches: usize,
    next_order: u64,
}

#[derive(Default)]
struct MockApi {
    state: Mutex<MockState>,
}

impl MockApi {
    fn new(available: Decimal, books: Vec<OrderBookSnapshot>) -> Self {
        let api = MockApi::default();
        {
            let mut state = api.state.lock();
            state.available = available;
            state.books = books.into();
        }
        api
    }

    fn script_order(&self, id: &str, states: Vec<OrderSnapshot>) {
        self.state
            .lock()
            .order_scripts
            .insert(id.to_string(), states.into());
    }

    fn script_cancel(&self, id: &str, result: OrderSnapshot) {
        self.state.lock().cancel_results.insert(id.to_string(), result);
    }

    fn placed(&self) -> Vec<(Side, Decimal, Decimal)> {
        self.state.lock().placed.clone()
    }

    fn canceled(&self) -> Vec<String> {
        self.state.lock().canceled.clone()
    }

    fn book_fetches(&self) -> usize {
        self.state.lock().book_fetches
    }
}

#[async_trait]
impl ExchangeApi for MockApi {
    async fn get_balance(&self, currency: &str) -> Result<Balance, ApiError> {
        Ok(Balance {
            currency: currency.to_string(),
            available: self.state.lock().available,
            frozen: Decimal::ZERO,
        })
    }

    async fn get_order_book(&self, _market_id: &str) -> Result<OrderBookSnapshot, ApiError> {
        let mut state = self.state.lock();
        state.book_fetches += 1;
        if state.books.is_empty() {
            return Err(ApiError::Api("no book scripted".to_string()));
        }
        if state.books.len() > 1 {
            Ok(state.books.pop_front().unwrap())
        } else {
            Ok(state.books.front().unwrap().clone())
        }
    }

    async fn create_limit_order(
        &self,
        _market_id: &str,
        side: Side,
        amount: Decimal,
        limit_price: Decimal,
    ) -> Result<OrderSnapshot, ApiError> {
        let mut state = self.state.lock();
        state.next_order += 1;
        let id = format!("O-{}", state.next_order);
        state.placed.push((side, amount, limit_price));
        Ok(OrderSnapshot {
            id,
            status: OrderStatus::Pending,
            traded_amount: Decimal::ZERO,
            limit_price,
            total_exchanged: Decimal::ZERO,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<OrderSnapshot, ApiError> {
        let mut state = self.state.lock();
        state.canceled.push(order_id.to_string());
        Ok(state
            .cancel_results
            .get(order_id)
            .cloned()
            .unwrap_or(OrderSnapshot {
                id: order_id.to_string(),
                status: OrderStatus::Canceled,
                traded_amount: Decimal::ZERO,
                limit_price: Decimal::ZERO,
                total_exchanged: Decimal::ZERO,
            }))
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderSnapshot, ApiError> {
        let mut state = self.state.lock();
        let script = state
            .order_scripts
            .get_mut(order_id)
            .ok_or_else(|| ApiError::Api(format!("unknown order {order_id}")))?;
        if script.len() > 1 {
            Ok(script.pop_front().unwrap())
        } else {
            script
                .front()
                .cloned()
                .ok_or_else(|| ApiError::Api("empty script".to_string()))
        }
    }

    async fn get_session_key(&self) -> Result<Option<String>, ApiError> {
        Ok(None)
    }

    async fn get_ticker(&self, _market_id: &str) -> Result<Decimal, ApiError> {
        Ok(dec!(100))
    }
}

fn book(bid: Decimal, ask: Decimal) -> OrderBookSnapshot {
    OrderBookSnapshot {
        bids: vec![PriceLevel::new(bid, dec!(5))],
        asks: vec![PriceLevel::new(ask, dec!(5))],
    }
}

fn order(id: &str, status: OrderStatus, traded_base: Decimal, traded_quote: Decimal) -> OrderSnapshot {
    OrderSnapshot {
        id: id.to_string(),
        status,
        traded_amount: traded_base,
        limit_price: Decimal::ZERO,
        total_exchanged: traded_quote,
    }
}

fn test_config() -> BotConfig {
    let market = MarketSpec::for_market("btc-clp").unwrap();
    let mut config = BotConfig::new(market);
    config.interval = Duration::from_millis(10);
    // No live websocket session in tests; the engine polls the mock.
    config.realtime = false;
    config.min_action_interval = Duration::ZERO;
    config.reconcile_interval = Duration::from_secs(300);
    config.cancel_confirm_retries = 5;
    config.cancel_confirm_delay = Duration::from_millis(1);
    config.book_ready_timeout = Duration::from_millis(20);
    config
}

#[tokio::test]
async fn full_fill_completes_the_run() {
    // bid 99 / ask 105, tick 1 -> top buy price 100.
    let api = Arc::new(MockApi::new(dec!(1000000), vec![book(dec!(99), dec!(105))]));
    api.script_order(
        "O-1",
        vec![
            order("O-1", OrderStatus::Pending, dec!(0), dec!(0)),
            order("O-1", OrderStatus::Traded, dec!(100), dec!(10000)),
        ],
    );

    let mut bot = TradingBot::new(Arc::clone(&api), test_config(), ShutdownToken::new());
    let summary = bot.execute_buy(dec!(10000)).await.unwrap();

    assert_eq!(summary.executed_quote, dec!(10000));
    assert_eq!(summary.executed_base, dec!(100));
    assert_eq!(summary.remaining, dec!(0));
    assert_eq!(summary.average_price, Some(dec!(100)));

    let placed = api.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0], (Side::Buy, dec!(100), dec!(100)));
    assert!(api.canceled().is_empty());
}

#[tokio::test]
async fn partial_fill_then_cancel_replaces_remainder() {
    let api = Arc::new(MockApi::new(dec!(1000000), vec![book(dec!(99), dec!(105))]));
    // First order force-replaced externally after a 6000 CLP fill.
    api.script_order(
        "O-1",
        vec![order("O-1", OrderStatus::CanceledAndTraded, dec!(60), dec!(6000))],
    );
    api.script_order(
        "O-2",
        vec![order("O-2", OrderStatus::Traded, dec!(40), dec!(4000))],
    );

    let mut bot = TradingBot::new(Arc::clone(&api), test_config(), ShutdownToken::new());
    let summary = bot.execute_buy(dec!(10000)).await.unwrap();

    assert_eq!(summary.executed_quote, dec!(10000));
    assert_eq!(summary.executed_base, dec!(100));
    assert_eq!(summary.remaining, dec!(0));

    // The replacement carries the remaining 4000 CLP at the fresh price.
    let placed = api.placed();
    assert_eq!(placed.len(), 2);
    assert_eq!(placed[1], (Side::Buy, dec!(40), dec!(100)));
}

#[tokio::test]
async fn external_cancel_finishes_without_cancel_call() {
    let api = Arc::new(MockApi::new(dec!(1000000), vec![book(dec!(99), dec!(105))]));
    api.script_order(
        "O-1",
        vec![order("O-1", OrderStatus::Canceled, dec!(0), dec!(0))],
    );

    let mut bot = TradingBot::new(Arc::clone(&api), test_config(), ShutdownToken::new());
    let summary = bot.execute_buy(dec!(10000)).await.unwrap();

    assert_eq!(summary.executed_quote, dec!(0));
    assert_eq!(summary.remaining, dec!(10000));
    // Nothing left in the slot, so wind-down cancels nothing.
    assert!(api.canceled().is_empty());
}

#[tokio::test]
async fn remainder_below_minimum_finishes_with_shortfall() {
    let api = Arc::new(MockApi::new(dec!(1000000), vec![book(dec!(99), dec!(105))]));
    // 8500 of 10000 executed; the 1500 CLP remainder is below the 2000 minimum.
    api.script_order(
        "O-1",
        vec![order("O-1", OrderStatus::CanceledAndTraded, dec!(85), dec!(8500))],
    );

    let mut bot = TradingBot::new(Arc::clone(&api), test_config(), ShutdownToken::new());
    let summary = bot.execute_buy(dec!(10000)).await.unwrap();

    assert_eq!(summary.executed_quote, dec!(8500));
    assert_eq!(summary.remaining, dec!(1500));
    assert_eq!(api.placed().len(), 1);
}

#[tokio::test]
async fn outbid_order_is_repriced() {
    // The book moves from bid 99 to bid 102 on the next REST refresh.
    let api = Arc::new(MockApi::new(
        dec!(1000000),
        vec![book(dec!(99), dec!(105)), book(dec!(102), dec!(105))],
    ));
    api.script_order(
        "O-1",
        vec![order("O-1", OrderStatus::Pending, dec!(0), dec!(0))],
    );
    api.script_cancel("O-1", order("O-1", OrderStatus::Canceled, dec!(0), dec!(0)));
    api.script_order(
        "O-2",
        vec![order("O-2", OrderStatus::Traded, dec!(97.08737864), dec!(10000))],
    );

    let mut bot = TradingBot::new(Arc::clone(&api), test_config(), ShutdownToken::new());
    let summary = bot.execute_buy(dec!(10000)).await.unwrap();

    assert_eq!(api.canceled(), vec!["O-1".to_string()]);
    let placed = api.placed();
    assert_eq!(placed.len(), 2);
    assert_eq!(placed[0].2, dec!(100));
    // Repriced one tick inside the new best bid.
    assert_eq!(placed[1].2, dec!(103));
    assert_eq!(summary.executed_quote, dec!(10000));
}

#[tokio::test]
async fn unconfirmed_cancel_resumes_and_replaces_remainder() {
    // The book moves, a reprice is triggered, but the cancel only reaches
    // `canceling` and outlives the bounded confirmation poll. The run must
    // keep confirming across iterations and replace the order once the
    // cancel lands, not finish as an external cancellation.
    let api = Arc::new(MockApi::new(
        dec!(1000000),
        vec![book(dec!(99), dec!(105)), book(dec!(102), dec!(105))],
    ));
    api.script_cancel("O-1", order("O-1", OrderStatus::Canceling, dec!(0), dec!(0)));
    // One state per poll: pending at first sight, canceling past the two
    // confirmation retries, canceled two iterations later.
    api.script_order(
        "O-1",
        vec![
            order("O-1", OrderStatus::Pending, dec!(0), dec!(0)),
            order("O-1", OrderStatus::Canceling, dec!(0), dec!(0)),
            order("O-1", OrderStatus::Canceling, dec!(0), dec!(0)),
            order("O-1", OrderStatus::Canceling, dec!(0), dec!(0)),
            order("O-1", OrderStatus::Canceled, dec!(0), dec!(0)),
        ],
    );
    api.script_order(
        "O-2",
        vec![order("O-2", OrderStatus::Traded, dec!(97.08737864), dec!(10000))],
    );

    let mut config = test_config();
    config.cancel_confirm_retries = 2;

    let mut bot = TradingBot::new(Arc::clone(&api), config, ShutdownToken::new());
    let summary = bot.execute_buy(dec!(10000)).await.unwrap();

    // The cancel was issued once and never re-requested while settling.
    assert_eq!(api.canceled(), vec!["O-1".to_string()]);
    let placed = api.placed();
    assert_eq!(placed.len(), 2);
    assert_eq!(placed[1], (Side::Buy, dec!(97.08737864), dec!(103)));
    assert_eq!(summary.executed_quote, dec!(10000));
    assert_eq!(summary.remaining, dec!(0));
}

#[tokio::test]
async fn reconciliation_reapplies_rest_snapshot() {
    // The websocket book goes quiet while the market moves; the periodic
    // reconciliation pass must refetch the REST book, re-apply it as a
    // snapshot, and let the reprice follow from the refreshed cache.
    let api = Arc::new(MockApi::new(
        dec!(1000000),
        vec![book(dec!(99), dec!(105)), book(dec!(102), dec!(105))],
    ));
    api.script_order(
        "O-1",
        vec![order("O-1", OrderStatus::Pending, dec!(0), dec!(0))],
    );
    api.script_order(
        "O-2",
        vec![order("O-2", OrderStatus::Traded, dec!(97.08737864), dec!(10000))],
    );

    // Reconciliation fires well before the cache would go stale, so the
    // second snapshot can only come from the reconciliation fetch.
    let market = MarketSpec::for_market("btc-clp").unwrap();
    let mut config = test_config();
    config.interval = Duration::from_millis(30);
    config.reconcile_interval = Duration::from_millis(40);

    let session = RealtimeClient::new(market, None);
    let mut bot = TradingBot::new(Arc::clone(&api), config, ShutdownToken::new())
        .with_realtime_session(session);
    let summary = bot.execute_buy(dec!(10000)).await.unwrap();

    // One fetch primed the cache at placement, one reconciled it; the
    // repositioning checks in between were served from the cache.
    assert_eq!(api.book_fetches(), 2);
    assert_eq!(api.canceled(), vec!["O-1".to_string()]);
    let placed = api.placed();
    assert_eq!(placed.len(), 2);
    assert_eq!(placed[1].2, dec!(103));
    assert_eq!(summary.executed_quote, dec!(10000));
}

#[tokio::test]
async fn interrupt_cancels_and_folds_late_fill() {
    let api = Arc::new(MockApi::new(dec!(1000000), vec![book(dec!(99), dec!(105))]));
    api.script_order(
        "O-1",
        vec![order("O-1", OrderStatus::Pending, dec!(0), dec!(0))],
    );
    // The shutdown cancel discovers a fill that landed before the cancel.
    api.script_cancel(
        "O-1",
        order("O-1", OrderStatus::CanceledAndTraded, dec!(30), dec!(3000)),
    );

    let shutdown = ShutdownToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
    });

    let mut bot = TradingBot::new(Arc::clone(&api), test_config(), shutdown);
    let summary = bot.execute_buy(dec!(10000)).await.unwrap();

    assert_eq!(api.canceled(), vec!["O-1".to_string()]);
    assert_eq!(summary.executed_quote, dec!(3000));
    assert_eq!(summary.executed_base, dec!(30));
    assert_eq!(summary.remaining, dec!(7000));
}

#[tokio::test]
async fn sell_run_executes_base_target() {
    let api = Arc::new(MockApi::new(dec!(1000), vec![book(dec!(99), dec!(105))]));
    api.script_order(
        "O-1",
        vec![order("O-1", OrderStatus::Traded, dec!(50), dec!(5200))],
    );

    let mut bot = TradingBot::new(Arc::clone(&api), test_config(), ShutdownToken::new());
    let summary = bot.execute_sell(dec!(50)).await.unwrap();

    assert_eq!(summary.executed_base, dec!(50));
    assert_eq!(summary.executed_quote, dec!(5200));
    assert_eq!(summary.remaining, dec!(0));

    // Sell rests one tick inside the ask.
    let placed = api.placed();
    assert_eq!(placed[0], (Side::Sell, dec!(50), dec!(104)));
}

#[tokio::test]
async fn insufficient_balance_is_fatal_before_placing() {
    let api = Arc::new(MockApi::new(dec!(100), vec![book(dec!(99), dec!(105))]));

    let mut bot = TradingBot::new(Arc::clone(&api), test_config(), ShutdownToken::new());
    let err = bot.execute_buy(dec!(10000)).await.unwrap_err();

    assert!(matches!(err, EngineError::InsufficientFunds { .. }));
    assert!(api.placed().is_empty());
}

#[tokio::test]
async fn target_below_market_minimum_is_rejected() {
    let api = Arc::new(MockApi::new(dec!(1000000), vec![book(dec!(99), dec!(105))]));

    let mut bot = TradingBot::new(Arc::clone(&api), test_config(), ShutdownToken::new());
    let err = bot.execute_buy(dec!(1999)).await.unwrap_err();

    assert!(matches!(err, EngineError::BelowMinimum { .. }));
    assert!(api.placed().is_empty());
}
