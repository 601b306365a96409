//! Shared order-book cache fed by the realtime session.
//!
//! One mutex guards both sides; the engine reads under the same lock the
//! channel tasks write under. Change signalling uses a single-permit
//! `Notify`: `notify_one` stores a permit when nobody is parked, so a
//! change landing between two waits is seen by the next wait, and bursts
//! coalesce into one wakeup instead of queueing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::Notify;

use buda_common::{PriceLevel, Side};

#[derive(Debug, Default)]
struct BookInner {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_update: Option<Instant>,
}

/// Thread-safe order book state with top-of-book access.
#[derive(Debug, Default)]
pub struct OrderBookState {
    inner: Mutex<BookInner>,
    ready: AtomicBool,
    ready_notify: Notify,
    top_changed: Notify,
}

impl OrderBookState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire book atomically and mark the cache ready.
    pub fn apply_snapshot(&self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        {
            let mut inner = self.inner.lock();
            inner.bids = Self::collect_side(bids);
            inner.asks = Self::collect_side(asks);
            inner.last_update = Some(Instant::now());
        }
        self.mark_ready();
        self.top_changed.notify_one();
    }

    /// Upsert or remove a single price level.
    ///
    /// A non-positive amount removes the level; levels are never stored
    /// at zero. The first delta also readies the cache: streams may emit
    /// deltas before any snapshot, and one delta is enough to answer
    /// best-price queries.
    pub fn apply_change(&self, side: Side, price: Decimal, amount: Decimal) {
        {
            let mut inner = self.inner.lock();
            let book = match side {
                Side::Buy => &mut inner.bids,
                Side::Sell => &mut inner.asks,
            };
            if amount <= Decimal::ZERO {
                book.remove(&price);
            } else {
                book.insert(price, amount);
            }
            inner.last_update = Some(Instant::now());
        }
        self.mark_ready();
        self.top_changed.notify_one();
    }

    /// Best bid and ask, or `None` while not ready or either side is empty.
    pub fn get_best(&self) -> Option<(Decimal, Decimal)> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        let inner = self.inner.lock();
        let best_bid = *inner.bids.last_key_value()?.0;
        let best_ask = *inner.asks.first_key_value()?.0;
        Some((best_bid, best_ask))
    }

    /// Full copy of both sides: bids descending, asks ascending.
    pub fn get_snapshot(&self) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        let inner = self.inner.lock();
        let bids = inner
            .bids
            .iter()
            .rev()
            .map(|(&price, &amount)| PriceLevel::new(price, amount))
            .collect();
        let asks = inner
            .asks
            .iter()
            .map(|(&price, &amount)| PriceLevel::new(price, amount))
            .collect();
        (bids, asks)
    }

    /// True when no update has landed within `max_age` (or ever).
    pub fn is_stale(&self, max_age: Duration) -> bool {
        if !self.ready.load(Ordering::Acquire) {
            return true;
        }
        match self.inner.lock().last_update {
            Some(at) => at.elapsed() > max_age,
            None => true,
        }
    }

    /// Time since the last update, `None` before the first one.
    pub fn age(&self) -> Option<Duration> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        self.inner.lock().last_update.map(|at| at.elapsed())
    }

    /// Clear all state and un-ready the cache. Used on stream reconnect
    /// so partial data from a new connection is never merged with stale
    /// levels from the old one.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.bids.clear();
        inner.asks.clear();
        inner.last_update = None;
        self.ready.store(false, Ordering::Release);
    }

    /// Wait for the first snapshot or delta, up to `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.ready.load(Ordering::Acquire) {
                return true;
            }
            let notified = self.ready_notify.notified();
            if self.ready.load(Ordering::Acquire) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.ready.load(Ordering::Acquire);
            }
        }
    }

    /// Wait until any mutation since the previous call, or `timeout`.
    /// Returns whether a change was observed.
    pub async fn wait_for_top_change(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.top_changed.notified())
            .await
            .is_ok()
    }

    fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
        self.ready_notify.notify_waiters();
    }

    fn collect_side(levels: &[PriceLevel]) -> BTreeMap<Decimal, Decimal> {
        levels
            .iter()
            .filter(|l| l.amount > Decimal::ZERO)
            .map(|l| (l.price, l.amount))
            .collect()
    }
}
