//! Realtime subscriptions to Buda's pusher endpoint.
//!
//! Runs one background task per channel (public book keyed by market,
//! private orders keyed by the account pubsub key) with independent
//! reconnect loops. Each task feeds its shared cache; a corrupt message is
//! dropped with a debug log and never tears down the loop.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use buda_common::{MarketSpec, OrderSnapshot, PriceLevel, Side, decimal_from_value};

use crate::book::OrderBookState;
use crate::orders::OrderCache;
use crate::shutdown::ShutdownToken;

/// Realtime endpoint. One channel per connection.
const REALTIME_BASE_URL: &str = "wss://realtime.buda.com/sub";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How long `stop()` waits for a channel task before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Manages the realtime connections for one market.
pub struct RealtimeClient {
    book_url: String,
    orders_url: Option<String>,
    pub book: Arc<OrderBookState>,
    pub orders: Arc<OrderCache>,
    shutdown: ShutdownToken,
    handles: Vec<JoinHandle<()>>,
}

impl RealtimeClient {
    /// The orders channel is only opened when a pubsub key is available.
    pub fn new(market: &MarketSpec, pubsub_key: Option<String>) -> Self {
        let channel = market.realtime_channel();
        Self {
            book_url: format!("{REALTIME_BASE_URL}?channel=book%40{channel}"),
            orders_url: pubsub_key
                .map(|key| format!("{REALTIME_BASE_URL}?channel=orders%40{key}")),
            book: Arc::new(OrderBookState::new()),
            orders: Arc::new(OrderCache::new()),
            shutdown: ShutdownToken::new(),
            handles: Vec::new(),
        }
    }

    /// Spawn the channel tasks. Idempotent start is not supported; call once.
    pub fn start(&mut self) {
        let book_channel = Channel::Book(Arc::clone(&self.book));
        self.handles.push(tokio::spawn(run_channel(
            self.book_url.clone(),
            book_channel,
            self.shutdown.clone(),
        )));

        if let Some(url) = self.orders_url.clone() {
            let orders_channel = Channel::Orders(Arc::clone(&self.orders));
            self.handles
                .push(tokio::spawn(run_channel(url, orders_channel, self.shutdown.clone())));
        }
    }

    /// Stop both channel loops and close any live connection.
    ///
    /// Safe to call before `start()` or after a failed connect; tasks that
    /// do not wind down within [`STOP_TIMEOUT`] are aborted.
    pub async fn stop(&mut self) {
        self.shutdown.trigger();
        for handle in self.handles.drain(..) {
            let abort = handle.abort_handle();
            if timeout(STOP_TIMEOUT, handle).await.is_err() {
                warn!("realtime channel did not stop in time, aborting");
                abort.abort();
            }
        }
    }
}

/// A channel's cache binding. Decoding is shared; application differs.
enum Channel {
    Book(Arc<OrderBookState>),
    Orders(Arc<OrderCache>),
}

impl Channel {
    fn name(&self) -> &'static str {
        match self {
            Channel::Book(_) => "book",
            Channel::Orders(_) => "orders",
        }
    }

    fn on_connect(&self) {
        // Stale levels from the previous connection must not survive into
        // the fresh stream; the next sync repopulates the book.
        if let Channel::Book(book) = self {
            book.reset();
        }
    }

    fn handle(&self, text: &str) {
        let payload: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                debug!(channel = self.name(), "dropping non-JSON realtime message");
                return;
            }
        };
        match self {
            Channel::Book(book) => match decode_book_event(&payload) {
                Some(BookEvent::Sync { bids, asks }) => book.apply_snapshot(&bids, &asks),
                Some(BookEvent::Changes(changes)) => {
                    for (side, price, amount) in changes {
                        book.apply_change(side, price, amount);
                    }
                }
                None => debug!("dropping undecodable book message"),
            },
            Channel::Orders(orders) => match decode_order_event(&payload) {
                Some(order) => orders.update_from_event(order),
                None => debug!("dropping undecodable order message"),
            },
        }
    }
}

/// Runs one connection loop with exponential backoff until shutdown.
async fn run_channel(url: String, channel: Channel, shutdown: ShutdownToken) {
    let mut backoff = INITIAL_BACKOFF;

    while !shutdown.is_triggered() {
        debug!(channel = channel.name(), %url, "realtime connecting");

        let connected = tokio::select! {
            result = timeout(CONNECT_TIMEOUT, connect_async(&url)) => result,
            _ = shutdown.cancelled() => return,
        };
        let ws_stream = match connected {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                warn!(channel = channel.name(), error = %e, "realtime connect failed");
                if !backoff_or_shutdown(&mut backoff, &shutdown).await {
                    return;
                }
                continue;
            }
            Err(_) => {
                warn!(channel = channel.name(), "realtime connect timed out");
                if !backoff_or_shutdown(&mut backoff, &shutdown).await {
                    return;
                }
                continue;
            }
        };

        info!(channel = channel.name(), "realtime connected");
        backoff = INITIAL_BACKOFF;
        channel.on_connect();

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => channel.handle(&text),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            warn!(channel = channel.name(), error = %e, "pong failed");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(channel = channel.name(), ?frame, "realtime closed by server");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(channel = channel.name(), error = %e, "realtime read error");
                        break;
                    }
                    None => {
                        warn!(channel = channel.name(), "realtime stream ended");
                        break;
                    }
                    _ => {}
                },
                _ = shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    info!(channel = channel.name(), "realtime channel stopped");
                    return;
                }
            }
        }

        if !backoff_or_shutdown(&mut backoff, &shutdown).await {
            return;
        }
    }
}

/// Sleep the current backoff (doubling it for next time) unless shutdown
/// fires first. Returns false when the loop should exit.
async fn backoff_or_shutdown(backoff: &mut Duration, shutdown: &ShutdownToken) -> bool {
    if shutdown.is_triggered() {
        return false;
    }
    debug!(delay = ?*backoff, "realtime reconnecting after backoff");
    tokio::select! {
        _ = tokio::time::sleep(*backoff) => {}
        _ = shutdown.cancelled() => return false,
    }
    *backoff = next_backoff(*backoff);
    true
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Decoded book-channel event.
#[derive(Debug, PartialEq)]
enum BookEvent {
    Sync {
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    },
    Changes(Vec<(Side, Decimal, Decimal)>),
}

fn side_from_wire(raw: &str) -> Option<Side> {
    match raw {
        "bid" | "bids" => Some(Side::Buy),
        "ask" | "asks" => Some(Side::Sell),
        _ => None,
    }
}

fn parse_levels(value: Option<&Value>) -> Vec<PriceLevel> {
    value
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(PriceLevel::from_value).collect())
        .unwrap_or_default()
}

/// Decode a book-channel payload. The changed event arrives in three
/// shapes: a top-level `change` triple, per-side pair arrays under `data`,
/// or a flat `{side, price, amount}` object.
fn decode_book_event(payload: &Value) -> Option<BookEvent> {
    let event = payload.get("ev").and_then(Value::as_str)?;
    let data = payload.get("data");

    match event {
        "book-sync" => {
            let data = data?;
            Some(BookEvent::Sync {
                bids: parse_levels(data.get("bids")),
                asks: parse_levels(data.get("asks")),
            })
        }
        "book-changed" => {
            if let Some(change) = payload.get("change").and_then(Value::as_array) {
                if change.len() < 3 {
                    return None;
                }
                let side = side_from_wire(change[0].as_str()?)?;
                let price = decimal_from_value(&change[1])?;
                let amount = decimal_from_value(&change[2])?;
                return Some(BookEvent::Changes(vec![(side, price, amount)]));
            }

            let data = data?;
            if data.get("bids").is_some() || data.get("asks").is_some() {
                let mut changes = Vec::new();
                for (side, key) in [(Side::Buy, "bids"), (Side::Sell, "asks")] {
                    for entry in data.get(key).and_then(Value::as_array).into_iter().flatten() {
                        if let Some(level) = PriceLevel::from_value(entry) {
                            changes.push((side, level.price, level.amount));
                        }
                    }
                }
                return (!changes.is_empty()).then_some(BookEvent::Changes(changes));
            }

            let side = side_from_wire(data.get("side").and_then(Value::as_str)?)?;
            let price = decimal_from_value(data.get("price")?)?;
            let amount = decimal_from_value(data.get("amount")?)?;
            Some(BookEvent::Changes(vec![(side, price, amount)]))
        }
        _ => None,
    }
}

/// Decode an orders-channel payload. The order may be nested under
/// `data.order` or sit directly in `data`.
fn decode_order_event(payload: &Value) -> Option<OrderSnapshot> {
    let event = payload.get("ev").and_then(Value::as_str)?;
    if event != "order-created" && event != "order-updated" {
        return None;
    }
    let data = payload.get("data")?;
    let order = data.get("order").unwrap_or(data);
    OrderSnapshot::from_value(order)
}
