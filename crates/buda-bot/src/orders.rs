//! Order snapshot cache fed by the private realtime channel.
//!
//! Cache-then-fallback: the engine consults this first and falls back to
//! a REST fetch when the id is absent, so there is no staleness tracking
//! here.

use dashmap::DashMap;

use buda_common::OrderSnapshot;

#[derive(Debug, Default)]
pub struct OrderCache {
    orders: DashMap<String, OrderSnapshot>,
}

impl OrderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the latest snapshot for an order.
    pub fn update_from_event(&self, snapshot: OrderSnapshot) {
        self.orders.insert(snapshot.id.clone(), snapshot);
    }

    /// Latest known snapshot for `order_id`, if any event has arrived.
    pub fn get_order(&self, order_id: &str) -> Option<OrderSnapshot> {
        self.orders.get(order_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
