//! REST collaborator for the Buda.com API.
//!
//! The engine consumes the exchange only through the [`ExchangeApi`]
//! trait, so tests can script responses without a network. The concrete
//! [`BudaClient`] signs requests (HMAC-SHA384), retries rate limits and
//! timeouts, and classifies failures into [`ApiError`].

pub mod auth;
pub mod client;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use buda_common::{OrderSnapshot, PriceLevel, Side};

pub use client::BudaClient;

/// Classified API failures surfaced to the engine.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 401: bad key/secret. Fatal to the run.
    #[error("authentication failed: check API key and secret")]
    Auth,

    /// 429 that survived the client's own retries.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Balance too low for the requested operation.
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Connection/timeout failures after bounded retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// Any other error the API reported.
    #[error("API error: {0}")]
    Api(String),
}

/// Account balance for one currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    pub currency: String,
    pub available: Decimal,
    pub frozen: Decimal,
}

/// Full order book as returned by REST.
#[derive(Debug, Clone, Default)]
pub struct OrderBookSnapshot {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Operations the engine needs from the exchange.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn get_balance(&self, currency: &str) -> Result<Balance, ApiError>;

    async fn get_order_book(&self, market_id: &str) -> Result<OrderBookSnapshot, ApiError>;

    async fn create_limit_order(
        &self,
        market_id: &str,
        side: Side,
        amount: Decimal,
        limit_price: Decimal,
    ) -> Result<OrderSnapshot, ApiError>;

    async fn cancel_order(&self, order_id: &str) -> Result<OrderSnapshot, ApiError>;

    async fn get_order(&self, order_id: &str) -> Result<OrderSnapshot, ApiError>;

    /// Pubsub key for the private realtime channel, `None` when the
    /// account does not expose one.
    async fn get_session_key(&self) -> Result<Option<String>, ApiError>;

    /// Last traded price for a market.
    async fn get_ticker(&self, market_id: &str) -> Result<Decimal, ApiError>;
}
