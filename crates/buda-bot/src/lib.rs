//! Execution bot for Buda.com spot markets.
//!
//! Given a target notional (buy) or quantity (sell), the bot maintains a
//! single resting limit order at a computed optimal price, repricing as
//! the market moves, until the target is filled or the remainder drops
//! below the market minimum.
//!
//! ## Architecture
//!
//! - `book` / `orders`: concurrent caches fed by the realtime session,
//!   read by the engine with REST fallback
//! - `realtime`: one reconnecting websocket loop per channel (public
//!   book, private order updates)
//! - `engine`: the monitoring loop and order lifecycle state machine
//! - `api`: the REST collaborator behind the `ExchangeApi` trait
//! - `strategy`: top-of-book and depth-based pricing

pub mod api;
pub mod book;
pub mod config;
pub mod engine;
pub mod orders;
pub mod realtime;
pub mod session;
pub mod shutdown;
pub mod strategy;

pub use api::{ApiError, Balance, BudaClient, ExchangeApi, OrderBookSnapshot};
pub use book::OrderBookState;
pub use config::{BotConfig, Credentials, PricingStrategy};
pub use engine::{EngineError, TradingBot};
pub use orders::OrderCache;
pub use realtime::RealtimeClient;
pub use session::{ExecutionSession, SessionSummary};
pub use shutdown::ShutdownToken;
