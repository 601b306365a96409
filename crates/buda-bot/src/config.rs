//! Runtime configuration: API credentials from the environment and the
//! knobs that shape an execution run.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use buda_common::MarketSpec;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),
    #[error("unknown pricing strategy '{0}', expected 'top' or 'depth'")]
    UnknownStrategy(String),
    #[error("depth ratio must be in (0, 1], got {0}")]
    InvalidDepthRatio(Decimal),
}

/// Buda API key pair. Read from `BUDA_API_KEY` / `BUDA_API_SECRET`.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key =
            std::env::var("BUDA_API_KEY").map_err(|_| ConfigError::MissingVar("BUDA_API_KEY"))?;
        let api_secret = std::env::var("BUDA_API_SECRET")
            .map_err(|_| ConfigError::MissingVar("BUDA_API_SECRET"))?;
        Ok(Self {
            api_key,
            api_secret,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret.
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Where in the book the bot positions its order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingStrategy {
    /// One tick inside the best same-side price.
    Top,
    /// At the level where cumulative volume reaches a fraction of side depth.
    Depth,
}

impl FromStr for PricingStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "top" => Ok(Self::Top),
            "depth" => Ok(Self::Depth),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Parameters for one execution run.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub market: &'static MarketSpec,
    pub strategy: PricingStrategy,
    /// Fraction of side volume the depth strategy accumulates to.
    pub depth_ratio: Decimal,
    /// Polling cadence when no realtime update arrives.
    pub interval: Duration,
    /// Maintain a live websocket session; off means pure REST polling.
    pub realtime: bool,
    /// Log intents instead of placing orders.
    pub dry_run: bool,
    /// Debounce between consecutive cancel/replace actions.
    pub min_action_interval: Duration,
    /// Cadence of the REST reconciliation pass.
    pub reconcile_interval: Duration,
    /// Bounded poll while waiting for a cancel to reach a terminal state.
    pub cancel_confirm_retries: u32,
    pub cancel_confirm_delay: Duration,
    /// How long to wait for the realtime book before falling back to REST.
    pub book_ready_timeout: Duration,
}

impl BotConfig {
    pub fn new(market: &'static MarketSpec) -> Self {
        Self {
            market,
            strategy: PricingStrategy::Top,
            depth_ratio: dec!(0.9),
            interval: Duration::from_secs(30),
            realtime: true,
            dry_run: false,
            min_action_interval: Duration::from_millis(500),
            reconcile_interval: Duration::from_secs(120),
            cancel_confirm_retries: 10,
            cancel_confirm_delay: Duration::from_millis(300),
            book_ready_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_strategy(mut self, strategy: PricingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_depth_ratio(mut self, ratio: Decimal) -> Result<Self, ConfigError> {
        if ratio <= Decimal::ZERO || ratio > Decimal::ONE {
            return Err(ConfigError::InvalidDepthRatio(ratio));
        }
        self.depth_ratio = ratio;
        Ok(self)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Book older than this is considered stale and refreshed over REST.
    pub fn staleness_threshold(&self) -> Duration {
        self.interval * 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_strategy_parsing() {
        assert_eq!("top".parse::<PricingStrategy>().unwrap(), PricingStrategy::Top);
        assert_eq!("Depth".parse::<PricingStrategy>().unwrap(), PricingStrategy::Depth);
        assert!("vwap".parse::<PricingStrategy>().is_err());
    }

    #[test]
    fn test_depth_ratio_bounds() {
        let market = MarketSpec::for_market("btc-clp").unwrap();
        assert!(BotConfig::new(market).with_depth_ratio(dec!(0.5)).is_ok());
        assert!(BotConfig::new(market).with_depth_ratio(dec!(1)).is_ok());
        assert!(BotConfig::new(market).with_depth_ratio(dec!(0)).is_err());
        assert!(BotConfig::new(market).with_depth_ratio(dec!(1.1)).is_err());
    }

    #[test]
    fn test_realtime_defaults_on() {
        let market = MarketSpec::for_market("btc-clp").unwrap();
        assert!(BotConfig::new(market).realtime);
        assert!(!BotConfig::new(market).with_realtime(false).realtime);
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials {
            api_key: "key".to_string(),
            api_secret: "very-secret".to_string(),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("very-secret"));
    }
}
