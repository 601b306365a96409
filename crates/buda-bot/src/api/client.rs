//! Concrete Buda.com REST client.
//!
//! Retries rate limits (honoring `Retry-After`) and transport failures a
//! bounded number of times, then surfaces a classified [`ApiError`]. All
//! payloads are normalized into canonical shapes at this boundary.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tracing::{debug, warn};

use buda_common::{OrderSnapshot, PriceLevel, Side, decimal_from_value};

use crate::config::Credentials;

use super::{ApiError, Balance, ExchangeApi, OrderBookSnapshot, auth};

/// Default API base URL.
const DEFAULT_BASE_URL: &str = "https://www.buda.com/api/v2";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts per request (rate-limit and transport retries).
const MAX_RETRIES: u32 = 3;

/// Fallback delay when the server does not provide `Retry-After`.
const RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct BudaClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
}

impl BudaClient {
    pub fn new(credentials: Credentials) -> Self {
        Self::with_base_url(credentials, DEFAULT_BASE_URL)
    }

    /// Override the base URL (tests, staging).
    pub fn with_base_url(credentials: Credentials, base_url: impl Into<String>) -> Self {
        // Builder failure means a broken TLS backend, not a runtime
        // condition; failing loudly beats running without the timeout.
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("HTTP client construction failed");
        Self {
            http,
            base_url: base_url.into(),
            credentials,
        }
    }

    /// Issue one API request with retry/classification.
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        authenticated: bool,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{endpoint}", self.base_url);
        // Signature covers the full versioned path.
        let sign_path = format!("/api/v2{endpoint}");
        let body_str = body.map(|b| b.to_string());

        for attempt in 1..=MAX_RETRIES {
            let mut req = self
                .http
                .request(method.clone(), &url)
                .header("Content-Type", "application/json");

            if authenticated {
                let nonce = auth::generate_nonce();
                let signature = auth::sign_request(
                    &self.credentials.api_secret,
                    method.as_str(),
                    &sign_path,
                    &nonce,
                    body_str.as_deref(),
                );
                req = req
                    .header("X-SBTC-APIKEY", &self.credentials.api_key)
                    .header("X-SBTC-NONCE", nonce)
                    .header("X-SBTC-SIGNATURE", signature);
            }
            if let Some(ref body) = body_str {
                req = req.body(body.clone());
            }

            let response = match req.send().await {
                Ok(response) => response,
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < MAX_RETRIES => {
                    warn!(attempt, error = %e, "transport error, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
                Err(e) => return Err(ApiError::Transport(e.to_string())),
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt < MAX_RETRIES {
                    let retry_after = response
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or(RETRY_DELAY);
                    warn!(attempt, ?retry_after, "rate limited, backing off");
                    tokio::time::sleep(retry_after).await;
                    continue;
                }
                return Err(ApiError::RateLimited);
            }

            if status == StatusCode::UNAUTHORIZED {
                return Err(ApiError::Auth);
            }

            let text = response
                .text()
                .await
                .map_err(|e| ApiError::Transport(e.to_string()))?;

            if status.is_client_error() || status.is_server_error() {
                return Err(classify_error(status, &text));
            }

            if text.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| ApiError::Api(format!("malformed response: {e}")));
        }

        Err(ApiError::Transport("max retries exceeded".to_string()))
    }
}

/// Map an error response body to the error taxonomy.
fn classify_error(status: StatusCode, body: &str) -> ApiError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| {
            if body.is_empty() {
                format!("HTTP {status}")
            } else {
                body.to_string()
            }
        });

    let lowered = message.to_lowercase();
    if lowered.contains("insufficient") || lowered.contains("balance") {
        ApiError::InsufficientBalance(message)
    } else {
        ApiError::Api(message)
    }
}

/// Unwrap a `{"key": {...}}` envelope, tolerating its absence.
fn unwrap_envelope<'a>(value: &'a Value, key: &str) -> &'a Value {
    value.get(key).unwrap_or(value)
}

fn parse_order(value: &Value) -> Result<OrderSnapshot, ApiError> {
    OrderSnapshot::from_value(unwrap_envelope(value, "order"))
        .ok_or_else(|| ApiError::Api("order payload without id".to_string()))
}

fn parse_side(value: &Value) -> Vec<PriceLevel> {
    value
        .as_array()
        .map(|entries| entries.iter().filter_map(PriceLevel::from_value).collect())
        .unwrap_or_default()
}

#[async_trait]
impl ExchangeApi for BudaClient {
    async fn get_balance(&self, currency: &str) -> Result<Balance, ApiError> {
        let endpoint = format!("/balances/{}", currency.to_lowercase());
        let response = self.request(Method::GET, &endpoint, None, true).await?;
        let balance = unwrap_envelope(&response, "balance");
        Ok(Balance {
            currency: currency.to_lowercase(),
            available: balance
                .get("available_amount")
                .and_then(decimal_from_value)
                .unwrap_or(Decimal::ZERO),
            frozen: balance
                .get("frozen_amount")
                .and_then(decimal_from_value)
                .unwrap_or(Decimal::ZERO),
        })
    }

    async fn get_order_book(&self, market_id: &str) -> Result<OrderBookSnapshot, ApiError> {
        let endpoint = format!("/markets/{}/order_book", market_id.to_lowercase());
        let response = self.request(Method::GET, &endpoint, None, false).await?;
        let book = unwrap_envelope(&response, "order_book");
        let snapshot = OrderBookSnapshot {
            bids: book.get("bids").map(parse_side).unwrap_or_default(),
            asks: book.get("asks").map(parse_side).unwrap_or_default(),
        };
        debug!(
            market = market_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "fetched order book"
        );
        Ok(snapshot)
    }

    async fn create_limit_order(
        &self,
        market_id: &str,
        side: Side,
        amount: Decimal,
        limit_price: Decimal,
    ) -> Result<OrderSnapshot, ApiError> {
        let endpoint = format!("/markets/{}/orders", market_id.to_lowercase());
        let body = json!({
            "order": {
                "type": side.api_order_type(),
                "price_type": "limit",
                "amount": amount.to_string(),
                "limit": limit_price.to_string(),
            }
        });
        let response = self.request(Method::POST, &endpoint, Some(body), true).await?;
        parse_order(&response)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<OrderSnapshot, ApiError> {
        let endpoint = format!("/orders/{order_id}");
        let body = json!({ "state": "canceling" });
        let response = self.request(Method::PUT, &endpoint, Some(body), true).await?;
        parse_order(&response)
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderSnapshot, ApiError> {
        let endpoint = format!("/orders/{order_id}");
        let response = self.request(Method::GET, &endpoint, None, true).await?;
        parse_order(&response)
    }

    async fn get_session_key(&self) -> Result<Option<String>, ApiError> {
        let response = self.request(Method::GET, "/me", None, true).await?;
        let user = unwrap_envelope(&response, "user");
        Ok(user
            .get("pubsub_key")
            .and_then(Value::as_str)
            .map(String::from))
    }

    async fn get_ticker(&self, market_id: &str) -> Result<Decimal, ApiError> {
        let endpoint = format!("/markets/{}/ticker", market_id.to_lowercase());
        let response = self.request(Method::GET, &endpoint, None, false).await?;
        let ticker = unwrap_envelope(&response, "ticker");
        ticker
            .get("last_price")
            .and_then(decimal_from_value)
            .ok_or_else(|| ApiError::Api("ticker without last_price".to_string()))
    }
}
