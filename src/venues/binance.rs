//! Binance spot REST integration.
//!
//! Public endpoints (book ticker, depth) need no credentials; balance
//! and order placement go through the signed API (HMAC-SHA256 over the
//! query string, hex signature, `X-MBX-APIKEY` header).
//!
//! API docs: https://developers.binance.com/docs/binance-spot-api-docs
//! Base URL: https://api.binance.com

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

use super::MarketDataClient;
use crate::types::{BookSide, Instrument, OrderBook, OrderFill, OrderStatus, PriceQuote};

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://api.binance.com";
const VENUE_NAME: &str = "binance";

/// Signed-request validity window accepted by the server.
const RECV_WINDOW_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// API response types (Binance JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    bid_price: String,
    ask_price: String,
}

#[derive(Debug, Deserialize)]
struct Depth {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct Account {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    free: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    #[serde(default)]
    client_order_id: Option<String>,
    status: String,
    executed_qty: String,
    cummulative_quote_qty: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Binance spot venue client.
pub struct BinanceClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
}

impl BinanceClient {
    /// Create a new client. Credentials are optional — without them the
    /// client serves public market data only and signed calls fail.
    pub fn new(api_key: Option<String>, api_secret: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build Binance HTTP client")?;

        Ok(Self {
            http,
            base_url: BASE_URL.to_string(),
            api_key,
            api_secret,
        })
    }

    /// Point the client at a different base URL (testnet, test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// `BTC/USDT` → `BTCUSDT`.
    fn symbol(instrument: &Instrument) -> String {
        format!(
            "{}{}",
            instrument.base().to_uppercase(),
            instrument.quote().to_uppercase()
        )
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        match (self.api_key.as_deref(), self.api_secret.as_deref()) {
            (Some(k), Some(s)) => Ok((k, s)),
            _ => bail!("Binance credentials not configured"),
        }
    }

    /// Sign a query string: HMAC-SHA256 keyed with the API secret,
    /// hex-encoded, appended as the `signature` parameter.
    fn sign(secret: &str, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| anyhow!("invalid HMAC key"))?;
        mac.update(query.as_bytes());
        let digest = mac.finalize().into_bytes();
        Ok(digest.iter().fold(String::with_capacity(64), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{b:02x}");
            s
        }))
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    async fn get_public<T: serde::de::DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Binance GET {path} failed"))?;
        Self::parse_response(resp).await
    }

    async fn get_signed<T: serde::de::DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        let (key, secret) = self.credentials()?;
        let query = format!(
            "{query}{}timestamp={}&recvWindow={RECV_WINDOW_MS}",
            if query.is_empty() { "" } else { "&" },
            Self::timestamp_ms(),
        );
        let signature = Self::sign(secret, &query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", key)
            .send()
            .await
            .with_context(|| format!("Binance signed GET {path} failed"))?;
        Self::parse_response(resp).await
    }

    async fn post_signed<T: serde::de::DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        let (key, secret) = self.credentials()?;
        let query = format!(
            "{query}&timestamp={}&recvWindow={RECV_WINDOW_MS}",
            Self::timestamp_ms()
        );
        let signature = Self::sign(secret, &query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", key)
            .send()
            .await
            .with_context(|| format!("Binance signed POST {path} failed"))?;
        Self::parse_response(resp).await
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let text = resp.text().await.context("read response body failed")?;

        if !status.is_success() {
            // Error bodies carry {code, msg}; surface both when parseable.
            if let Ok(err) = serde_json::from_str::<ApiError>(&text) {
                bail!("Binance API error {} ({}): {}", status, err.code, err.msg);
            }
            bail!("Binance HTTP error {status}: {text}");
        }

        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse Binance response: {text}"))
    }

    async fn place_market_order(
        &self,
        instrument: &Instrument,
        side: &str,
        amount: Decimal,
    ) -> Result<OrderFill> {
        let client_order_id = format!("arb-{}", Uuid::new_v4().simple());
        let query = format!(
            "symbol={}&side={side}&type=MARKET&quantity={}&newClientOrderId={client_order_id}&newOrderRespType=RESULT",
            Self::symbol(instrument),
            amount.normalize(),
        );

        let order: OrderResponse = self.post_signed("/api/v3/order", &query).await?;

        let status = match order.status.as_str() {
            "FILLED" => OrderStatus::Closed,
            "NEW" | "PARTIALLY_FILLED" => OrderStatus::Open,
            "CANCELED" | "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Canceled,
            other => {
                warn!(venue = VENUE_NAME, status = other, "Unexpected order status");
                OrderStatus::Rejected
            }
        };

        Ok(OrderFill {
            order_id: order.client_order_id.unwrap_or(client_order_id),
            status,
            filled: parse_decimal(&order.executed_qty)?,
            cost: parse_decimal(&order.cummulative_quote_qty)?,
        })
    }
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    s.parse::<Decimal>()
        .with_context(|| format!("invalid decimal from Binance: {s:?}"))
}

#[async_trait]
impl MarketDataClient for BinanceClient {
    async fn fetch_ticker(&self, instrument: &Instrument) -> Result<PriceQuote> {
        let query = format!("symbol={}", Self::symbol(instrument));
        let ticker: BookTicker = self.get_public("/api/v3/ticker/bookTicker", &query).await?;

        debug!(
            venue = VENUE_NAME,
            instrument = %instrument,
            bid = %ticker.bid_price,
            ask = %ticker.ask_price,
            "Ticker fetched"
        );

        Ok(PriceQuote {
            venue: VENUE_NAME.to_string(),
            instrument: instrument.clone(),
            bid: ticker.bid_price.parse().ok(),
            ask: ticker.ask_price.parse().ok(),
            last: None,
            timestamp: Utc::now(),
        })
    }

    async fn fetch_order_book(&self, instrument: &Instrument, depth: usize) -> Result<OrderBook> {
        let query = format!("symbol={}&limit={depth}", Self::symbol(instrument));
        let book: Depth = self.get_public("/api/v3/depth", &query).await?;

        let parse_side = |levels: Vec<(String, String)>| -> Result<BookSide> {
            levels
                .into_iter()
                .map(|(p, q)| Ok((parse_decimal(&p)?, parse_decimal(&q)?)))
                .collect()
        };

        Ok(OrderBook {
            venue: VENUE_NAME.to_string(),
            instrument: instrument.clone(),
            bids: parse_side(book.bids)?,
            asks: parse_side(book.asks)?,
            timestamp: Utc::now(),
        })
    }

    async fn fetch_balance(&self, asset: &str) -> Result<Decimal> {
        let account: Account = self.get_signed("/api/v3/account", "").await?;
        let free = account
            .balances
            .iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .map(|b| parse_decimal(&b.free))
            .transpose()?
            .unwrap_or(Decimal::ZERO);
        Ok(free)
    }

    async fn create_market_buy(
        &self,
        instrument: &Instrument,
        amount: Decimal,
    ) -> Result<OrderFill> {
        self.place_market_order(instrument, "BUY", amount).await
    }

    async fn create_market_sell(
        &self,
        instrument: &Instrument,
        amount: Decimal,
    ) -> Result<OrderFill> {
        self.place_market_order(instrument, "SELL", amount).await
    }

    async fn close(&self) -> Result<()> {
        // reqwest clients need no explicit teardown.
        Ok(())
    }

    fn name(&self) -> &str {
        VENUE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
