//! Paper venue — deterministic in-memory trading venue.
//!
//! Serves fixed quotes, synthesizes order-book depth around them, and
//! fills market orders instantly at the quoted price minus a fee. All
//! state is in-memory and fully controllable, which makes it the venue
//! of choice for dry-run mode and the integration tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::MarketDataClient;
use crate::types::{Instrument, OrderBook, OrderFill, OrderStatus, PriceQuote};

/// Default taker fee applied to paper fills.
const DEFAULT_FEE_RATE: Decimal = dec!(0.001);

/// Quantity offered at each synthesized book level.
const DEFAULT_LEVEL_QTY: Decimal = dec!(25);

/// Price step between synthesized book levels, as a fraction of price.
const LEVEL_STEP_PCT: Decimal = dec!(0.0005);

pub struct PaperVenue {
    name: String,
    fee_rate: Decimal,
    level_qty: Decimal,
    quotes: Mutex<HashMap<Instrument, (Decimal, Decimal)>>,
    balances: Mutex<HashMap<String, Decimal>>,
    /// If set, all operations return this error. Lets tests exercise
    /// the "venue unreachable" paths.
    force_error: Mutex<Option<String>>,
}

impl PaperVenue {
    pub fn new(name: &str, starting_quote_balance: Decimal, quote_asset: &str) -> Self {
        let mut balances = HashMap::new();
        balances.insert(quote_asset.to_uppercase(), starting_quote_balance);
        Self {
            name: name.to_string(),
            fee_rate: DEFAULT_FEE_RATE,
            level_qty: DEFAULT_LEVEL_QTY,
            quotes: Mutex::new(HashMap::new()),
            balances: Mutex::new(balances),
            force_error: Mutex::new(None),
        }
    }

    /// Set (or replace) the quote served for an instrument.
    pub fn set_quote(&self, instrument: Instrument, bid: Decimal, ask: Decimal) {
        self.quotes.lock().unwrap().insert(instrument, (bid, ask));
    }

    /// Credit an asset balance (pre-positioning inventory).
    pub fn deposit(&self, asset: &str, amount: Decimal) {
        *self
            .balances
            .lock()
            .unwrap()
            .entry(asset.to_uppercase())
            .or_insert(Decimal::ZERO) += amount;
    }

    /// Override the per-level book quantity (liquidity shaping in tests).
    pub fn set_level_qty(&mut self, qty: Decimal) {
        self.level_qty = qty;
    }

    /// Force all subsequent operations to fail with `msg`.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn balance_of(&self, asset: &str) -> Decimal {
        self.balances
            .lock()
            .unwrap()
            .get(&asset.to_uppercase())
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn check_error(&self) -> Result<()> {
        if let Some(msg) = self.force_error.lock().unwrap().as_ref() {
            bail!("{} (forced): {msg}", self.name);
        }
        Ok(())
    }

    fn quote_for(&self, instrument: &Instrument) -> Result<(Decimal, Decimal)> {
        self.quotes
            .lock()
            .unwrap()
            .get(instrument)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("{}: no quote for {instrument}", self.name))
    }

    fn adjust(&self, asset: &str, delta: Decimal) -> Result<()> {
        let mut balances = self.balances.lock().unwrap();
        let entry = balances.entry(asset.to_uppercase()).or_insert(Decimal::ZERO);
        let next = *entry + delta;
        if next < Decimal::ZERO {
            bail!(
                "{}: insufficient {asset} balance (have {entry}, need {})",
                self.name,
                -delta
            );
        }
        *entry = next;
        Ok(())
    }
}

#[async_trait]
impl MarketDataClient for PaperVenue {
    async fn fetch_ticker(&self, instrument: &Instrument) -> Result<PriceQuote> {
        self.check_error()?;
        let (bid, ask) = self.quote_for(instrument)?;
        Ok(PriceQuote {
            venue: self.name.clone(),
            instrument: instrument.clone(),
            bid: Some(bid),
            ask: Some(ask),
            last: Some((bid + ask) / dec!(2)),
            timestamp: Utc::now(),
        })
    }

    async fn fetch_order_book(&self, instrument: &Instrument, depth: usize) -> Result<OrderBook> {
        self.check_error()?;
        let (bid, ask) = self.quote_for(instrument)?;

        // Ladder outward from the top of book in fixed relative steps.
        let mut bids = Vec::with_capacity(depth);
        let mut asks = Vec::with_capacity(depth);
        for i in 0..depth {
            let step = LEVEL_STEP_PCT * Decimal::from(i as u64);
            bids.push((bid * (Decimal::ONE - step), self.level_qty));
            asks.push((ask * (Decimal::ONE + step), self.level_qty));
        }

        Ok(OrderBook {
            venue: self.name.clone(),
            instrument: instrument.clone(),
            bids,
            asks,
            timestamp: Utc::now(),
        })
    }

    async fn fetch_balance(&self, asset: &str) -> Result<Decimal> {
        self.check_error()?;
        Ok(self.balance_of(asset))
    }

    async fn create_market_buy(
        &self,
        instrument: &Instrument,
        amount: Decimal,
    ) -> Result<OrderFill> {
        self.check_error()?;
        let (_, ask) = self.quote_for(instrument)?;
        let cost = amount * ask * (Decimal::ONE + self.fee_rate);

        self.adjust(instrument.quote(), -cost)?;
        self.adjust(instrument.base(), amount)?;

        Ok(OrderFill {
            order_id: format!("paper-{}", Uuid::new_v4()),
            status: OrderStatus::Closed,
            filled: amount,
            cost,
        })
    }

    async fn create_market_sell(
        &self,
        instrument: &Instrument,
        amount: Decimal,
    ) -> Result<OrderFill> {
        self.check_error()?;
        let (bid, _) = self.quote_for(instrument)?;
        let proceeds = amount * bid * (Decimal::ONE - self.fee_rate);

        self.adjust(instrument.base(), -amount)?;
        self.adjust(instrument.quote(), proceeds)?;

        Ok(OrderFill {
            order_id: format!("paper-{}", Uuid::new_v4()),
            status: OrderStatus::Closed,
            filled: amount,
            cost: proceeds,
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn btc() -> Instrument {
        Instrument::from("BTC/USDT")
    }

    #[tokio::test]
    async fn test_ticker_serves_set_quote() {
        let venue = PaperVenue::new("paper-a", dec!(10000), "USDT");
        venue.set_quote(btc(), dec!(43200), dec!(43210));

        let quote = venue.fetch_ticker(&btc()).await.unwrap();
        assert_eq!(quote.bid, Some(dec!(43200)));
        assert_eq!(quote.ask, Some(dec!(43210)));
        assert!(quote.is_two_sided());
    }

    #[tokio::test]
    async fn test_ticker_unknown_instrument_fails() {
        let venue = PaperVenue::new("paper-a", dec!(10000), "USDT");
        assert!(venue.fetch_ticker(&btc()).await.is_err());
    }

    #[tokio::test]
    async fn test_buy_moves_balances() {
        let venue = PaperVenue::new("paper-a", dec!(100000), "USDT");
        venue.set_quote(btc(), dec!(43000), dec!(43000));

        let fill = venue.create_market_buy(&btc(), dec!(1)).await.unwrap();
        assert!(fill.is_filled());
        assert_eq!(fill.filled, dec!(1));
        assert_eq!(venue.balance_of("BTC"), dec!(1));
        // 43000 * 1.001 fee
        assert_eq!(venue.balance_of("USDT"), dec!(100000) - dec!(43043));
    }

    #[tokio::test]
    async fn test_buy_insufficient_balance_fails() {
        let venue = PaperVenue::new("paper-a", dec!(100), "USDT");
        venue.set_quote(btc(), dec!(43000), dec!(43000));
        assert!(venue.create_market_buy(&btc(), dec!(1)).await.is_err());
        // Nothing partially applied.
        assert_eq!(venue.balance_of("USDT"), dec!(100));
        assert_eq!(venue.balance_of("BTC"), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_sell_requires_inventory() {
        let venue = PaperVenue::new("paper-a", dec!(0), "USDT");
        venue.set_quote(btc(), dec!(43000), dec!(43010));
        assert!(venue.create_market_sell(&btc(), dec!(1)).await.is_err());

        venue.deposit("BTC", dec!(2));
        let fill = venue.create_market_sell(&btc(), dec!(1)).await.unwrap();
        assert!(fill.is_filled());
        assert_eq!(venue.balance_of("BTC"), dec!(1));
    }

    #[tokio::test]
    async fn test_forced_error_blocks_everything() {
        let venue = PaperVenue::new("paper-a", dec!(1000), "USDT");
        venue.set_quote(btc(), dec!(43000), dec!(43010));
        venue.set_error("maintenance window");

        assert!(venue.fetch_ticker(&btc()).await.is_err());
        assert!(venue.fetch_balance("USDT").await.is_err());

        venue.clear_error();
        assert!(venue.fetch_ticker(&btc()).await.is_ok());
    }

    #[tokio::test]
    async fn test_order_book_ladder() {
        let venue = PaperVenue::new("paper-a", dec!(1000), "USDT");
        venue.set_quote(btc(), dec!(43000), dec!(43010));

        let book = venue.fetch_order_book(&btc(), 5).await.unwrap();
        assert_eq!(book.bids.len(), 5);
        assert_eq!(book.asks.len(), 5);
        // Best levels sit at the quote; ladder steps away from it.
        assert_eq!(book.bids[0].0, dec!(43000));
        assert_eq!(book.asks[0].0, dec!(43010));
        assert!(book.bids[4].0 < book.bids[0].0);
        assert!(book.asks[4].0 > book.asks[0].0);
    }
}
