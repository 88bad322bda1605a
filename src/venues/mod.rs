//! Venue integrations.
//!
//! Defines the `MarketDataClient` trait and provides implementations for:
//! - Binance — real REST execution (signed endpoints for balance/orders)
//! - Paper — deterministic in-memory venue for dry-run and tests
//!
//! The core pipeline only ever talks to the trait; venue identity leaks
//! nowhere except the risk ledger's fee-rate table.

pub mod binance;
pub mod paper;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{Instrument, OrderBook, OrderFill, PriceQuote};

/// Abstraction over trading venues.
///
/// Implementors provide ticker and depth retrieval, balance lookup, and
/// market order placement. Each call may fail independently; failures
/// are caught at the call site and never abort a cycle.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    /// Fetch the current top-of-book quote for an instrument.
    async fn fetch_ticker(&self, instrument: &Instrument) -> Result<PriceQuote>;

    /// Fetch order book depth, at most `depth` levels per side.
    async fn fetch_order_book(&self, instrument: &Instrument, depth: usize) -> Result<OrderBook>;

    /// Free balance of a single asset.
    async fn fetch_balance(&self, asset: &str) -> Result<Decimal>;

    /// Place a market buy for `amount` of the base asset.
    async fn create_market_buy(&self, instrument: &Instrument, amount: Decimal)
        -> Result<OrderFill>;

    /// Place a market sell for `amount` of the base asset.
    async fn create_market_sell(&self, instrument: &Instrument, amount: Decimal)
        -> Result<OrderFill>;

    /// Release any connection resources. Called once at shutdown.
    async fn close(&self) -> Result<()>;

    /// Venue name for logging, snapshots, and fee lookup.
    fn name(&self) -> &str;

    /// Whether fills are simulated rather than routed to a real
    /// market. Dry-run mode only executes against simulated venues.
    fn is_simulated(&self) -> bool {
        false
    }
}
