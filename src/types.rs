//! Shared types for the ARBITER engine.
//!
//! These types form the data model used across all modules: price
//! quotes flowing out of venue clients, opportunities produced by the
//! detector, and trade records consumed by the risk ledger. Pipeline
//! modules depend on this file without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Instrument
// ---------------------------------------------------------------------------

/// A tradable pair in `BASE/QUOTE` notation, e.g. `BTC/USDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instrument(String);

impl Instrument {
    pub fn new(pair: impl Into<String>) -> Self {
        Self(pair.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The base asset (left of the slash), e.g. `BTC` for `BTC/USDT`.
    pub fn base(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// The quote asset (right of the slash), e.g. `USDT` for `BTC/USDT`.
    pub fn quote(&self) -> &str {
        self.0.split('/').nth(1).unwrap_or("")
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Instrument {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Quotes and snapshots
// ---------------------------------------------------------------------------

/// A single venue's top-of-book quote for one instrument.
///
/// Produced fresh each cycle and never mutated. A quote missing either
/// side is kept in the snapshot (it may still be useful for display)
/// but is excluded from opportunity detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub venue: String,
    pub instrument: Instrument,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl PriceQuote {
    /// Both sides present — the quote can participate in detection.
    pub fn is_two_sided(&self) -> bool {
        self.bid.is_some() && self.ask.is_some()
    }
}

/// Per-instrument, per-venue quote map. Replaced wholesale each cycle;
/// venues that failed to respond are simply absent.
pub type PriceSnapshot = HashMap<Instrument, HashMap<String, PriceQuote>>;

/// One side of an order book: (price, quantity) levels, best first.
pub type BookSide = Vec<(Decimal, Decimal)>;

/// Order book depth returned by a venue client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub venue: String,
    pub instrument: Instrument,
    pub bids: BookSide,
    pub asks: BookSide,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Opportunities
// ---------------------------------------------------------------------------

/// A detected price discrepancy: buy at `buy_venue`'s ask, sell at
/// `sell_venue`'s bid. Ephemeral value object, recomputed every cycle.
///
/// Invariant: `buy_venue != sell_venue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub instrument: Instrument,
    pub buy_venue: String,
    pub sell_venue: String,
    /// Lowest ask across venues.
    pub buy_price: Decimal,
    /// Highest bid across venues.
    pub sell_price: Decimal,
    /// `(sell - buy) / buy * 100`.
    pub profit_percentage: Decimal,
    /// `sell - buy`, per unit of the base asset.
    pub profit_per_unit: Decimal,
    pub discovered_at: DateTime<Utc>,
}

impl Opportunity {
    /// Percentage spread between sell and buy price. Same formula as
    /// `profit_percentage`; named separately because the risk ledger
    /// treats a very wide spread as a data-quality red flag rather
    /// than an opportunity.
    pub fn spread_pct(&self) -> Decimal {
        (self.sell_price - self.buy_price) / self.buy_price * Decimal::from(100)
    }
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: buy {} @ {} / sell {} @ {} (+{:.2}%)",
            self.instrument,
            self.buy_venue,
            self.buy_price,
            self.sell_venue,
            self.sell_price,
            self.profit_percentage,
        )
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Terminal status of a market order as reported by a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Fully filled.
    Closed,
    /// Accepted but not (fully) filled.
    Open,
    Canceled,
    Rejected,
}

/// Result of a market order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    pub order_id: String,
    pub status: OrderStatus,
    /// Base-asset quantity actually filled.
    pub filled: Decimal,
    /// Quote-asset cost (or proceeds, for a sell) of the fill.
    pub cost: Decimal,
}

impl OrderFill {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Closed
    }
}

// ---------------------------------------------------------------------------
// Trade records
// ---------------------------------------------------------------------------

/// Which execution path produced a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    Spot,
    Loan,
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeKind::Spot => write!(f, "spot"),
            TradeKind::Loan => write!(f, "loan"),
        }
    }
}

/// Outcome of one execution attempt, successful or not. Appended to
/// the risk ledger's history on every attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub instrument: Instrument,
    /// Realized profit in the quote asset. 0 for a failed attempt
    /// unless the venue reported a concrete loss.
    pub profit: Decimal,
    pub success: bool,
    pub buy_venue: String,
    pub sell_venue: String,
    pub amount: Decimal,
    pub kind: TradeKind,
}

// ---------------------------------------------------------------------------
// Execution errors
// ---------------------------------------------------------------------------

/// Execution failures the orchestrator converts into failed trade
/// records (they trigger cooldowns but never stop the run).
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("insufficient {asset} balance on {venue}: have {available}, need {required}")]
    InsufficientBalance {
        venue: String,
        asset: String,
        available: Decimal,
        required: Decimal,
    },

    #[error("buy order not filled (status {status:?})")]
    BuyNotFilled { status: OrderStatus },

    #[error("order placement failed on {venue}: {reason}")]
    OrderFailed { venue: String, reason: String },
}

// ---------------------------------------------------------------------------
// Run statistics
// ---------------------------------------------------------------------------

/// Cumulative counters for the current run. Serialized into the
/// shutdown stats artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub start_time: DateTime<Utc>,
    pub total_opportunities: u64,
    pub executed_trades: u64,
    pub loan_trades: u64,
    pub total_profit: Decimal,
    pub loan_profit: Decimal,
    pub last_update: Option<DateTime<Utc>>,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            total_opportunities: 0,
            executed_trades: 0,
            loan_trades: 0,
            total_profit: Decimal::ZERO,
            loan_profit: Decimal::ZERO,
            last_update: None,
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

#[cfg(test)]
impl Opportunity {
    /// A sample opportunity with sensible defaults for unit tests.
    pub fn sample() -> Self {
        use rust_decimal_macros::dec;
        Opportunity {
            instrument: Instrument::from("BTC/USDT"),
            buy_venue: "binance".to_string(),
            sell_venue: "kraken".to_string(),
            buy_price: dec!(43000),
            sell_price: dec!(43400),
            profit_percentage: dec!(0.93),
            profit_per_unit: dec!(400),
            discovered_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
