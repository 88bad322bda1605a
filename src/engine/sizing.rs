//! Depth-aware trade sizing.
//!
//! The risk ledger sizes a trade from balances alone; this module
//! shrinks that further to what the order books on both legs can
//! actually absorb without walking too deep.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::config::RiskSettings;
use crate::types::{BookSide, Instrument};
use crate::venues::MarketDataClient;

/// Book levels considered on each side.
const DEPTH: usize = 5;

/// Fraction of the visible liquidity we are willing to consume.
const LIQUIDITY_FRACTION: Decimal = dec!(0.8);

fn visible_qty(side: &BookSide) -> Decimal {
    side.iter().take(DEPTH).map(|(_, qty)| *qty).sum()
}

/// Cap `risk_sized` by the liquidity visible in the top levels of the
/// buy-side asks and sell-side bids. Falls back to the minimum trade
/// amount when either book is unavailable.
pub async fn optimal_trade_size(
    buy_venue: &dyn MarketDataClient,
    sell_venue: &dyn MarketDataClient,
    instrument: &Instrument,
    risk_sized: Decimal,
    settings: &RiskSettings,
) -> Decimal {
    let (buy_book, sell_book) = tokio::join!(
        buy_venue.fetch_order_book(instrument, DEPTH),
        sell_venue.fetch_order_book(instrument, DEPTH),
    );

    let (buy_book, sell_book) = match (buy_book, sell_book) {
        (Ok(b), Ok(s)) => (b, s),
        (buy, sell) => {
            if let Err(e) = &buy {
                debug!(venue = buy_venue.name(), error = %e, "Buy book unavailable");
            }
            if let Err(e) = &sell {
                debug!(venue = sell_venue.name(), error = %e, "Sell book unavailable");
            }
            return settings.min_trade_amount;
        }
    };

    let ask_qty = visible_qty(&buy_book.asks);
    let bid_qty = visible_qty(&sell_book.bids);
    let liquidity = ask_qty.min(bid_qty) * LIQUIDITY_FRACTION;

    let size = liquidity.min(risk_sized).min(settings.max_trade_amount);
    debug!(
        instrument = %instrument,
        ask_qty = %ask_qty,
        bid_qty = %bid_qty,
        size = %size,
        "Sized against book depth"
    );
    size
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
