//! Opportunity detection over a price snapshot.
//!
//! Pure function of the snapshot: for every instrument quoted on at
//! least two venues, pair the lowest ask (buy side) with the highest
//! bid (sell side). Kept side-effect free so it can be tested with
//! hand-built snapshots.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::debug;

use crate::types::{Opportunity, PriceSnapshot};

/// Scan a snapshot for cross-venue discrepancies at or above
/// `min_profit_pct`. Results are sorted by profit percentage,
/// best first.
pub fn detect(snapshot: &PriceSnapshot, min_profit_pct: Decimal) -> Vec<Opportunity> {
    let mut opportunities = Vec::new();

    for (instrument, venues) in snapshot {
        // Venue names sorted so ties resolve the same way every cycle.
        let mut quotes: Vec<_> = venues
            .iter()
            .filter(|(_, q)| q.is_two_sided())
            .collect();
        if quotes.len() < 2 {
            continue;
        }
        quotes.sort_by(|a, b| a.0.cmp(b.0));

        let mut best_buy: Option<(&String, Decimal)> = None;
        let mut best_sell: Option<(&String, Decimal)> = None;
        for &(venue, quote) in &quotes {
            let (bid, ask) = match (quote.bid, quote.ask) {
                (Some(bid), Some(ask)) => (bid, ask),
                _ => continue,
            };
            if best_buy.map(|(_, a)| ask < a).unwrap_or(true) {
                best_buy = Some((venue, ask));
            }
            if best_sell.map(|(_, b)| bid > b).unwrap_or(true) {
                best_sell = Some((venue, bid));
            }
        }

        let ((buy_venue, buy_price), (sell_venue, sell_price)) = match (best_buy, best_sell) {
            (Some(buy), Some(sell)) => (buy, sell),
            _ => continue,
        };

        // Buying and selling on the same venue is not arbitrage.
        if buy_venue == sell_venue {
            continue;
        }

        if buy_price <= Decimal::ZERO {
            continue;
        }
        let profit_per_unit = sell_price - buy_price;
        let profit_percentage = profit_per_unit / buy_price * Decimal::from(100);
        if profit_percentage < min_profit_pct {
            continue;
        }

        debug!(
            instrument = %instrument,
            buy = %buy_venue,
            sell = %sell_venue,
            profit_pct = %profit_percentage,
            "Discrepancy found"
        );

        opportunities.push(Opportunity {
            instrument: instrument.clone(),
            buy_venue: buy_venue.clone(),
            sell_venue: sell_venue.clone(),
            buy_price,
            sell_price,
            profit_percentage,
            profit_per_unit,
            discovered_at: Utc::now(),
        });
    }

    opportunities.sort_by(|a, b| b.profit_percentage.cmp(&a.profit_percentage));
    opportunities
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
