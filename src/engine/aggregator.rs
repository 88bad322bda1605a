//! Concurrent cross-venue price aggregation.
//!
//! Each cycle fans out one ticker request per (venue, instrument)
//! pair, bounded by a per-request timeout. Failed or timed-out
//! requests are dropped silently; whatever arrived forms the new
//! snapshot, which replaces the previous one wholesale.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{Instrument, PriceSnapshot};
use crate::venues::MarketDataClient;

pub struct PriceAggregator {
    venues: Vec<Arc<dyn MarketDataClient>>,
    instruments: Vec<Instrument>,
    fetch_timeout: Duration,
    snapshot: Mutex<PriceSnapshot>,
    last_update: Mutex<Option<DateTime<Utc>>>,
}

impl PriceAggregator {
    pub fn new(
        venues: Vec<Arc<dyn MarketDataClient>>,
        instruments: Vec<Instrument>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            venues,
            instruments,
            fetch_timeout,
            snapshot: Mutex::new(HashMap::new()),
            last_update: Mutex::new(None),
        }
    }

    pub fn venues(&self) -> &[Arc<dyn MarketDataClient>] {
        &self.venues
    }

    pub fn venue_by_name(&self, name: &str) -> Option<Arc<dyn MarketDataClient>> {
        self.venues.iter().find(|v| v.name() == name).cloned()
    }

    /// Fetch every (venue, instrument) ticker concurrently and replace
    /// the cached snapshot with the results. Returns a clone of the
    /// fresh snapshot.
    pub async fn refresh(&self) -> PriceSnapshot {
        let mut tasks = Vec::with_capacity(self.venues.len() * self.instruments.len());
        for venue in &self.venues {
            for instrument in &self.instruments {
                let venue = Arc::clone(venue);
                let instrument = instrument.clone();
                let timeout = self.fetch_timeout;
                tasks.push(async move {
                    match tokio::time::timeout(timeout, venue.fetch_ticker(&instrument)).await {
                        Ok(Ok(quote)) => Some(quote),
                        Ok(Err(e)) => {
                            debug!(
                                venue = venue.name(),
                                instrument = %instrument,
                                error = %e,
                                "Ticker fetch failed"
                            );
                            None
                        }
                        Err(_) => {
                            warn!(
                                venue = venue.name(),
                                instrument = %instrument,
                                "Ticker fetch timed out"
                            );
                            None
                        }
                    }
                });
            }
        }

        let mut fresh: PriceSnapshot = HashMap::new();
        for quote in join_all(tasks).await.into_iter().flatten() {
            fresh
                .entry(quote.instrument.clone())
                .or_default()
                .insert(quote.venue.clone(), quote);
        }

        debug!(
            instruments = fresh.len(),
            quotes = fresh.values().map(|m| m.len()).sum::<usize>(),
            "Snapshot refreshed"
        );

        *self.snapshot.lock().unwrap() = fresh.clone();
        *self.last_update.lock().unwrap() = Some(Utc::now());
        fresh
    }

    /// The most recent snapshot (empty before the first refresh).
    pub fn snapshot(&self) -> PriceSnapshot {
        self.snapshot.lock().unwrap().clone()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venues::paper::PaperVenue;
    use rust_decimal_macros::dec;

    fn btc() -> Instrument {
        Instrument::from("BTC/USDT")
    }

    fn aggregator_with(venues: Vec<Arc<dyn MarketDataClient>>) -> PriceAggregator {
        PriceAggregator::new(venues, vec![btc()], Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_refresh_collects_all_venues() {
        let a = Arc::new(PaperVenue::new("paper-a", dec!(10000), "USDT"));
        let b = Arc::new(PaperVenue::new("paper-b", dec!(10000), "USDT"));
        a.set_quote(btc(), dec!(43200), dec!(43210));
        b.set_quote(btc(), dec!(43400), dec!(43410));

        let agg = aggregator_with(vec![a as _, b as _]);
        let snapshot = agg.refresh().await;

        let venues = snapshot.get(&btc()).unwrap();
        assert_eq!(venues.len(), 2);
        assert_eq!(venues["paper-a"].bid, Some(dec!(43200)));
        assert_eq!(venues["paper-b"].ask, Some(dec!(43410)));
        assert!(agg.last_update().is_some());
    }

    #[tokio::test]
    async fn test_failed_venue_is_dropped() {
        let a = Arc::new(PaperVenue::new("paper-a", dec!(10000), "USDT"));
        let b = Arc::new(PaperVenue::new("paper-b", dec!(10000), "USDT"));
        a.set_quote(btc(), dec!(43200), dec!(43210));
        b.set_quote(btc(), dec!(43400), dec!(43410));
        b.set_error("connection refused");

        let agg = aggregator_with(vec![a as _, b as _]);
        let snapshot = agg.refresh().await;

        let venues = snapshot.get(&btc()).unwrap();
        assert_eq!(venues.len(), 1);
        assert!(venues.contains_key("paper-a"));
    }

    #[tokio::test]
    async fn test_snapshot_replaced_wholesale() {
        let a = Arc::new(PaperVenue::new("paper-a", dec!(10000), "USDT"));
        let b = Arc::new(PaperVenue::new("paper-b", dec!(10000), "USDT"));
        a.set_quote(btc(), dec!(43200), dec!(43210));
        b.set_quote(btc(), dec!(43400), dec!(43410));

        let agg = aggregator_with(vec![Arc::clone(&a) as _, Arc::clone(&b) as _]);
        agg.refresh().await;
        assert_eq!(agg.snapshot()[&btc()].len(), 2);

        // Venue b goes dark; its stale quote must not linger.
        b.set_error("maintenance");
        agg.refresh().await;
        assert_eq!(agg.snapshot()[&btc()].len(), 1);
    }

    #[tokio::test]
    async fn test_venue_lookup_by_name() {
        let a = Arc::new(PaperVenue::new("paper-a", dec!(10000), "USDT"));
        let agg = aggregator_with(vec![a as _]);
        assert!(agg.venue_by_name("paper-a").is_some());
        assert!(agg.venue_by_name("paper-x").is_none());
    }
}
