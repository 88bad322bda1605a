//! Risk ledger: pre-trade gating, position sizing, and trade history.
//!
//! Every opportunity passes through `validate_opportunity` before
//! sizing and `validate_execution` after sizing; the first failed
//! check wins and its reason is reported. The ledger also tracks
//! per-day loss buckets, instrument cooldowns, and a blacklist, all
//! fed by `record_trade`.

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{info, warn};

use crate::config::RiskSettings;
use crate::types::{Instrument, Opportunity, TradeRecord};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fraction of the quote balance put at risk per trade.
const RISK_BALANCE_FRACTION: Decimal = dec!(0.02);

/// Hard cap on position size as a fraction of the quote balance.
const BALANCE_CAP_FRACTION: Decimal = dec!(0.10);

/// History entries older than this are pruned on daily reset.
const HISTORY_RETENTION_DAYS: i64 = 30;

/// Taker fee rate for a venue. Unknown venues get a conservative
/// default.
pub fn venue_fee(venue: &str) -> Decimal {
    match venue.to_lowercase().as_str() {
        "binance" => dec!(0.001),
        "coinbasepro" => dec!(0.005),
        "kraken" => dec!(0.0026),
        "kucoin" => dec!(0.001),
        "huobi" => dec!(0.002),
        _ => dec!(0.002),
    }
}

// ---------------------------------------------------------------------------
// Rejection reasons
// ---------------------------------------------------------------------------

/// Why an opportunity or sized trade was refused. Ordered by the
/// sequence the checks run in; the first failure is the one reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    ProfitBelowMinimum,
    Blacklisted,
    CoolingDown,
    DailyTradeLimitReached,
    DailyLossLimitReached,
    SpreadTooWide,
    AmountOutOfRange,
    UnprofitableAfterFees,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectionReason::ProfitBelowMinimum => "profit below minimum",
            RejectionReason::Blacklisted => "instrument blacklisted",
            RejectionReason::CoolingDown => "instrument cooling down",
            RejectionReason::DailyTradeLimitReached => "daily trade limit reached",
            RejectionReason::DailyLossLimitReached => "daily loss limit reached",
            RejectionReason::SpreadTooWide => "spread too wide",
            RejectionReason::AmountOutOfRange => "amount outside configured bounds",
            RejectionReason::UnprofitableAfterFees => "unprofitable after fees",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Performance statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStats {
    pub trades: usize,
    pub successful: usize,
    pub profit: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_trades: usize,
    pub successful_trades: usize,
    /// Percentage, 0 when no trades recorded.
    pub success_rate: Decimal,
    pub total_profit: Decimal,
    pub average_profit: Decimal,
    pub daily: HashMap<NaiveDate, DailyStats>,
}

impl PerformanceStats {
    fn empty() -> Self {
        Self {
            total_trades: 0,
            successful_trades: 0,
            success_rate: Decimal::ZERO,
            total_profit: Decimal::ZERO,
            average_profit: Decimal::ZERO,
            daily: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct RiskLedger {
    settings: RiskSettings,
    trade_history: Vec<TradeRecord>,
    /// Accumulated loss per calendar day (UTC), absolute values.
    daily_loss: HashMap<NaiveDate, Decimal>,
    /// Instruments barred from trading until manually cleared.
    blacklist: HashSet<Instrument>,
    /// Cooldown start times; an instrument is cooling down while
    /// `now - start < cooldown_minutes`.
    cooldowns: HashMap<Instrument, chrono::DateTime<Utc>>,
}

impl RiskLedger {
    pub fn new(settings: RiskSettings) -> Self {
        Self {
            settings,
            trade_history: Vec::new(),
            daily_loss: HashMap::new(),
            blacklist: HashSet::new(),
            cooldowns: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    // -- gating --------------------------------------------------------

    /// Run the pre-sizing checks in order; the first failure wins.
    pub fn validate_opportunity(&self, opp: &Opportunity) -> Result<(), RejectionReason> {
        if opp.profit_percentage < self.settings.min_profit_pct {
            return Err(RejectionReason::ProfitBelowMinimum);
        }
        if self.blacklist.contains(&opp.instrument) {
            return Err(RejectionReason::Blacklisted);
        }
        if self.is_in_cooldown(&opp.instrument) {
            return Err(RejectionReason::CoolingDown);
        }
        if self.daily_trade_count() >= self.settings.max_daily_trades {
            return Err(RejectionReason::DailyTradeLimitReached);
        }
        if self.loss_today() >= self.settings.max_daily_loss {
            return Err(RejectionReason::DailyLossLimitReached);
        }
        if opp.spread_pct() > self.settings.max_spread_pct {
            return Err(RejectionReason::SpreadTooWide);
        }
        Ok(())
    }

    /// Post-sizing sanity check: bounds and profitability net of fees.
    pub fn validate_execution(
        &self,
        opp: &Opportunity,
        amount: Decimal,
    ) -> Result<(), RejectionReason> {
        if amount < self.settings.min_trade_amount || amount > self.settings.max_trade_amount {
            return Err(RejectionReason::AmountOutOfRange);
        }

        let buy_fee = opp.buy_price * amount * venue_fee(&opp.buy_venue);
        let sell_fee = opp.sell_price * amount * venue_fee(&opp.sell_venue);
        let gross = (opp.sell_price - opp.buy_price) * amount;
        let net = gross - buy_fee - sell_fee;
        let notional = opp.buy_price * amount;
        if notional <= Decimal::ZERO {
            return Err(RejectionReason::AmountOutOfRange);
        }
        let net_pct = net / notional * Decimal::from(100);

        if net_pct < self.settings.min_profit_pct {
            return Err(RejectionReason::UnprofitableAfterFees);
        }
        Ok(())
    }

    // -- sizing --------------------------------------------------------

    /// Base-asset position size for an opportunity given the available
    /// quote balance. Returns zero when the sized amount falls below
    /// the minimum trade amount.
    pub fn position_size(&self, opp: &Opportunity, quote_balance: Decimal) -> Decimal {
        if opp.buy_price <= Decimal::ZERO || quote_balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        // Slippage-adjusted risk budget per trade.
        let risk_budget = quote_balance * RISK_BALANCE_FRACTION;
        let slippage_unit = opp.buy_price * self.settings.max_slippage_pct / Decimal::from(100);
        if slippage_unit <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let risk_sized = risk_budget / slippage_unit;

        let balance_cap = (quote_balance * BALANCE_CAP_FRACTION).min(self.settings.max_trade_amount);

        let size = risk_sized
            .min(balance_cap)
            .min(self.settings.max_trade_amount);

        if size < self.settings.min_trade_amount {
            Decimal::ZERO
        } else {
            size
        }
    }

    // -- history -------------------------------------------------------

    /// Record an execution attempt. Losses feed the daily loss bucket;
    /// failures and losses start a cooldown on the instrument.
    pub fn record_trade(&mut self, record: TradeRecord) {
        let today = record.timestamp.date_naive();
        if record.profit < Decimal::ZERO {
            *self.daily_loss.entry(today).or_insert(Decimal::ZERO) += -record.profit;
        }
        if !record.success || record.profit < Decimal::ZERO {
            warn!(
                instrument = %record.instrument,
                profit = %record.profit,
                "Trade loss or failure, starting cooldown"
            );
            self.cooldowns
                .insert(record.instrument.clone(), record.timestamp);
        }
        self.trade_history.push(record);
    }

    pub fn is_in_cooldown(&self, instrument: &Instrument) -> bool {
        match self.cooldowns.get(instrument) {
            Some(start) => {
                Utc::now() - *start < Duration::minutes(self.settings.cooldown_minutes)
            }
            None => false,
        }
    }

    /// Number of trades recorded today (UTC).
    pub fn daily_trade_count(&self) -> usize {
        let today = Utc::now().date_naive();
        self.trade_history
            .iter()
            .filter(|t| t.timestamp.date_naive() == today)
            .count()
    }

    fn loss_today(&self) -> Decimal {
        self.daily_loss
            .get(&Utc::now().date_naive())
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn trade_history(&self) -> &[TradeRecord] {
        &self.trade_history
    }

    // -- controls ------------------------------------------------------

    pub fn add_to_blacklist(&mut self, instrument: Instrument) {
        warn!(instrument = %instrument, "Instrument blacklisted");
        self.blacklist.insert(instrument);
    }

    pub fn remove_from_blacklist(&mut self, instrument: &Instrument) {
        if self.blacklist.remove(instrument) {
            info!(instrument = %instrument, "Instrument removed from blacklist");
        }
    }

    /// Blacklist every given instrument, halting new trades on them.
    pub fn emergency_stop(&mut self, reason: &str, instruments: &[Instrument]) {
        warn!(reason, count = instruments.len(), "Emergency stop, blacklisting instruments");
        self.blacklist.extend(instruments.iter().cloned());
    }

    pub fn is_blacklisted(&self, instrument: &Instrument) -> bool {
        self.blacklist.contains(instrument)
    }

    /// Roll the daily windows: drop yesterday's loss bucket and prune
    /// history beyond the retention window.
    pub fn reset_daily_limits(&mut self) {
        let yesterday = Utc::now().date_naive() - Duration::days(1);
        self.daily_loss.remove(&yesterday);

        let cutoff = Utc::now() - Duration::days(HISTORY_RETENTION_DAYS);
        let before = self.trade_history.len();
        self.trade_history.retain(|t| t.timestamp >= cutoff);
        if self.trade_history.len() < before {
            info!(
                pruned = before - self.trade_history.len(),
                "Pruned aged-out trade history"
            );
        }
    }

    // -- reporting -----------------------------------------------------

    pub fn performance_stats(&self) -> PerformanceStats {
        if self.trade_history.is_empty() {
            return PerformanceStats::empty();
        }

        let total_trades = self.trade_history.len();
        let successful_trades = self
            .trade_history
            .iter()
            .filter(|t| t.success && t.profit > Decimal::ZERO)
            .count();
        let total_profit: Decimal = self.trade_history.iter().map(|t| t.profit).sum();

        let mut daily: HashMap<NaiveDate, DailyStats> = HashMap::new();
        for trade in &self.trade_history {
            let entry = daily
                .entry(trade.timestamp.date_naive())
                .or_insert(DailyStats {
                    trades: 0,
                    successful: 0,
                    profit: Decimal::ZERO,
                });
            entry.trades += 1;
            if trade.success && trade.profit > Decimal::ZERO {
                entry.successful += 1;
            }
            entry.profit += trade.profit;
        }

        PerformanceStats {
            total_trades,
            successful_trades,
            success_rate: Decimal::from(successful_trades as u64)
                / Decimal::from(total_trades as u64)
                * Decimal::from(100),
            total_profit,
            average_profit: total_profit / Decimal::from(total_trades as u64),
            daily,
        }
    }

    // -- test access ---------------------------------------------------

    #[cfg(test)]
    fn set_cooldown(&mut self, instrument: Instrument, start: chrono::DateTime<Utc>) {
        self.cooldowns.insert(instrument, start);
    }

    #[cfg(test)]
    fn set_daily_loss(&mut self, date: NaiveDate, loss: Decimal) {
        self.daily_loss.insert(date, loss);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
