//! Execution orchestration.
//!
//! Drives one full cycle: refresh the snapshot, detect discrepancies,
//! gate each candidate through the risk ledger, size it against book
//! depth, then execute on the spot path or, for deep discrepancies
//! with a loan backend attached, the loan-funded path. Execution
//! failures become failed trade records (feeding cooldowns); they
//! never abort the run.

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, LoanSettings};
use crate::engine::aggregator::PriceAggregator;
use crate::engine::{detector, sizing};
use crate::loan::{evm::dex_for_venue, to_wei, LoanExecutionClient, LoanParams};
use crate::risk::RiskLedger;
use crate::types::{
    ExecutionError, Instrument, Opportunity, OrderFill, RunStats, TradeKind, TradeRecord,
};
use crate::venues::MarketDataClient;

/// Loan notional multiplier over the spot ceiling.
const LOAN_NOTIONAL_MULTIPLIER: Decimal = dec!(10);

/// Expected profit must cover gas cost by at least this factor.
const GAS_COVERAGE_FACTOR: Decimal = dec!(2);

/// On-chain profit floor as a fraction of the expected profit.
const MIN_PROFIT_FRACTION: Decimal = dec!(0.5);

/// Stats banner cadence, in cumulative detected opportunities.
const STATS_EVERY_OPPORTUNITIES: u64 = 10;

/// What one cycle did, for logging and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleReport {
    pub detected: usize,
    pub considered: usize,
    pub executed: usize,
    pub rejected: usize,
}

pub struct Orchestrator {
    config: AppConfig,
    aggregator: Arc<PriceAggregator>,
    ledger: RiskLedger,
    loan_client: Option<Arc<dyn LoanExecutionClient>>,
    stats: RunStats,
    running: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        aggregator: Arc<PriceAggregator>,
        ledger: RiskLedger,
        loan_client: Option<Arc<dyn LoanExecutionClient>>,
    ) -> Self {
        Self {
            config,
            aggregator,
            ledger,
            loan_client,
            stats: RunStats::new(),
            running: AtomicBool::new(true),
        }
    }

    /// Request a stop; subsequent cycles become no-ops.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn ledger(&self) -> &RiskLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut RiskLedger {
        &mut self.ledger
    }

    /// One full scan-gate-execute cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        if !self.is_running() {
            return Ok(CycleReport::default());
        }

        let snapshot = self.aggregator.refresh().await;
        let opportunities = detector::detect(&snapshot, self.ledger.settings().min_profit_pct);

        let mut report = CycleReport {
            detected: opportunities.len(),
            ..CycleReport::default()
        };

        let banner_before = self.stats.total_opportunities / STATS_EVERY_OPPORTUNITIES;
        self.stats.total_opportunities += opportunities.len() as u64;
        self.stats.last_update = Some(Utc::now());

        for opp in opportunities.into_iter().take(self.config.bot.top_candidates) {
            report.considered += 1;

            if let Err(reason) = self.ledger.validate_opportunity(&opp) {
                debug!(opportunity = %opp, reason = %reason, "Rejected");
                report.rejected += 1;
                continue;
            }

            let executed = if self.loan_worthy(&opp) {
                self.attempt_loan(&opp).await
            } else {
                self.attempt_spot(&opp).await
            };

            match executed {
                Some(true) => report.executed += 1,
                Some(false) => report.rejected += 1,
                None => {}
            }
        }

        if self.stats.total_opportunities / STATS_EVERY_OPPORTUNITIES > banner_before {
            self.log_stats().await;
        }

        info!(
            detected = report.detected,
            considered = report.considered,
            executed = report.executed,
            rejected = report.rejected,
            "Cycle complete"
        );
        Ok(report)
    }

    fn loan_worthy(&self, opp: &Opportunity) -> bool {
        self.loan_client.is_some()
            && opp.profit_percentage > self.config.loan.loan_worthy_profit_pct
    }

    // -- spot path -----------------------------------------------------

    /// Returns `Some(true)` when a trade executed, `Some(false)` when
    /// it was attempted and failed or rejected at sizing, `None` when
    /// no trade was attempted at all.
    async fn attempt_spot(&mut self, opp: &Opportunity) -> Option<bool> {
        let buy_venue = match self.aggregator.venue_by_name(&opp.buy_venue) {
            Some(v) => v,
            None => {
                warn!(venue = %opp.buy_venue, "Buy venue not registered");
                return None;
            }
        };
        let sell_venue = match self.aggregator.venue_by_name(&opp.sell_venue) {
            Some(v) => v,
            None => {
                warn!(venue = %opp.sell_venue, "Sell venue not registered");
                return None;
            }
        };

        let quote_asset = opp.instrument.quote();
        let balance = match buy_venue.fetch_balance(quote_asset).await {
            Ok(b) => b,
            Err(e) => {
                warn!(venue = buy_venue.name(), error = %e, "Balance fetch failed");
                return None;
            }
        };

        let risk_sized = self.ledger.position_size(opp, balance);
        if risk_sized.is_zero() {
            debug!(opportunity = %opp, "Sized to zero, skipping");
            return None;
        }

        let amount = sizing::optimal_trade_size(
            buy_venue.as_ref(),
            sell_venue.as_ref(),
            &opp.instrument,
            risk_sized,
            self.ledger.settings(),
        )
        .await;

        if let Err(reason) = self.ledger.validate_execution(opp, amount) {
            debug!(opportunity = %opp, amount = %amount, reason = %reason, "Sized trade rejected");
            return Some(false);
        }

        if self.config.bot.dry_run && !(buy_venue.is_simulated() && sell_venue.is_simulated()) {
            info!(opportunity = %opp, amount = %amount, "Dry run, skipping live execution");
            return None;
        }

        match self
            .execute_spot(buy_venue.as_ref(), sell_venue.as_ref(), opp, amount, balance)
            .await
        {
            Ok(profit) => {
                info!(opportunity = %opp, amount = %amount, profit = %profit, "Spot trade executed");
                self.record(opp, amount, profit, true, TradeKind::Spot);
                Some(true)
            }
            Err(e) => {
                warn!(opportunity = %opp, error = %e, "Spot execution failed");
                self.record(opp, amount, Decimal::ZERO, false, TradeKind::Spot);
                Some(false)
            }
        }
    }

    /// Buy on the cheap venue, then sell the filled quantity on the
    /// expensive one. Returns the realized quote-asset profit.
    async fn execute_spot(
        &self,
        buy_venue: &dyn MarketDataClient,
        sell_venue: &dyn MarketDataClient,
        opp: &Opportunity,
        amount: Decimal,
        quote_balance: Decimal,
    ) -> Result<Decimal, ExecutionError> {
        let required = amount * opp.buy_price;
        if quote_balance < required {
            return Err(ExecutionError::InsufficientBalance {
                venue: buy_venue.name().to_string(),
                asset: opp.instrument.quote().to_string(),
                available: quote_balance,
                required,
            });
        }

        let buy: OrderFill = buy_venue
            .create_market_buy(&opp.instrument, amount)
            .await
            .map_err(|e| ExecutionError::OrderFailed {
                venue: buy_venue.name().to_string(),
                reason: e.to_string(),
            })?;

        if !buy.is_filled() {
            return Err(ExecutionError::BuyNotFilled { status: buy.status });
        }

        let sell: OrderFill = sell_venue
            .create_market_sell(&opp.instrument, buy.filled)
            .await
            .map_err(|e| ExecutionError::OrderFailed {
                venue: sell_venue.name().to_string(),
                reason: e.to_string(),
            })?;

        Ok(sell.cost - buy.cost)
    }

    // -- loan path -----------------------------------------------------

    async fn attempt_loan(&mut self, opp: &Opportunity) -> Option<bool> {
        let client = Arc::clone(self.loan_client.as_ref()?);
        let loan: &LoanSettings = &self.config.loan;

        let notional = (self.ledger.settings().max_trade_amount * LOAN_NOTIONAL_MULTIPLIER)
            .min(loan.max_loan_notional);

        let cost = match client.estimate_cost(opp.instrument.base(), notional).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Gas estimation failed, skipping loan path");
                return None;
            }
        };

        let expected_profit = opp.profit_percentage / Decimal::from(100) * notional;
        let gas_cost_usd = cost.cost_native * loan.native_usd_rate;
        if expected_profit < gas_cost_usd * GAS_COVERAGE_FACTOR {
            debug!(
                expected = %expected_profit,
                gas_usd = %gas_cost_usd,
                "Expected profit does not cover gas, skipping loan path"
            );
            return None;
        }

        let amount_wei = to_wei(notional)?;
        let min_profit_wei = to_wei(expected_profit * MIN_PROFIT_FRACTION)?;
        let params = LoanParams {
            token_a: opp.instrument.base().to_string(),
            token_b: opp.instrument.quote().to_string(),
            amount_wei,
            buy_dex: dex_for_venue(&opp.buy_venue).unwrap_or("uniswap_v2").to_string(),
            sell_dex: dex_for_venue(&opp.sell_venue).unwrap_or("sushiswap").to_string(),
            min_profit_wei,
        };

        match client.execute(&params).await {
            Ok(outcome) if outcome.success => {
                let profit = outcome.profit.unwrap_or(Decimal::ZERO);
                info!(
                    opportunity = %opp,
                    tx = outcome.tx_id.as_deref().unwrap_or("-"),
                    profit = %profit,
                    "Loan trade executed"
                );
                self.stats.loan_trades += 1;
                self.stats.loan_profit += profit;
                self.record(opp, notional, profit, true, TradeKind::Loan);
                Some(true)
            }
            Ok(outcome) => {
                warn!(
                    opportunity = %opp,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "Loan trade failed"
                );
                self.record(opp, notional, Decimal::ZERO, false, TradeKind::Loan);
                Some(false)
            }
            Err(e) => {
                warn!(opportunity = %opp, error = %e, "Loan submission failed");
                self.record(opp, notional, Decimal::ZERO, false, TradeKind::Loan);
                Some(false)
            }
        }
    }

    // -- bookkeeping ---------------------------------------------------

    fn record(
        &mut self,
        opp: &Opportunity,
        amount: Decimal,
        profit: Decimal,
        success: bool,
        kind: TradeKind,
    ) {
        if success {
            self.stats.executed_trades += 1;
            self.stats.total_profit += profit;
        }
        self.ledger.record_trade(TradeRecord {
            timestamp: Utc::now(),
            instrument: opp.instrument.clone(),
            profit,
            success,
            buy_venue: opp.buy_venue.clone(),
            sell_venue: opp.sell_venue.clone(),
            amount,
            kind,
        });
    }

    async fn log_stats(&self) {
        let perf = self.ledger.performance_stats();
        info!(
            runtime_mins = (Utc::now() - self.stats.start_time).num_minutes(),
            opportunities = self.stats.total_opportunities,
            executed = self.stats.executed_trades,
            loan_trades = self.stats.loan_trades,
            total_profit = %self.stats.total_profit,
            success_rate = %perf.success_rate.round_dp(2),
            "Run statistics"
        );

        if let Some(client) = &self.loan_client {
            let net = client.network_status().await;
            info!(
                connected = net.connected,
                block = net.block_height.unwrap_or(0),
                gas_gwei = %net.gas_price_gwei.round_dp(2),
                balance = %net.account_balance.round_dp(6),
                "Chain status"
            );
        }
    }

    /// Blacklist all configured instruments, halting further trades.
    pub fn emergency_stop(&mut self, reason: &str) {
        let instruments: Vec<Instrument> = self
            .config
            .bot
            .instruments
            .iter()
            .map(|s| Instrument::new(s.clone()))
            .collect();
        self.ledger.emergency_stop(reason, &instruments);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BinanceConfig, BotConfig, PaperConfig, RiskSettings, VenuesConfig,
    };
    use crate::venues::paper::PaperVenue;
    use std::time::Duration;

    fn config() -> AppConfig {
        AppConfig {
            bot: BotConfig {
                name: "test".into(),
                monitoring_interval_secs: 5,
                top_candidates: 5,
                dry_run: true,
                instruments: vec!["BTC/USDT".into()],
                fetch_timeout_secs: 2,
            },
            risk: RiskSettings {
                min_profit_pct: dec!(0.5),
                min_trade_amount: dec!(1),
                max_trade_amount: dec!(1000),
                max_slippage_pct: dec!(2.0),
                max_daily_trades: 100,
                max_daily_loss: dec!(1000),
                cooldown_minutes: 30,
                max_spread_pct: dec!(10),
            },
            venues: VenuesConfig {
                binance: BinanceConfig {
                    enabled: false,
                    api_key_env: "K".into(),
                    api_secret_env: "S".into(),
                },
                paper: PaperConfig {
                    enabled: true,
                    names: vec!["paper-a".into(), "paper-b".into()],
                    starting_balance: dec!(100000),
                },
            },
            loan: LoanSettings {
                enabled: false,
                rpc_url_env: "R".into(),
                from_address_env: "W".into(),
                contract_address: None,
                loan_worthy_profit_pct: dec!(1.0),
                max_loan_notional: dec!(100000),
                native_usd_rate: dec!(3000),
                confirm_timeout_secs: 300,
            },
        }
    }

    fn btc() -> Instrument {
        Instrument::from("BTC/USDT")
    }

    fn venues_with_spread() -> (Arc<PaperVenue>, Arc<PaperVenue>) {
        let a = Arc::new(PaperVenue::new("paper-a", dec!(10000000), "USDT"));
        let b = Arc::new(PaperVenue::new("paper-b", dec!(10000000), "USDT"));
        // ~0.93% spread: buy a @ 43000, sell b @ 43400.
        a.set_quote(btc(), dec!(42990), dec!(43000));
        b.set_quote(btc(), dec!(43400), dec!(43410));
        // Sell leg needs base inventory on the expensive venue.
        b.deposit("BTC", dec!(500));
        (a, b)
    }

    fn orchestrator(
        venues: Vec<Arc<dyn MarketDataClient>>,
        config: AppConfig,
    ) -> Orchestrator {
        let aggregator = Arc::new(PriceAggregator::new(
            venues,
            vec![btc()],
            Duration::from_secs(2),
        ));
        let ledger = RiskLedger::new(config.risk.clone());
        Orchestrator::new(config, aggregator, ledger, None)
    }

    #[tokio::test]
    async fn test_cycle_executes_profitable_spread() {
        let (a, b) = venues_with_spread();
        let mut orch = orchestrator(vec![a.clone() as _, b.clone() as _], config());

        let report = orch.run_cycle().await.unwrap();
        assert_eq!(report.detected, 1);
        assert_eq!(report.executed, 1);
        assert_eq!(report.rejected, 0);

        let history = orch.ledger().trade_history();
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert!(history[0].profit > Decimal::ZERO);
        assert_eq!(history[0].kind, TradeKind::Spot);
        assert_eq!(orch.stats().executed_trades, 1);
        assert!(orch.stats().total_profit > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_cycle_no_spread_no_trades() {
        let a = Arc::new(PaperVenue::new("paper-a", dec!(100000), "USDT"));
        let b = Arc::new(PaperVenue::new("paper-b", dec!(100000), "USDT"));
        a.set_quote(btc(), dec!(43000), dec!(43010));
        b.set_quote(btc(), dec!(43005), dec!(43015));

        let mut orch = orchestrator(vec![a as _, b as _], config());
        let report = orch.run_cycle().await.unwrap();
        assert_eq!(report.detected, 0);
        assert_eq!(report.executed, 0);
        assert!(orch.ledger().trade_history().is_empty());
    }

    #[tokio::test]
    async fn test_failed_sell_records_failure_and_cooldown() {
        let (a, b) = venues_with_spread();
        // Drain the sell venue's inventory so the sell leg fails.
        b.deposit("BTC", dec!(-500));

        let mut orch = orchestrator(vec![a as _, b as _], config());
        let report = orch.run_cycle().await.unwrap();
        assert_eq!(report.executed, 0);
        assert_eq!(report.rejected, 1);

        let history = orch.ledger().trade_history();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert_eq!(history[0].profit, Decimal::ZERO);
        assert!(orch.ledger().is_in_cooldown(&btc()));
    }

    #[tokio::test]
    async fn test_cooldown_blocks_next_cycle() {
        let (a, b) = venues_with_spread();
        b.deposit("BTC", dec!(-500));

        let mut orch = orchestrator(vec![a as _, b.clone() as _], config());
        orch.run_cycle().await.unwrap();

        // Restore inventory; the cooldown must still block the retry.
        b.deposit("BTC", dec!(500));
        let report = orch.run_cycle().await.unwrap();
        assert_eq!(report.detected, 1);
        assert_eq!(report.executed, 0);
        assert_eq!(report.rejected, 1);
        assert_eq!(orch.ledger().trade_history().len(), 1);
    }

    #[tokio::test]
    async fn test_emergency_stop_blocks_everything() {
        let (a, b) = venues_with_spread();
        let mut orch = orchestrator(vec![a as _, b as _], config());
        orch.emergency_stop("operator halt");

        let report = orch.run_cycle().await.unwrap();
        assert_eq!(report.detected, 1);
        assert_eq!(report.executed, 0);
        assert_eq!(report.rejected, 1);
        assert!(orch.ledger().trade_history().is_empty());
    }

    /// Wraps a paper venue but reports itself as a live market, for
    /// exercising the dry-run execution gate.
    struct LiveVenue(PaperVenue);

    #[async_trait::async_trait]
    impl MarketDataClient for LiveVenue {
        async fn fetch_ticker(&self, instrument: &Instrument) -> anyhow::Result<crate::types::PriceQuote> {
            self.0.fetch_ticker(instrument).await
        }

        async fn fetch_order_book(
            &self,
            instrument: &Instrument,
            depth: usize,
        ) -> anyhow::Result<crate::types::OrderBook> {
            self.0.fetch_order_book(instrument, depth).await
        }

        async fn fetch_balance(&self, asset: &str) -> anyhow::Result<Decimal> {
            self.0.fetch_balance(asset).await
        }

        async fn create_market_buy(
            &self,
            instrument: &Instrument,
            amount: Decimal,
        ) -> anyhow::Result<crate::types::OrderFill> {
            self.0.create_market_buy(instrument, amount).await
        }

        async fn create_market_sell(
            &self,
            instrument: &Instrument,
            amount: Decimal,
        ) -> anyhow::Result<crate::types::OrderFill> {
            self.0.create_market_sell(instrument, amount).await
        }

        async fn close(&self) -> anyhow::Result<()> {
            self.0.close().await
        }

        fn name(&self) -> &str {
            self.0.name()
        }
    }

    #[tokio::test]
    async fn test_dry_run_trades_simulated_venues_regardless_of_name() {
        // Paper venues with names carrying no special prefix.
        let a = Arc::new(PaperVenue::new("sim-a", dec!(10000000), "USDT"));
        let b = Arc::new(PaperVenue::new("sim-b", dec!(10000000), "USDT"));
        a.set_quote(btc(), dec!(42990), dec!(43000));
        b.set_quote(btc(), dec!(43400), dec!(43410));
        b.deposit("BTC", dec!(500));

        let mut orch = orchestrator(vec![a as _, b as _], config());
        let report = orch.run_cycle().await.unwrap();
        assert_eq!(report.detected, 1);
        assert_eq!(report.executed, 1);
        assert_eq!(orch.ledger().trade_history().len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_never_trades_live_venues() {
        // Live venues whose names look like paper venues must still be
        // skipped in dry-run mode.
        let a = PaperVenue::new("paper-a", dec!(10000000), "USDT");
        let b = PaperVenue::new("paper-b", dec!(10000000), "USDT");
        a.set_quote(btc(), dec!(42990), dec!(43000));
        b.set_quote(btc(), dec!(43400), dec!(43410));
        b.deposit("BTC", dec!(500));
        let a = Arc::new(LiveVenue(a));
        let b = Arc::new(LiveVenue(b));

        let mut orch = orchestrator(vec![a as _, b as _], config());
        let report = orch.run_cycle().await.unwrap();
        assert_eq!(report.detected, 1);
        assert_eq!(report.executed, 0);
        assert!(orch.ledger().trade_history().is_empty());
    }

    #[tokio::test]
    async fn test_stop_makes_cycles_noops() {
        let (a, b) = venues_with_spread();
        let mut orch = orchestrator(vec![a as _, b as _], config());
        orch.stop();
        assert!(!orch.is_running());

        let report = orch.run_cycle().await.unwrap();
        assert_eq!(report.detected, 0);
        assert!(orch.ledger().trade_history().is_empty());
    }

    #[tokio::test]
    async fn test_top_candidates_limit() {
        let mut cfg = config();
        cfg.bot.top_candidates = 0;
        let (a, b) = venues_with_spread();
        let mut orch = orchestrator(vec![a as _, b as _], cfg);

        let report = orch.run_cycle().await.unwrap();
        assert_eq!(report.detected, 1);
        assert_eq!(report.considered, 0);
    }
}
