//! ARBITER — cross-venue arbitrage engine.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires up venue clients and the optional loan execution backend, and
//! runs the scan→gate→execute loop with graceful shutdown.

use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use arbiter::config::AppConfig;
use arbiter::engine::{Orchestrator, PriceAggregator};
use arbiter::loan::evm::EvmLoanClient;
use arbiter::loan::LoanExecutionClient;
use arbiter::risk::RiskLedger;
use arbiter::storage;
use arbiter::types::Instrument;
use arbiter::venues::binance::BinanceClient;
use arbiter::venues::paper::PaperVenue;
use arbiter::venues::MarketDataClient;

const BANNER: &str = r#"
    _    ____  ____ ___ _____ _____ ____
   / \  |  _ \| __ )_ _|_   _| ____|  _ \
  / _ \ | |_) |  _ \| |  | | |  _| | |_) |
 / ___ \|  _ <| |_) | |  | | | |___|  _ <
/_/   \_\_| \_\____/___| |_| |_____|_| \_\

  Cross-Venue Arbitrage Engine
  v0.1.0
"#;

const FINAL_STATS_PATH: &str = "final_stats.json";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        name = %cfg.bot.name,
        interval_secs = cfg.bot.monitoring_interval_secs,
        instruments = cfg.bot.instruments.len(),
        dry_run = cfg.bot.dry_run,
        "ARBITER starting up"
    );

    let instruments: Vec<Instrument> = cfg
        .bot
        .instruments
        .iter()
        .map(|s| Instrument::new(s.clone()))
        .collect();

    // -- Venue clients ----------------------------------------------------

    let mut venues: Vec<Arc<dyn MarketDataClient>> = Vec::new();

    if cfg.venues.binance.enabled {
        let api_key = AppConfig::resolve_env(&cfg.venues.binance.api_key_env).ok();
        let api_secret = AppConfig::resolve_env(&cfg.venues.binance.api_secret_env).ok();
        if api_key.is_none() || api_secret.is_none() {
            warn!("Binance credentials missing, market data only");
        }
        venues.push(Arc::new(BinanceClient::new(api_key, api_secret)?));
        info!("Binance venue registered");
    }

    if cfg.venues.paper.enabled {
        for (i, name) in cfg.venues.paper.names.iter().enumerate() {
            let venue = PaperVenue::new(name, cfg.venues.paper.starting_balance, "USDT");
            seed_paper_quotes(&venue, &instruments, i, cfg.venues.paper.starting_balance);
            venues.push(Arc::new(venue));
            info!(venue = %name, "Paper venue registered");
        }
    }

    if venues.len() < 2 {
        warn!(
            count = venues.len(),
            "Fewer than two venues registered, no discrepancies can exist"
        );
    }

    let aggregator = Arc::new(PriceAggregator::new(
        venues,
        instruments,
        Duration::from_secs(cfg.bot.fetch_timeout_secs),
    ));

    // -- Loan backend -----------------------------------------------------

    let loan_client: Option<Arc<dyn LoanExecutionClient>> = if cfg.loan.enabled {
        build_loan_client(&cfg).await
    } else {
        None
    };

    // -- Engine -----------------------------------------------------------

    let ledger = RiskLedger::new(cfg.risk.clone());
    let mut orchestrator =
        Orchestrator::new(cfg.clone(), Arc::clone(&aggregator), ledger, loan_client);

    // -- Main loop --------------------------------------------------------

    let mut interval =
        tokio::time::interval(Duration::from_secs(cfg.bot.monitoring_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut last_reset = chrono::Utc::now().date_naive();

    info!(
        interval_secs = cfg.bot.monitoring_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !orchestrator.is_running() {
                    break;
                }

                let today = chrono::Utc::now().date_naive();
                if today != last_reset {
                    orchestrator.ledger_mut().reset_daily_limits();
                    last_reset = today;
                    info!("Daily limits reset");
                }

                if let Err(e) = orchestrator.run_cycle().await {
                    error!(error = %e, "Cycle failed, continuing to next");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                orchestrator.stop();
                break;
            }
        }
    }

    // -- Cleanup ----------------------------------------------------------

    for venue in aggregator.venues() {
        if let Err(e) = venue.close().await {
            warn!(venue = venue.name(), error = %e, "Venue close failed");
        }
    }

    let perf = orchestrator.ledger().performance_stats();
    storage::write_final_stats(FINAL_STATS_PATH, orchestrator.stats(), &perf)?;

    info!(
        opportunities = orchestrator.stats().total_opportunities,
        executed = orchestrator.stats().executed_trades,
        total_profit = %orchestrator.stats().total_profit,
        "ARBITER shut down cleanly."
    );

    Ok(())
}

/// Connect the loan backend, verifying chain reachability first. Any
/// failure downgrades to spot-only mode rather than aborting startup.
async fn build_loan_client(cfg: &AppConfig) -> Option<Arc<dyn LoanExecutionClient>> {
    let rpc_url = match AppConfig::resolve_env(&cfg.loan.rpc_url_env) {
        Ok(u) => u,
        Err(e) => {
            warn!(error = %e, "Loan backend disabled: RPC URL unavailable");
            return None;
        }
    };
    let from_address = match AppConfig::resolve_env(&cfg.loan.from_address_env) {
        Ok(a) => a,
        Err(e) => {
            warn!(error = %e, "Loan backend disabled: operator address unavailable");
            return None;
        }
    };

    if cfg.loan.contract_address.is_none() {
        warn!("Loan contract address unset, pre-flight and execution will be refused");
    }

    let client = match EvmLoanClient::new(
        rpc_url,
        &from_address,
        cfg.loan.contract_address.as_deref(),
        Duration::from_secs(cfg.loan.confirm_timeout_secs),
    ) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Loan backend disabled: client construction failed");
            return None;
        }
    };

    let status = client.network_status().await;
    if !status.connected {
        warn!("Loan backend disabled: chain unreachable");
        return None;
    }

    info!(
        block = status.block_height.unwrap_or(0),
        gas_gwei = %status.gas_price_gwei.round_dp(2),
        balance = %status.account_balance.round_dp(6),
        "Loan backend connected"
    );
    Some(Arc::new(client))
}

/// Seed a paper venue with indicative quotes and base inventory. Each
/// venue gets a small index-dependent price offset so neighbouring
/// paper venues show workable discrepancies in dry-run mode.
fn seed_paper_quotes(
    venue: &PaperVenue,
    instruments: &[Instrument],
    index: usize,
    quote_balance: Decimal,
) {
    for instrument in instruments {
        let base = reference_price(instrument.base());
        let offset = base * dec!(0.008) * Decimal::from(index as u64);
        let mid = base + offset;
        let half_spread = mid * dec!(0.0001);
        venue.set_quote(instrument.clone(), mid - half_spread, mid + half_spread);
        // Inventory for the sell leg: a couple of balances' worth.
        venue.deposit(instrument.base(), dec!(2) * quote_balance / base);
    }
}

/// Indicative reference prices for seeding paper venues.
fn reference_price(asset: &str) -> Decimal {
    match asset {
        "BTC" => dec!(43000),
        "ETH" => dec!(2400),
        "BNB" => dec!(310),
        "ADA" => dec!(0.52),
        "DOT" => dec!(7.4),
        "LINK" => dec!(15.2),
        "UNI" => dec!(6.3),
        "AAVE" => dec!(98),
        _ => dec!(100),
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arbiter=info"));

    let json_logging = std::env::var("ARBITER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
