//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys, RPC URLs, wallet addresses) are referenced by
//! env-var name in the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub risk: RiskSettings,
    pub venues: VenuesConfig,
    pub loan: LoanSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    pub name: String,
    /// Seconds between cycles.
    pub monitoring_interval_secs: u64,
    /// How many top-ranked opportunities to process per cycle.
    pub top_candidates: usize,
    /// When true, trade against paper venues only.
    pub dry_run: bool,
    /// Instruments to scan, `BASE/QUOTE` notation.
    pub instruments: Vec<String>,
    /// Per-request ticker timeout during aggregation.
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskSettings {
    pub min_profit_pct: Decimal,
    pub min_trade_amount: Decimal,
    pub max_trade_amount: Decimal,
    pub max_slippage_pct: Decimal,
    pub max_daily_trades: usize,
    pub max_daily_loss: Decimal,
    pub cooldown_minutes: i64,
    pub max_spread_pct: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VenuesConfig {
    pub binance: BinanceConfig,
    pub paper: PaperConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BinanceConfig {
    pub enabled: bool,
    pub api_key_env: String,
    pub api_secret_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaperConfig {
    pub enabled: bool,
    /// Names of the simulated venues to spin up in dry-run mode.
    #[serde(default)]
    pub names: Vec<String>,
    /// Starting quote-asset balance per paper venue.
    pub starting_balance: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoanSettings {
    pub enabled: bool,
    pub rpc_url_env: String,
    pub from_address_env: String,
    /// Deployed arbitrage contract. Loan execution stays disabled
    /// while this is unset.
    #[serde(default)]
    pub contract_address: Option<String>,
    /// Minimum profit percentage for an opportunity to take the loan
    /// path instead of the spot path.
    pub loan_worthy_profit_pct: Decimal,
    /// Absolute ceiling on loan notional, quote asset.
    pub max_loan_notional: Decimal,
    /// Placeholder native-asset → USD conversion used in the
    /// gas-coverage check. Should come from a live feed eventually.
    pub native_usd_rate: Decimal,
    pub confirm_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
