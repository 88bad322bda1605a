//! Loan-funded execution.
//!
//! Defines the `LoanExecutionClient` trait — the capability boundary
//! for single-transaction, loan-funded arbitrage — plus its parameter
//! and outcome types. The contract's internal correctness is assumed;
//! the client only reports success/failure, cost, and realized profit.

pub mod evm;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Wei per whole token (18 decimals).
const WEI_PER_TOKEN: u128 = 1_000_000_000_000_000_000;

/// Parameters for one atomic loan-funded arbitrage.
#[derive(Debug, Clone)]
pub struct LoanParams {
    /// Borrowed/traded token symbol (base asset), e.g. `WETH`.
    pub token_a: String,
    /// Counter token symbol (quote asset).
    pub token_b: String,
    /// Loan notional in wei of `token_a`.
    pub amount_wei: u128,
    /// DEX identifier to buy on.
    pub buy_dex: String,
    /// DEX identifier to sell on.
    pub sell_dex: String,
    /// Floor passed into the transaction so it aborts on-chain if the
    /// realized profit would come in below it. Wei.
    pub min_profit_wei: u128,
}

/// Result of the pre-flight `canExecuteArbitrage` view call.
#[derive(Debug, Clone)]
pub struct Preflight {
    pub can_execute: bool,
    pub expected_profit_wei: u128,
    pub reason: String,
}

/// Outcome of a submitted loan transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanOutcome {
    pub success: bool,
    pub tx_id: Option<String>,
    pub gas_used: Option<u64>,
    /// Realized profit decoded from the ArbitrageExecuted event, in
    /// whole tokens. None when the transaction failed or the event
    /// was absent.
    pub profit: Option<Decimal>,
    pub error: Option<String>,
}

/// Estimated execution cost of a loan transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub gas: u64,
    pub gas_price_gwei: Decimal,
    /// Total cost in the native currency (ETH).
    pub cost_native: Decimal,
}

/// Chain connectivity snapshot for the periodic stats banner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub connected: bool,
    pub block_height: Option<u64>,
    pub gas_price_gwei: Decimal,
    /// Operator account balance in the native currency.
    pub account_balance: Decimal,
}

impl NetworkStatus {
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            block_height: None,
            gas_price_gwei: Decimal::ZERO,
            account_balance: Decimal::ZERO,
        }
    }
}

/// Abstraction over the loan-funded execution backend.
#[async_trait]
pub trait LoanExecutionClient: Send + Sync {
    /// Pre-flight check: would the contract accept these parameters?
    async fn can_execute(&self, params: &LoanParams) -> Result<Preflight>;

    /// Submit the atomic loan-funded arbitrage and wait for
    /// confirmation (bounded by the client's configured timeout).
    async fn execute(&self, params: &LoanParams) -> Result<LoanOutcome>;

    /// Estimate the gas cost of executing a loan for `amount` of `asset`.
    async fn estimate_cost(&self, asset: &str, amount: Decimal) -> Result<CostEstimate>;

    /// Connectivity and account snapshot. Never errors; a failed probe
    /// reports `connected: false`.
    async fn network_status(&self) -> NetworkStatus;
}

/// Convert a whole-token amount to wei (18 decimals). Returns `None`
/// for negative amounts or values that overflow.
pub fn to_wei(amount: Decimal) -> Option<u128> {
    if amount.is_sign_negative() {
        return None;
    }
    let factor = Decimal::from_i128_with_scale(WEI_PER_TOKEN as i128, 0);
    amount.checked_mul(factor)?.trunc().to_u128()
}

/// Convert wei to a whole-token `Decimal`. Caller-side amounts are
/// bounded by the loan ceiling, well inside `Decimal`'s 96-bit mantissa.
pub fn from_wei(wei: u128) -> Decimal {
    Decimal::from_i128_with_scale(wei as i128, 18).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_wei_round_trip() {
        assert_eq!(to_wei(dec!(1)), Some(WEI_PER_TOKEN));
        assert_eq!(to_wei(dec!(0.5)), Some(WEI_PER_TOKEN / 2));
        assert_eq!(from_wei(WEI_PER_TOKEN * 3 / 2), dec!(1.5));
    }

    #[test]
    fn test_wei_rejects_negative() {
        assert_eq!(to_wei(dec!(-1)), None);
    }

    #[test]
    fn test_large_notional_fits() {
        // 100,000 tokens — the loan ceiling — must not overflow.
        let wei = to_wei(dec!(100000)).unwrap();
        assert_eq!(from_wei(wei), dec!(100000));
    }
}
