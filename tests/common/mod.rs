//! Shared test doubles for integration tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Mutex;

use arbiter::loan::{
    CostEstimate, LoanExecutionClient, LoanOutcome, LoanParams, NetworkStatus, Preflight,
};

/// Scripted loan backend: returns preconfigured responses and records
/// every submitted parameter set for assertions.
pub struct ScriptedLoanClient {
    pub cost_native: Mutex<Decimal>,
    pub outcome: Mutex<LoanOutcome>,
    pub fail_estimate: Mutex<bool>,
    pub submitted: Mutex<Vec<LoanParams>>,
}

impl ScriptedLoanClient {
    pub fn succeeding(profit: Decimal) -> Self {
        Self {
            cost_native: Mutex::new(dec!(0.016)),
            outcome: Mutex::new(LoanOutcome {
                success: true,
                tx_id: Some("0xabc123".to_string()),
                gas_used: Some(650_000),
                profit: Some(profit),
                error: None,
            }),
            fail_estimate: Mutex::new(false),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        let client = Self::succeeding(Decimal::ZERO);
        *client.outcome.lock().unwrap() = LoanOutcome {
            success: false,
            tx_id: Some("0xdead".to_string()),
            gas_used: Some(120_000),
            profit: None,
            error: Some(reason.to_string()),
        };
        client
    }

    pub fn set_cost_native(&self, cost: Decimal) {
        *self.cost_native.lock().unwrap() = cost;
    }

    pub fn submissions(&self) -> Vec<LoanParams> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl LoanExecutionClient for ScriptedLoanClient {
    async fn can_execute(&self, _params: &LoanParams) -> Result<Preflight> {
        Ok(Preflight {
            can_execute: true,
            expected_profit_wei: 0,
            reason: String::new(),
        })
    }

    async fn execute(&self, params: &LoanParams) -> Result<LoanOutcome> {
        self.submitted.lock().unwrap().push(params.clone());
        Ok(self.outcome.lock().unwrap().clone())
    }

    async fn estimate_cost(&self, _asset: &str, _amount: Decimal) -> Result<CostEstimate> {
        if *self.fail_estimate.lock().unwrap() {
            bail!("node unreachable");
        }
        Ok(CostEstimate {
            gas: 800_000,
            gas_price_gwei: dec!(20),
            cost_native: *self.cost_native.lock().unwrap(),
        })
    }

    async fn network_status(&self) -> NetworkStatus {
        NetworkStatus {
            connected: true,
            block_height: Some(19_000_000),
            gas_price_gwei: dec!(20),
            account_balance: dec!(1.5),
        }
    }
}
