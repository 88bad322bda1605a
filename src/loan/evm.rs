//! EVM loan execution backend over plain JSON-RPC.
//!
//! Talks to an Ethereum node (eth_call / eth_sendTransaction /
//! eth_getTransactionReceipt) and to a pre-deployed arbitrage contract
//! exposing `canExecuteArbitrage` and `executeArbitrage`, both taking
//! `(address tokenA, address tokenB, uint256 amountIn, address buyDex,
//! address sellDex, uint256 minProfit)`.
//!
//! Transactions are signed node-side (`eth_sendTransaction`), so the
//! node must manage the operator account.

use alloy_primitives::{hex, keccak256, Address, U256};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    from_wei, CostEstimate, LoanExecutionClient, LoanOutcome, LoanParams, NetworkStatus, Preflight,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Rough gas estimate for a flash-loan arbitrage round trip.
const ESTIMATED_GAS: u64 = 800_000;

/// Gas limit submitted with the transaction.
const TX_GAS_LIMIT: u64 = 1_000_000;

/// Fallback gas price when the node refuses to quote one. 20 gwei.
const FALLBACK_GAS_PRICE_WEI: u128 = 20_000_000_000;

/// Receipt polling interval.
const POLL_INTERVAL: Duration = Duration::from_secs(3);

const EXECUTE_SIG: &str = "executeArbitrage((address,address,uint256,address,address,uint256))";
const CAN_EXECUTE_SIG: &str =
    "canExecuteArbitrage((address,address,uint256,address,address,uint256))";
const ARBITRAGE_EVENT_SIG: &str = "ArbitrageExecuted(address,uint256,uint256,address,address)";

/// Well-known mainnet token addresses.
fn token_address(symbol: &str) -> Option<Address> {
    let addr = match symbol.to_uppercase().as_str() {
        "WETH" | "ETH" => "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
        "USDC" => "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
        "USDT" => "0xdAC17F958D2ee523a2206206994597C13D831ec7",
        "DAI" => "0x6B175474E89094C44Da98b954EedeAC495271d0F",
        "WBTC" | "BTC" => "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599",
        _ => return None,
    };
    Address::from_str(addr).ok()
}

/// DEX router addresses keyed by identifier.
fn dex_router(dex: &str) -> Option<Address> {
    let addr = match dex {
        "uniswap_v2" => "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D",
        "sushiswap" => "0xd9e1cE17f2641f24aE83637ab66a2cca9C378B9F",
        _ => return None,
    };
    Address::from_str(addr).ok()
}

/// Map a venue name to a supported DEX identifier, if any.
pub fn dex_for_venue(venue: &str) -> Option<&'static str> {
    let lower = venue.to_lowercase();
    if lower.contains("uniswap") {
        Some("uniswap_v2")
    } else if lower.contains("sushi") {
        Some("sushiswap")
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// JSON-RPC plumbing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    status: String,
    gas_used: String,
    #[serde(default)]
    logs: Vec<LogEntry>,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
}

fn parse_hex_u128(s: &str) -> Result<u128> {
    let trimmed = s.trim_start_matches("0x");
    if trimmed.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(trimmed, 16).with_context(|| format!("invalid hex quantity: {s:?}"))
}

fn parse_hex_u64(s: &str) -> Result<u64> {
    Ok(parse_hex_u128(s)? as u64)
}

// ---------------------------------------------------------------------------
// ABI encoding / decoding
// ---------------------------------------------------------------------------

/// 4-byte function selector.
fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

fn push_address(out: &mut Vec<u8>, addr: Address) {
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(addr.as_slice());
}

fn push_u256(out: &mut Vec<u8>, value: u128) {
    out.extend_from_slice(&U256::from(value).to_be_bytes::<32>());
}

/// Encode an `executeArbitrage`/`canExecuteArbitrage` call. The
/// parameter tuple is fully static, so it encodes in place after the
/// selector: six 32-byte words.
fn encode_call(signature: &str, params: &ResolvedParams) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 6 * 32);
    out.extend_from_slice(&selector(signature));
    push_address(&mut out, params.token_a);
    push_address(&mut out, params.token_b);
    push_u256(&mut out, params.amount_wei);
    push_address(&mut out, params.buy_dex);
    push_address(&mut out, params.sell_dex);
    push_u256(&mut out, params.min_profit_wei);
    out
}

/// Decode the `(bool, uint256, string)` return of `canExecuteArbitrage`.
fn decode_preflight(data: &[u8]) -> Result<Preflight> {
    if data.len() < 96 {
        bail!("canExecuteArbitrage returned {} bytes, expected >= 96", data.len());
    }
    let can_execute = data[31] == 1;
    let expected_profit_wei = U256::from_be_slice(&data[32..64])
        .try_into()
        .unwrap_or(u128::MAX);

    // Third word is the offset of the reason string.
    let offset: usize = U256::from_be_slice(&data[64..96]).try_into().unwrap_or(0);
    let reason = if offset != 0 && data.len() >= offset + 32 {
        let len: usize = U256::from_be_slice(&data[offset..offset + 32])
            .try_into()
            .unwrap_or(0);
        let start = offset + 32;
        if data.len() >= start + len {
            String::from_utf8_lossy(&data[start..start + len]).into_owned()
        } else {
            String::new()
        }
    } else {
        String::new()
    };

    Ok(Preflight {
        can_execute,
        expected_profit_wei,
        reason,
    })
}

/// Resolved on-chain addresses for a loan attempt.
struct ResolvedParams {
    token_a: Address,
    token_b: Address,
    amount_wei: u128,
    buy_dex: Address,
    sell_dex: Address,
    min_profit_wei: u128,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct EvmLoanClient {
    http: Client,
    rpc_url: String,
    from_address: Address,
    contract: Option<Address>,
    confirm_timeout: Duration,
    next_id: AtomicU64,
}

impl EvmLoanClient {
    pub fn new(
        rpc_url: impl Into<String>,
        from_address: &str,
        contract_address: Option<&str>,
        confirm_timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build RPC HTTP client")?;

        let from_address = Address::from_str(from_address)
            .map_err(|_| anyhow!("invalid operator address: {from_address:?}"))?;
        let contract = contract_address
            .map(|a| {
                Address::from_str(a).map_err(|_| anyhow!("invalid contract address: {a:?}"))
            })
            .transpose()?;

        Ok(Self {
            http,
            rpc_url: rpc_url.into(),
            from_address,
            contract,
            confirm_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let resp: RpcResponse = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("RPC {method} request failed"))?
            .json()
            .await
            .with_context(|| format!("RPC {method} returned invalid JSON"))?;

        if let Some(err) = resp.error {
            bail!("RPC {method} error {}: {}", err.code, err.message);
        }
        resp.result
            .ok_or_else(|| anyhow!("RPC {method} returned no result"))
    }

    async fn rpc_quantity(&self, method: &str, params: Value) -> Result<u128> {
        let value = self.rpc(method, params).await?;
        let s = value
            .as_str()
            .ok_or_else(|| anyhow!("RPC {method} result is not a hex string"))?;
        parse_hex_u128(s)
    }

    /// Current gas price with a 10% bump for prompt inclusion, falling
    /// back to 20 gwei when the node won't quote one.
    async fn optimal_gas_price(&self) -> u128 {
        match self.rpc_quantity("eth_gasPrice", json!([])).await {
            Ok(price) => price + price / 10,
            Err(e) => {
                warn!(error = %e, "Gas price lookup failed, using fallback");
                FALLBACK_GAS_PRICE_WEI
            }
        }
    }

    fn resolve(&self, params: &LoanParams) -> Result<ResolvedParams> {
        Ok(ResolvedParams {
            token_a: token_address(&params.token_a)
                .ok_or_else(|| anyhow!("unsupported token: {}", params.token_a))?,
            token_b: token_address(&params.token_b)
                .ok_or_else(|| anyhow!("unsupported token: {}", params.token_b))?,
            amount_wei: params.amount_wei,
            buy_dex: dex_router(&params.buy_dex)
                .ok_or_else(|| anyhow!("unsupported DEX: {}", params.buy_dex))?,
            sell_dex: dex_router(&params.sell_dex)
                .ok_or_else(|| anyhow!("unsupported DEX: {}", params.sell_dex))?,
            min_profit_wei: params.min_profit_wei,
        })
    }

    fn contract(&self) -> Result<Address> {
        self.contract
            .ok_or_else(|| anyhow!("arbitrage contract address not configured"))
    }

    /// Poll for a receipt until confirmation or until the caller's
    /// timeout cancels the future.
    async fn await_receipt(&self, tx_hash: &str) -> Result<Receipt> {
        loop {
            let result = self
                .rpc("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if !result.is_null() {
                return serde_json::from_value(result).context("failed to parse receipt");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Extract the realized profit from an `ArbitrageExecuted` event,
    /// if the receipt carries one. Event data words: asset, amount,
    /// profit, buyDex, sellDex.
    fn realized_profit(receipt: &Receipt) -> Option<Decimal> {
        let topic = format!("0x{}", hex::encode(keccak256(ARBITRAGE_EVENT_SIG.as_bytes())));
        for log in &receipt.logs {
            if log.topics.first().map(|t| t.eq_ignore_ascii_case(&topic)) == Some(true) {
                let data = hex::decode(log.data.trim_start_matches("0x")).ok()?;
                if data.len() >= 96 {
                    let profit_wei: u128 = U256::from_be_slice(&data[64..96])
                        .try_into()
                        .unwrap_or(u128::MAX);
                    return Some(from_wei(profit_wei));
                }
            }
        }
        None
    }
}

#[async_trait]
impl LoanExecutionClient for EvmLoanClient {
    async fn can_execute(&self, params: &LoanParams) -> Result<Preflight> {
        let contract = self.contract()?;
        let resolved = self.resolve(params)?;
        let data = encode_call(CAN_EXECUTE_SIG, &resolved);

        let result = self
            .rpc(
                "eth_call",
                json!([
                    {
                        "from": self.from_address.to_string(),
                        "to": contract.to_string(),
                        "data": format!("0x{}", hex::encode(data)),
                    },
                    "latest"
                ]),
            )
            .await?;

        let raw = result
            .as_str()
            .ok_or_else(|| anyhow!("eth_call result is not a hex string"))?;
        let bytes = hex::decode(raw.trim_start_matches("0x")).context("invalid eth_call data")?;
        decode_preflight(&bytes)
    }

    async fn execute(&self, params: &LoanParams) -> Result<LoanOutcome> {
        let contract = self.contract()?;
        let resolved = self.resolve(params)?;

        // Pre-flight before spending gas.
        let preflight = self.can_execute(params).await?;
        if !preflight.can_execute {
            return Ok(LoanOutcome {
                success: false,
                tx_id: None,
                gas_used: None,
                profit: None,
                error: Some(preflight.reason),
            });
        }

        let gas_price = self.optimal_gas_price().await;
        let data = encode_call(EXECUTE_SIG, &resolved);

        let tx_hash = self
            .rpc(
                "eth_sendTransaction",
                json!([{
                    "from": self.from_address.to_string(),
                    "to": contract.to_string(),
                    "gas": format!("0x{TX_GAS_LIMIT:x}"),
                    "gasPrice": format!("0x{gas_price:x}"),
                    "data": format!("0x{}", hex::encode(data)),
                }]),
            )
            .await?
            .as_str()
            .ok_or_else(|| anyhow!("eth_sendTransaction returned no hash"))?
            .to_string();

        info!(tx = %tx_hash, amount_wei = params.amount_wei, "Loan transaction submitted");

        let receipt = match tokio::time::timeout(self.confirm_timeout, self.await_receipt(&tx_hash))
            .await
        {
            Ok(receipt) => receipt?,
            Err(_) => {
                return Ok(LoanOutcome {
                    success: false,
                    tx_id: Some(tx_hash),
                    gas_used: None,
                    profit: None,
                    error: Some(format!(
                        "confirmation timed out after {}s",
                        self.confirm_timeout.as_secs()
                    )),
                });
            }
        };

        let gas_used = parse_hex_u64(&receipt.gas_used).ok();
        if receipt.status == "0x1" {
            let profit = Self::realized_profit(&receipt);
            debug!(tx = %tx_hash, ?profit, "Loan transaction confirmed");
            Ok(LoanOutcome {
                success: true,
                tx_id: Some(tx_hash),
                gas_used,
                profit,
                error: None,
            })
        } else {
            Ok(LoanOutcome {
                success: false,
                tx_id: Some(tx_hash),
                gas_used,
                profit: None,
                error: Some("transaction reverted".to_string()),
            })
        }
    }

    async fn estimate_cost(&self, _asset: &str, _amount: Decimal) -> Result<CostEstimate> {
        let gas_price = match self.rpc_quantity("eth_gasPrice", json!([])).await {
            Ok(p) => p,
            Err(_) => FALLBACK_GAS_PRICE_WEI,
        };
        let cost_wei = gas_price.saturating_mul(ESTIMATED_GAS as u128);
        Ok(CostEstimate {
            gas: ESTIMATED_GAS,
            gas_price_gwei: from_wei(gas_price) * Decimal::from(1_000_000_000u64),
            cost_native: from_wei(cost_wei),
        })
    }

    async fn network_status(&self) -> NetworkStatus {
        let block = match self.rpc_quantity("eth_blockNumber", json!([])).await {
            Ok(n) => n as u64,
            Err(e) => {
                debug!(error = %e, "Network probe failed");
                return NetworkStatus::disconnected();
            }
        };

        let gas_price = self
            .rpc_quantity("eth_gasPrice", json!([]))
            .await
            .unwrap_or(FALLBACK_GAS_PRICE_WEI);
        let balance = self
            .rpc_quantity(
                "eth_getBalance",
                json!([self.from_address.to_string(), "latest"]),
            )
            .await
            .unwrap_or(0);

        NetworkStatus {
            connected: true,
            block_height: Some(block),
            gas_price_gwei: from_wei(gas_price) * Decimal::from(1_000_000_000u64),
            account_balance: from_wei(balance),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_resolved() -> ResolvedParams {
        ResolvedParams {
            token_a: token_address("WETH").unwrap(),
            token_b: token_address("USDT").unwrap(),
            amount_wei: 5 * 10u128.pow(18),
            buy_dex: dex_router("uniswap_v2").unwrap(),
            sell_dex: dex_router("sushiswap").unwrap(),
            min_profit_wei: 10u128.pow(17),
        }
    }

    #[test]
    fn test_encode_call_layout() {
        let encoded = encode_call(EXECUTE_SIG, &sample_resolved());
        // selector + six 32-byte words
        assert_eq!(encoded.len(), 4 + 6 * 32);
        // tokenA word: 12 zero bytes then the address
        assert_eq!(&encoded[4..16], &[0u8; 12]);
        assert_eq!(&encoded[16..36], token_address("WETH").unwrap().as_slice());
        // amountIn in the third word
        let amount = U256::from_be_slice(&encoded[4 + 2 * 32..4 + 3 * 32]);
        assert_eq!(amount, U256::from(5u128 * 10u128.pow(18)));
    }

    #[test]
    fn test_selectors_differ_per_function() {
        assert_ne!(selector(EXECUTE_SIG), selector(CAN_EXECUTE_SIG));
    }

    #[test]
    fn test_decode_preflight_accept() {
        let mut data = Vec::new();
        // bool true
        data.extend_from_slice(&U256::from(1u8).to_be_bytes::<32>());
        // expected profit
        data.extend_from_slice(&U256::from(42u64).to_be_bytes::<32>());
        // string offset (96) + length 2 + "ok" padded
        data.extend_from_slice(&U256::from(96u64).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(2u64).to_be_bytes::<32>());
        let mut word = [0u8; 32];
        word[..2].copy_from_slice(b"ok");
        data.extend_from_slice(&word);

        let pre = decode_preflight(&data).unwrap();
        assert!(pre.can_execute);
        assert_eq!(pre.expected_profit_wei, 42);
        assert_eq!(pre.reason, "ok");
    }

    #[test]
    fn test_decode_preflight_short_data_fails() {
        assert!(decode_preflight(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_dex_for_venue_mapping() {
        assert_eq!(dex_for_venue("uniswap-v2"), Some("uniswap_v2"));
        assert_eq!(dex_for_venue("SushiSwap"), Some("sushiswap"));
        assert_eq!(dex_for_venue("binance"), None);
    }

    #[test]
    fn test_parse_hex_quantities() {
        assert_eq!(parse_hex_u128("0x10").unwrap(), 16);
        assert_eq!(parse_hex_u128("0x").unwrap(), 0);
        assert!(parse_hex_u128("0xzz").is_err());
    }

    #[test]
    fn test_cost_estimate_arithmetic() {
        // 20 gwei * 800k gas = 0.016 ETH
        let cost_wei = FALLBACK_GAS_PRICE_WEI * ESTIMATED_GAS as u128;
        assert_eq!(from_wei(cost_wei), dec!(0.016));
    }

    #[test]
    fn test_invalid_addresses_rejected() {
        assert!(EvmLoanClient::new(
            "http://localhost:8545",
            "not-an-address",
            None,
            Duration::from_secs(300),
        )
        .is_err());
    }

    /// ABI-encoded `(true, 42, "ok")` preflight return.
    fn preflight_accept_hex() -> String {
        let mut data = Vec::new();
        data.extend_from_slice(&U256::from(1u8).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(42u64).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(96u64).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(2u64).to_be_bytes::<32>());
        let mut word = [0u8; 32];
        word[..2].copy_from_slice(b"ok");
        data.extend_from_slice(&word);
        format!("0x{}", hex::encode(data))
    }

    /// Minimal JSON-RPC node stub: answers pre-flight and submission
    /// calls but never produces a receipt.
    async fn spawn_receiptless_node() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let preflight = preflight_accept_hex();

        tokio::spawn(async move {
            loop {
                let (mut sock, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let preflight = preflight.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    loop {
                        let n = match sock.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        buf.extend_from_slice(&chunk[..n]);
                        let text = String::from_utf8_lossy(&buf);
                        if let Some(header_end) = text.find("\r\n\r\n") {
                            let body_len = text
                                .lines()
                                .find_map(|l| l.to_lowercase().strip_prefix("content-length:").map(str::to_string))
                                .and_then(|v| v.trim().parse::<usize>().ok())
                                .unwrap_or(0);
                            if buf.len() >= header_end + 4 + body_len {
                                break;
                            }
                        }
                    }

                    let request = String::from_utf8_lossy(&buf);
                    let result = if request.contains("eth_call") {
                        format!("\"{preflight}\"")
                    } else if request.contains("eth_gasPrice") {
                        "\"0x4a817c800\"".to_string()
                    } else if request.contains("eth_sendTransaction") {
                        format!("\"0x{}\"", "11".repeat(32))
                    } else {
                        // eth_getTransactionReceipt: never confirms.
                        "null".to_string()
                    };

                    let body = format!("{{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{result}}}");
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = sock.write_all(response.as_bytes()).await;
                });
            }
        });

        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_execute_fails_cleanly_when_receipt_never_arrives() {
        let url = spawn_receiptless_node().await;
        let client = EvmLoanClient::new(
            url,
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266",
            Some("0x5fbdb2315678afecb367f032d93f642f64180aa3"),
            Duration::from_secs(1),
        )
        .unwrap();

        let params = LoanParams {
            token_a: "WETH".to_string(),
            token_b: "USDT".to_string(),
            amount_wei: 10u128.pow(18),
            buy_dex: "uniswap_v2".to_string(),
            sell_dex: "sushiswap".to_string(),
            min_profit_wei: 1,
        };

        let outcome = client.execute(&params).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.tx_id.is_some());
        assert!(outcome.error.unwrap().contains("timed out"));
    }
}
