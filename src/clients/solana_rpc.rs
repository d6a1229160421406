//! Solana JSON-RPC client
//! Mission: Simulation, submission and balance reads over plain HTTP

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const TOKEN_PROGRAM_ID: &str = "TokenkegQfeYrJcUAhLbRwPqsMnXbz3xTGW6SCVnNnXM";
const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulateValue {
    err: Option<Value>,
    #[serde(default)]
    logs: Option<Vec<String>>,
    #[serde(default)]
    units_consumed: Option<u64>,
}

/// Result of `simulateTransaction`
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub error: Option<String>,
    pub logs: Vec<String>,
    pub units_consumed: u64,
}

pub struct SolanaRpc {
    http: Client,
    url: String,
    next_id: AtomicU64,
}

impl SolanaRpc {
    pub fn new(http: Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("RPC {} request failed", method))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("RPC {} HTTP {}: {}", method, status, text));
        }

        let parsed: RpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to decode RPC {} response", method))?;

        if let Some(err) = parsed.error {
            return Err(anyhow!("RPC {} error {}: {}", method, err.code, err.message));
        }
        parsed
            .result
            .ok_or_else(|| anyhow!("RPC {} returned no result", method))
    }

    /// Simulate a base64 transaction without signature verification
    pub async fn simulate_transaction(&self, tx_base64: &str) -> Result<SimulationResult> {
        let result: WithContext<SimulateValue> = self
            .call(
                "simulateTransaction",
                json!([tx_base64, {
                    "encoding": "base64",
                    "sigVerify": false,
                    "replaceRecentBlockhash": true,
                    "commitment": "processed"
                }]),
            )
            .await?;

        let value = result.value;
        debug!(
            "Simulation finished: err={:?} units={:?}",
            value.err, value.units_consumed
        );
        Ok(SimulationResult {
            error: value.err.map(|e| e.to_string()),
            logs: value.logs.unwrap_or_default(),
            units_consumed: value.units_consumed.unwrap_or(0),
        })
    }

    /// Forward an already-signed base64 transaction, returning its signature
    pub async fn send_transaction(&self, tx_base64: &str) -> Result<String> {
        self.call(
            "sendTransaction",
            json!([tx_base64, {"encoding": "base64", "preflightCommitment": "confirmed"}]),
        )
        .await
    }

    /// Native SOL balance in SOL
    pub async fn get_sol_balance(&self, address: &str) -> Result<f64> {
        let result: WithContext<u64> = self.call("getBalance", json!([address])).await?;
        Ok(result.value as f64 / LAMPORTS_PER_SOL)
    }

    /// SPL token balances as (mint, ui amount), summed per mint
    pub async fn get_token_balances(&self, owner: &str) -> Result<Vec<(String, f64)>> {
        let result: WithContext<Vec<Value>> = self
            .call(
                "getTokenAccountsByOwner",
                json!([owner, {"programId": TOKEN_PROGRAM_ID}, {"encoding": "jsonParsed"}]),
            )
            .await?;

        let mut balances: Vec<(String, f64)> = Vec::new();
        for account in result.value {
            let info = &account["account"]["data"]["parsed"]["info"];
            let Some(mint) = info["mint"].as_str() else {
                continue;
            };
            let amount = info["tokenAmount"]["uiAmountString"]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .or_else(|| info["tokenAmount"]["uiAmount"].as_f64())
                .unwrap_or(0.0);

            match balances.iter_mut().find(|(m, _)| m == mint) {
                Some((_, total)) => *total += amount,
                None => balances.push((mint.to_string(), amount)),
            }
        }
        Ok(balances)
    }
}
