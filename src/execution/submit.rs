use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::clients::SolanaRpc;

/// Hands a built transaction to the network (or pretends to)
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    fn mode(&self) -> &'static str;

    /// Returns the transaction signature
    async fn submit(&self, transaction: &str) -> Result<String>;
}

/// Paper trading: nothing leaves the process
#[derive(Debug, Default)]
pub struct PaperSubmitter;

#[async_trait]
impl TransactionSubmitter for PaperSubmitter {
    fn mode(&self) -> &'static str {
        "paper"
    }

    async fn submit(&self, _transaction: &str) -> Result<String> {
        Ok(format!("paper_{}", Uuid::new_v4().simple()))
    }
}

/// Client for an external signing service: `POST {"transaction"}` answers
/// `{"signed_transaction"}`, both base64
pub struct RemoteSigner {
    http: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct SignResponse {
    signed_transaction: String,
}

impl RemoteSigner {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self { http, url: url.into() }
    }

    pub async fn sign(&self, transaction: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "transaction": transaction }))
            .send()
            .await
            .context("Signer request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Signer returned {}: {}", status, body);
        }
        let signed: SignResponse = response.json().await.context("Malformed signer response")?;
        Ok(signed.signed_transaction)
    }
}

/// Live submission: sign externally, then `sendTransaction`
pub struct RpcSubmitter {
    rpc: Arc<SolanaRpc>,
    signer: RemoteSigner,
}

impl RpcSubmitter {
    pub fn new(rpc: Arc<SolanaRpc>, signer: RemoteSigner) -> Self {
        Self { rpc, signer }
    }
}

#[async_trait]
impl TransactionSubmitter for RpcSubmitter {
    fn mode(&self) -> &'static str {
        "live"
    }

    async fn submit(&self, transaction: &str) -> Result<String> {
        let signed = self.signer.sign(transaction).await?;
        let signature = self.rpc.send_transaction(&signed).await?;
        info!("📤 Submitted transaction {}", signature);
        Ok(signature)
    }
}
