use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::clients::{JupiterClient, JupiterQuote, QuoteRequest, SimulationResult, SolanaRpc};
use crate::feed::source::route_labels;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LegSide {
    Buy,
    Sell,
}

impl fmt::Display for LegSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LegSide::Buy => "buy",
            LegSide::Sell => "sell",
        })
    }
}

/// One swap of an arbitrage round trip
#[derive(Debug, Clone, PartialEq)]
pub struct SwapLeg {
    pub side: LegSide,
    pub venue: String,
    pub input_mint: String,
    pub output_mint: String,
    /// Raw input amount
    pub amount_in: u64,
    /// Raw output implied by the opportunity price
    pub expected_out: u64,
    pub slippage_bps: u16,
}

impl SwapLeg {
    /// Lowest acceptable quoted output
    pub fn min_out(&self) -> u64 {
        let keep = 1.0 - f64::from(self.slippage_bps) / 10_000.0;
        (self.expected_out as f64 * keep).floor() as u64
    }
}

/// A leg that has been quoted, built and simulated
#[derive(Debug, Clone)]
pub struct PreparedLeg {
    pub leg: SwapLeg,
    pub quoted_out: u64,
    pub transaction: String,
    pub simulation: SimulationResult,
}

/// Quotes and builds swap transactions for a single venue
#[async_trait]
pub trait SwapRouter: Send + Sync {
    async fn quote(&self, leg: &SwapLeg) -> Result<JupiterQuote>;

    /// Unsigned base64 transaction for a quote
    async fn build(&self, quote: &JupiterQuote, wallet: &str) -> Result<String>;
}

pub struct JupiterSwapRouter {
    client: Arc<JupiterClient>,
}

impl JupiterSwapRouter {
    pub fn new(client: Arc<JupiterClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SwapRouter for JupiterSwapRouter {
    async fn quote(&self, leg: &SwapLeg) -> Result<JupiterQuote> {
        self.client
            .quote(&QuoteRequest {
                input_mint: &leg.input_mint,
                output_mint: &leg.output_mint,
                amount: leg.amount_in,
                slippage_bps: leg.slippage_bps,
                dexes: route_labels(&leg.venue),
            })
            .await
    }

    async fn build(&self, quote: &JupiterQuote, wallet: &str) -> Result<String> {
        self.client.swap_transaction(quote, wallet).await
    }
}

#[async_trait]
pub trait TransactionSimulator: Send + Sync {
    async fn simulate(&self, transaction: &str) -> Result<SimulationResult>;
}

#[async_trait]
impl TransactionSimulator for SolanaRpc {
    async fn simulate(&self, transaction: &str) -> Result<SimulationResult> {
        self.simulate_transaction(transaction).await
    }
}
