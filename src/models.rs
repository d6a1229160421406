//! Domain Models
//! Mission: Shared types for prices, opportunities, trades and wallets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// Token registry entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub mint_address: String,
    pub decimals: u8,
}

impl Token {
    /// Convert a UI amount into raw base units
    pub fn to_raw(&self, ui_amount: f64) -> u64 {
        (ui_amount * 10f64.powi(self.decimals as i32)).round().max(0.0) as u64
    }

    /// Convert raw base units into a UI amount
    pub fn to_ui(&self, raw: u64) -> f64 {
        raw as f64 / 10f64.powi(self.decimals as i32)
    }
}

/// Directional pair identity (input mint priced in output mint)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub input_mint: String,
    pub output_mint: String,
}

impl PairKey {
    pub fn new(input_mint: impl Into<String>, output_mint: impl Into<String>) -> Self {
        Self {
            input_mint: input_mint.into(),
            output_mint: output_mint.into(),
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.input_mint, self.output_mint)
    }
}

/// Resolved pair with both tokens' metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub base: Token,
    pub quote: Token,
}

impl TokenPair {
    pub fn new(base: Token, quote: Token) -> Self {
        Self { base, quote }
    }

    pub fn key(&self) -> PairKey {
        PairKey::new(&self.base.mint_address, &self.quote.mint_address)
    }

    pub fn symbol(&self) -> String {
        format!("{}/{}", self.base.symbol, self.quote.symbol)
    }
}

/// One venue's price for a pair at a point in time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VenueQuote {
    pub pair: PairKey,
    pub symbol: String,
    pub venue: String,
    pub price: f64,
    pub price_impact_pct: f64,
    pub observed_at: DateTime<Utc>,
}

impl VenueQuote {
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now.signed_duration_since(self.observed_at) <= max_age
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VenuePrice {
    pub venue: String,
    pub price: f64,
}

/// Reference price published to subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    pub symbol: String,
    pub input_mint: String,
    pub output_mint: String,
    pub price: f64,
    pub price_change_pct: f64,
    pub last_updated: DateTime<Utc>,
    pub venues: Vec<VenuePrice>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityStatus {
    Active,
    Executing,
    Completed,
    Expired,
    Failed,
}

impl OpportunityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityStatus::Active => "active",
            OpportunityStatus::Executing => "executing",
            OpportunityStatus::Completed => "completed",
            OpportunityStatus::Expired => "expired",
            OpportunityStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(OpportunityStatus::Active),
            "executing" => Some(OpportunityStatus::Executing),
            "completed" => Some(OpportunityStatus::Completed),
            "expired" => Some(OpportunityStatus::Expired),
            "failed" => Some(OpportunityStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OpportunityStatus::Completed | OpportunityStatus::Expired | OpportunityStatus::Failed
        )
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best qualifying venue combination for a pair, before it is persisted
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadCandidate {
    pub pair: PairKey,
    pub symbol: String,
    pub buy_venue: String,
    pub sell_venue: String,
    pub buy_price: f64,
    pub sell_price: f64,
    /// Gross spread in percent
    pub price_diff_percent: f64,
    /// Spread after fees and slippage buffer, in percent
    pub net_spread_percent: f64,
    pub potential_profit_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Opportunity {
    pub id: i64,
    pub token_pair: String,
    pub base_mint: String,
    pub quote_mint: String,
    pub buy_venue: String,
    pub sell_venue: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub price_diff_percent: f64,
    pub net_spread_percent: f64,
    pub potential_profit_usd: f64,
    pub status: OpportunityStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn pair_key(&self) -> PairKey {
        PairKey::new(&self.base_mint, &self.quote_mint)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Completed,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Completed => "completed",
            TradeStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(TradeStatus::Completed),
            "failed" => Some(TradeStatus::Failed),
            _ => None,
        }
    }
}

/// Immutable record of one execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub id: i64,
    pub opportunity_id: Option<i64>,
    pub wallet_id: i64,
    pub token_pair: String,
    pub base_mint: String,
    pub quote_mint: String,
    pub buy_venue: String,
    pub sell_venue: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub amount: f64,
    pub profit_usd: f64,
    pub status: TradeStatus,
    pub tx_hash_buy: Option<String>,
    pub tx_hash_sell: Option<String>,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    pub id: i64,
    pub user_id: Uuid,
    pub name: String,
    pub address: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenBalance {
    pub wallet_id: i64,
    pub token: Token,
    pub balance: f64,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotStatus {
    pub active: bool,
    pub last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_id: Option<Uuid>,
}

/// Daily performance datapoint for the dashboard chart
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformancePoint {
    pub date: String,
    pub profit: f64,
    pub trades: i64,
    pub opportunities: i64,
}

/// Events fanned out to WebSocket clients
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Price(PriceQuote),
    Opportunity(Opportunity),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sol() -> Token {
        Token {
            id: 1,
            symbol: "SOL".to_string(),
            name: "Solana".to_string(),
            mint_address: SOL_MINT.to_string(),
            decimals: 9,
        }
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&OpportunityStatus::Executing).unwrap();
        assert_eq!(json, r#""executing""#);

        for status in [
            OpportunityStatus::Active,
            OpportunityStatus::Executing,
            OpportunityStatus::Completed,
            OpportunityStatus::Expired,
            OpportunityStatus::Failed,
        ] {
            assert_eq!(OpportunityStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OpportunityStatus::parse("pending"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OpportunityStatus::Active.is_terminal());
        assert!(!OpportunityStatus::Executing.is_terminal());
        assert!(OpportunityStatus::Completed.is_terminal());
        assert!(OpportunityStatus::Expired.is_terminal());
        assert!(OpportunityStatus::Failed.is_terminal());
    }

    #[test]
    fn test_token_unit_conversion() {
        let token = sol();
        assert_eq!(token.to_raw(1.5), 1_500_000_000);
        assert!((token.to_ui(250_000_000) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_quote_freshness() {
        let now = Utc::now();
        let quote = VenueQuote {
            pair: PairKey::new(SOL_MINT, USDC_MINT),
            symbol: "SOL/USDC".to_string(),
            venue: "Raydium".to_string(),
            price: 150.0,
            price_impact_pct: 0.0,
            observed_at: now - chrono::Duration::seconds(45),
        };
        assert!(!quote.is_fresh(now, chrono::Duration::seconds(30)));
        assert!(quote.is_fresh(now, chrono::Duration::seconds(60)));
    }
}
