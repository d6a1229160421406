//! Response shapes that join records with their token and venue details

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;

use crate::models::{Opportunity, Token, Trade};
use crate::storage::Database;

#[derive(Debug, Clone, Serialize)]
pub struct VenueRef {
    pub name: String,
}

impl VenueRef {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OpportunityResponse {
    #[serde(flatten)]
    pub opportunity: Opportunity,
    pub token: Option<Token>,
    pub buy_dex: VenueRef,
    pub sell_dex: VenueRef,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeResponse {
    #[serde(flatten)]
    pub trade: Trade,
    pub token: Option<Token>,
    pub buy_dex: VenueRef,
    pub sell_dex: VenueRef,
}

/// Token registry indexed by mint, loaded once per request
pub struct TokenIndex(HashMap<String, Token>);

impl TokenIndex {
    pub fn load(db: &Database) -> Result<Self> {
        Ok(Self(
            db.list_tokens()?
                .into_iter()
                .map(|t| (t.mint_address.clone(), t))
                .collect(),
        ))
    }

    pub fn opportunity(&self, opportunity: Opportunity) -> OpportunityResponse {
        OpportunityResponse {
            token: self.0.get(&opportunity.base_mint).cloned(),
            buy_dex: VenueRef::new(&opportunity.buy_venue),
            sell_dex: VenueRef::new(&opportunity.sell_venue),
            opportunity,
        }
    }

    pub fn opportunities(&self, opportunities: Vec<Opportunity>) -> Vec<OpportunityResponse> {
        opportunities.into_iter().map(|o| self.opportunity(o)).collect()
    }

    pub fn trade(&self, trade: Trade) -> TradeResponse {
        TradeResponse {
            token: self.0.get(&trade.base_mint).cloned(),
            buy_dex: VenueRef::new(&trade.buy_venue),
            sell_dex: VenueRef::new(&trade.sell_venue),
            trade,
        }
    }

    pub fn trades(&self, trades: Vec<Trade>) -> Vec<TradeResponse> {
        trades.into_iter().map(|t| self.trade(t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OpportunityStatus, SOL_MINT, USDC_MINT};
    use crate::storage::test_support::memory_db;
    use chrono::Utc;

    #[test]
    fn test_opportunity_view_flattens_and_joins_token() {
        let db = memory_db();
        let index = TokenIndex::load(&db).unwrap();
        let view = index.opportunity(Opportunity {
            id: 3,
            token_pair: "SOL/USDC".into(),
            base_mint: SOL_MINT.into(),
            quote_mint: USDC_MINT.into(),
            buy_venue: "Raydium".into(),
            sell_venue: "Orca".into(),
            buy_price: 100.0,
            sell_price: 101.0,
            price_diff_percent: 1.0,
            net_spread_percent: 0.4,
            potential_profit_usd: 0.4,
            status: OpportunityStatus::Active,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });

        let json = serde_json::to_value(view).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["status"], "active");
        assert_eq!(json["token"]["symbol"], "SOL");
        assert_eq!(json["buy_dex"]["name"], "Raydium");
        assert_eq!(json["sell_dex"]["name"], "Orca");
    }
}
