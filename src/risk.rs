//! Risk Evaluator
//! Mission: Score single trades and whole portfolios before capital moves
//!
//! Both assessments are pure functions over already-loaded data so the API
//! and the execution engine share one set of rules.

use serde::{Deserialize, Serialize};

use crate::models::Opportunity;
use crate::settings::TradingSettings;

/// Reference-price move (percent) above which a pair counts as volatile
const VOLATILITY_THRESHOLD_PCT: f64 = 2.0;

const STABLECOINS: &[&str] = &["USDC", "USDT"];
const HIGH_VOLATILITY_TOKENS: &[&str] = &["BONK", "JTO"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Unknown,
}

/// Inputs that went into a trade score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactors {
    pub price_difference: f64,
    pub min_threshold: f64,
    pub user_risk_level: u8,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_change_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRiskAssessment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opportunity_id: Option<i64>,
    /// 1 (safest) to 10
    pub risk_score: u8,
    pub recommendation: String,
    pub can_execute: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factors: Option<RiskFactors>,
}

/// Score an opportunity for the operator's settings.
///
/// `recent_change_pct` is the latest reference-price move for the pair, if known.
pub fn assess_trade(
    opportunity: Option<&Opportunity>,
    settings: &TradingSettings,
    recent_change_pct: Option<f64>,
) -> TradeRiskAssessment {
    let Some(opp) = opportunity else {
        return TradeRiskAssessment {
            opportunity_id: None,
            risk_score: 10,
            recommendation: "Do not trade - opportunity not found".to_string(),
            can_execute: false,
            factors: None,
        };
    };

    let threshold = settings.min_profit_threshold;
    let spread = opp.price_diff_percent;
    let mut score: i32 = 5;

    if spread < threshold {
        score += 3;
    } else if spread > threshold * 4.0 {
        score -= 2;
    } else if spread > threshold * 2.0 {
        score -= 1;
    }

    let token = base_symbol(&opp.token_pair);
    if token == "SOL" {
        score -= 1;
    } else if STABLECOINS.contains(&token) {
        score -= 2;
    } else if HIGH_VOLATILITY_TOKENS.contains(&token) {
        score += 1;
    }

    // Aggregator legs route through the deepest pools
    if opp.buy_venue == "Jupiter" {
        score -= 1;
    }
    if opp.sell_venue == "Jupiter" {
        score -= 1;
    }

    if recent_change_pct.is_some_and(|c| c.abs() > VOLATILITY_THRESHOLD_PCT) {
        score += 1;
    }

    let risk_level = i32::from(settings.risk_level);
    let risk_score = (score + (5 - risk_level)).clamp(1, 10) as u8;

    let recommendation = match risk_score {
        0..=3 => "Low risk trade - good opportunity",
        4..=6 => "Moderate risk - proceed with caution",
        7..=8 => "High risk - consider skipping",
        _ => "Very high risk - do not trade",
    };

    let can_execute = match settings.max_risk_score {
        Some(max) => risk_score <= max,
        None => match risk_score {
            0..=6 => true,
            7..=8 => settings.risk_level >= 7,
            _ => false,
        },
    };

    TradeRiskAssessment {
        opportunity_id: Some(opp.id),
        risk_score,
        recommendation: recommendation.to_string(),
        can_execute,
        factors: Some(RiskFactors {
            price_difference: spread,
            min_threshold: threshold,
            user_risk_level: settings.risk_level,
            token: token.to_string(),
            recent_change_pct,
        }),
    }
}

fn base_symbol(token_pair: &str) -> &str {
    token_pair.split('/').next().unwrap_or(token_pair)
}

/// One token position across all of a user's wallets
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub symbol: String,
    pub balance: f64,
    /// USD price, `None` when no reference is available
    pub price_usd: Option<f64>,
}

impl Holding {
    pub fn value_usd(&self) -> f64 {
        self.balance * self.price_usd.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRisk {
    pub risk_level: RiskLevel,
    pub recommendation: String,
    pub diversification_score: i32,
    pub token_count: usize,
    pub total_value_usd: f64,
    pub max_concentration: f64,
    pub most_concentrated_token: Option<String>,
    /// Holdings that could not be valued
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub unpriced_tokens: Vec<String>,
}

impl PortfolioRisk {
    fn unknown(recommendation: &str) -> Self {
        Self {
            risk_level: RiskLevel::Unknown,
            recommendation: recommendation.to_string(),
            diversification_score: 0,
            token_count: 0,
            total_value_usd: 0.0,
            max_concentration: 0.0,
            most_concentrated_token: None,
            unpriced_tokens: Vec::new(),
        }
    }
}

/// Diversification score and risk level for a set of holdings
pub fn assess_portfolio(has_wallets: bool, holdings: &[Holding]) -> PortfolioRisk {
    if !has_wallets {
        return PortfolioRisk::unknown("Add a wallet to assess portfolio risk");
    }
    if holdings.is_empty() {
        return PortfolioRisk::unknown("No token balances found");
    }

    let total: f64 = holdings.iter().map(Holding::value_usd).sum();

    let mut max_concentration = 0.0;
    let mut most_concentrated = None;
    if total > 0.0 {
        for h in holdings {
            let share = h.value_usd() / total;
            if share > max_concentration {
                max_concentration = share;
                most_concentrated = Some(h.symbol.clone());
            }
        }
    }

    let mut score = match holdings.len() {
        n if n >= 5 => 10,
        n if n >= 3 => 7,
        2 => 5,
        _ => 3,
    };
    if max_concentration > 0.8 {
        score -= 3;
    } else if max_concentration > 0.6 {
        score -= 2;
    } else if max_concentration > 0.4 {
        score -= 1;
    }

    let (risk_level, recommendation) = if score >= 8 {
        (RiskLevel::Low, "Well-diversified portfolio".to_string())
    } else if score <= 4 {
        (
            RiskLevel::High,
            format!(
                "Portfolio heavily concentrated in {}",
                most_concentrated.as_deref().unwrap_or("a single token")
            ),
        )
    } else {
        (RiskLevel::Medium, "Consider diversifying your portfolio".to_string())
    };

    PortfolioRisk {
        risk_level,
        recommendation,
        diversification_score: score,
        token_count: holdings.len(),
        total_value_usd: total,
        max_concentration,
        most_concentrated_token: most_concentrated,
        unpriced_tokens: holdings
            .iter()
            .filter(|h| h.price_usd.is_none())
            .map(|h| h.symbol.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OpportunityStatus;
    use chrono::Utc;

    fn opportunity(pair: &str, buy: &str, sell: &str, diff: f64) -> Opportunity {
        Opportunity {
            id: 7,
            token_pair: pair.to_string(),
            base_mint: "base".to_string(),
            quote_mint: "quote".to_string(),
            buy_venue: buy.to_string(),
            sell_venue: sell.to_string(),
            buy_price: 100.0,
            sell_price: 100.0 + diff,
            price_diff_percent: diff,
            net_spread_percent: diff - 0.65,
            potential_profit_usd: 1.0,
            status: OpportunityStatus::Active,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn holding(symbol: &str, balance: f64, price: f64) -> Holding {
        Holding {
            symbol: symbol.to_string(),
            balance,
            price_usd: Some(price),
        }
    }

    #[test]
    fn test_unknown_opportunity_is_max_risk() {
        let a = assess_trade(None, &TradingSettings::default(), None);
        assert_eq!(a.risk_score, 10);
        assert!(!a.can_execute);
    }

    #[test]
    fn test_wide_sol_spread_is_low_risk() {
        // 5 - 2 (spread > 4x) - 1 (SOL) = 2
        let opp = opportunity("SOL/USDC", "Raydium", "Orca", 1.5);
        let a = assess_trade(Some(&opp), &TradingSettings::default(), None);
        assert_eq!(a.risk_score, 2);
        assert_eq!(a.recommendation, "Low risk trade - good opportunity");
        assert!(a.can_execute);
        assert_eq!(a.factors.unwrap().token, "SOL");
    }

    #[test]
    fn test_thin_meme_spread_needs_high_tolerance() {
        // 5 + 3 (below threshold) + 1 (BONK) = 9 at risk level 5
        let opp = opportunity("BONK/USDC", "Raydium", "Orca", 0.1);
        let a = assess_trade(Some(&opp), &TradingSettings::default(), None);
        assert_eq!(a.risk_score, 9);
        assert!(!a.can_execute);

        // Risk level 7 lowers the score to 7, which that tolerance accepts
        let bold = TradingSettings {
            risk_level: 7,
            ..TradingSettings::default()
        };
        let a = assess_trade(Some(&opp), &bold, None);
        assert_eq!(a.risk_score, 7);
        assert_eq!(a.recommendation, "High risk - consider skipping");
        assert!(a.can_execute);
    }

    #[test]
    fn test_jupiter_legs_and_volatility() {
        // 5 - 1 (> 2x) + 0 (RAY) - 2 (Jupiter both legs) + 1 (volatile) = 3
        let opp = opportunity("RAY/USDC", "Jupiter", "Jupiter", 0.6);
        let a = assess_trade(Some(&opp), &TradingSettings::default(), Some(-3.5));
        assert_eq!(a.risk_score, 3);
    }

    #[test]
    fn test_score_is_clamped() {
        let opp = opportunity("SOL/USDC", "Jupiter", "Jupiter", 5.0);
        let reckless = TradingSettings {
            risk_level: 10,
            ..TradingSettings::default()
        };
        assert_eq!(assess_trade(Some(&opp), &reckless, None).risk_score, 1);

        let opp = opportunity("BONK/USDC", "Orca", "Raydium", 0.0);
        let cautious = TradingSettings {
            risk_level: 1,
            ..TradingSettings::default()
        };
        assert_eq!(assess_trade(Some(&opp), &cautious, None).risk_score, 10);
    }

    #[test]
    fn test_max_risk_score_overrides_default_gate() {
        // Score 5, normally executable
        let opp = opportunity("RAY/USDC", "Raydium", "Orca", 0.4);
        let strict = TradingSettings {
            max_risk_score: Some(4),
            ..TradingSettings::default()
        };
        let a = assess_trade(Some(&opp), &strict, None);
        assert_eq!(a.risk_score, 5);
        assert!(!a.can_execute);
    }

    #[test]
    fn test_portfolio_without_wallets_or_balances() {
        assert_eq!(assess_portfolio(false, &[]).risk_level, RiskLevel::Unknown);
        let p = assess_portfolio(true, &[]);
        assert_eq!(p.risk_level, RiskLevel::Unknown);
        assert_eq!(p.recommendation, "No token balances found");
        assert_eq!(p.diversification_score, 0);
    }

    #[test]
    fn test_concentrated_portfolio_is_high_risk() {
        // 9 SOL at 100 vs 50 USDC: 94.7% SOL
        let p = assess_portfolio(true, &[holding("SOL", 9.0, 100.0), holding("USDC", 50.0, 1.0)]);
        assert_eq!(p.token_count, 2);
        assert_eq!(p.diversification_score, 2);
        assert_eq!(p.risk_level, RiskLevel::High);
        assert_eq!(p.most_concentrated_token.as_deref(), Some("SOL"));
        assert_eq!(p.recommendation, "Portfolio heavily concentrated in SOL");
        assert!((p.total_value_usd - 950.0).abs() < 1e-9);
    }

    #[test]
    fn test_balanced_portfolio_is_low_risk() {
        let holdings: Vec<Holding> = ["SOL", "USDC", "BONK", "RAY", "JTO"]
            .iter()
            .map(|s| holding(s, 100.0, 1.0))
            .collect();
        let p = assess_portfolio(true, &holdings);
        assert_eq!(p.diversification_score, 10);
        assert_eq!(p.risk_level, RiskLevel::Low);
        assert!((p.max_concentration - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_three_tokens_moderately_concentrated() {
        // 50% in one token: 7 - 1
        let p = assess_portfolio(
            true,
            &[holding("SOL", 1.0, 50.0), holding("USDC", 30.0, 1.0), holding("RAY", 20.0, 1.0)],
        );
        assert_eq!(p.diversification_score, 6);
        assert_eq!(p.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_unpriced_holdings_are_reported() {
        let p = assess_portfolio(
            true,
            &[
                holding("USDC", 10.0, 1.0),
                Holding {
                    symbol: "JTO".into(),
                    balance: 5.0,
                    price_usd: None,
                },
            ],
        );
        assert_eq!(p.unpriced_tokens, vec!["JTO".to_string()]);
        assert_eq!(p.most_concentrated_token.as_deref(), Some("USDC"));
    }
}
