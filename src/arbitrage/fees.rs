//! Fee Calculation for Cross-DEX Arbitrage
//! Mission: Accurate profit calculation after all fees
//! Philosophy: A profitable trade on paper must be profitable in reality

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fee structure for a two-leg swap round trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeStructure {
    /// Taker fee per venue in basis points
    pub venue_fee_bps: HashMap<String, f64>,

    /// Fee for venues missing from the table
    pub default_fee_bps: f64,

    /// Slippage buffer applied once per round trip, in basis points
    pub slippage_buffer_bps: f64,

    /// Network fees for both legs (signature + priority), in USD
    pub network_fee_usd: f64,
}

impl Default for FeeStructure {
    fn default() -> Self {
        let venue_fee_bps = [
            ("Jupiter", 20.0), // routed pools, typical blended fee
            ("Raydium", 25.0),
            ("Orca", 30.0),
            ("Meteora", 25.0),
        ]
        .into_iter()
        .map(|(venue, bps)| (venue.to_string(), bps))
        .collect();

        Self {
            venue_fee_bps,
            default_fee_bps: 30.0,
            slippage_buffer_bps: 10.0,
            network_fee_usd: 0.01,
        }
    }
}

/// Fee calculator for arbitrage opportunities
#[derive(Debug, Clone)]
pub struct FeeCalculator {
    fees: FeeStructure,
}

impl Default for FeeCalculator {
    fn default() -> Self {
        Self::new(FeeStructure::default())
    }
}

impl FeeCalculator {
    pub fn new(fees: FeeStructure) -> Self {
        Self { fees }
    }

    pub fn venue_fee_bps(&self, venue: &str) -> f64 {
        self.fees
            .venue_fee_bps
            .get(venue)
            .copied()
            .unwrap_or(self.fees.default_fee_bps)
    }

    /// Round-trip cost in percent: both taker fees plus the slippage buffer
    pub fn round_trip_cost_pct(&self, buy_venue: &str, sell_venue: &str) -> f64 {
        (self.venue_fee_bps(buy_venue) + self.venue_fee_bps(sell_venue) + self.fees.slippage_buffer_bps)
            / 100.0
    }

    /// Gross spread in percent of the buy price
    pub fn gross_spread_pct(buy_price: f64, sell_price: f64) -> f64 {
        if buy_price <= 0.0 {
            return 0.0;
        }
        (sell_price - buy_price) / buy_price * 100.0
    }

    /// Spread left after the round-trip cost, in percent
    pub fn net_spread_pct(&self, buy_price: f64, sell_price: f64, buy_venue: &str, sell_venue: &str) -> f64 {
        Self::gross_spread_pct(buy_price, sell_price) - self.round_trip_cost_pct(buy_venue, sell_venue)
    }

    /// Calculate net profit after all fees for a given notional
    ///
    /// # Returns
    /// (gross_profit, total_fees, net_profit, net_profit_pct)
    pub fn calculate_net_profit(
        &self,
        buy_price: f64,
        sell_price: f64,
        notional_usd: f64,
        buy_venue: &str,
        sell_venue: &str,
    ) -> (f64, f64, f64, f64) {
        let gross_profit = notional_usd * Self::gross_spread_pct(buy_price, sell_price) / 100.0;
        let total_fees = notional_usd * self.round_trip_cost_pct(buy_venue, sell_venue) / 100.0
            + self.fees.network_fee_usd;
        let net_profit = gross_profit - total_fees;
        let net_profit_pct = if notional_usd > 0.0 {
            net_profit / notional_usd * 100.0
        } else {
            0.0
        };

        (gross_profit, total_fees, net_profit, net_profit_pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_cost() {
        let calc = FeeCalculator::default();
        // 25 + 30 + 10 bps
        assert!((calc.round_trip_cost_pct("Raydium", "Orca") - 0.65).abs() < 1e-9);
        // Unknown venues use the default fee
        assert!((calc.round_trip_cost_pct("Lifinity", "Lifinity") - 0.70).abs() < 1e-9);
    }

    #[test]
    fn test_net_profit_calculation() {
        let calc = FeeCalculator::default();

        // Buy at 100 on Raydium, sell at 101.5 on Orca, $1000 notional
        let (gross, fees, net, net_pct) = calc.calculate_net_profit(100.0, 101.5, 1000.0, "Raydium", "Orca");

        assert!((gross - 15.0).abs() < 1e-9);
        assert!((fees - 6.51).abs() < 1e-9);
        assert!((net - 8.49).abs() < 1e-9);
        assert!((net_pct - 0.849).abs() < 1e-9);
    }

    #[test]
    fn test_net_spread_after_fees() {
        let calc = FeeCalculator::default();

        // 1.5% gross - 0.65% cost = 0.85% net
        assert!((calc.net_spread_pct(100.0, 101.5, "Raydium", "Orca") - 0.85).abs() < 1e-9);
        // 0.5% gross does not cover fees
        assert!(calc.net_spread_pct(100.0, 100.5, "Raydium", "Orca") < 0.0);
    }

    #[test]
    fn test_zero_buy_price_is_not_a_spread() {
        assert_eq!(FeeCalculator::gross_spread_pct(0.0, 10.0), 0.0);
    }
}
