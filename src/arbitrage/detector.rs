//! Opportunity Detector
//!
//! Keeps the latest quote per venue per pair. Every new quote re-ranks all
//! ordered venue combinations for its pair and reconciles the pair's single
//! live opportunity against the best one: open, refresh or expire.
//! Opportunities that are executing are left alone.

use super::fees::FeeCalculator;
use crate::models::{Opportunity, OpportunityStatus, PairKey, SpreadCandidate, VenueQuote};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Persistence seam for detector decisions
pub trait OpportunityLedger {
    /// Latest opportunity for the pair that is `active` or `executing`
    fn live_for_pair(&self, pair: &PairKey) -> Result<Option<Opportunity>>;
    fn open(&self, candidate: &SpreadCandidate) -> Result<Opportunity>;
    /// `None` when the opportunity is no longer active
    fn refresh(&self, id: i64, candidate: &SpreadCandidate) -> Result<Option<Opportunity>>;
    /// Move `active` to `expired`; `None` if it was not active
    fn expire(&self, id: i64) -> Result<Option<Opportunity>>;
}

impl OpportunityLedger for crate::storage::Database {
    fn live_for_pair(&self, pair: &PairKey) -> Result<Option<Opportunity>> {
        self.live_opportunity_for_pair(pair)
    }

    fn open(&self, candidate: &SpreadCandidate) -> Result<Opportunity> {
        self.insert_opportunity(candidate)
    }

    fn refresh(&self, id: i64, candidate: &SpreadCandidate) -> Result<Option<Opportunity>> {
        self.refresh_opportunity(id, candidate)
    }

    fn expire(&self, id: i64) -> Result<Option<Opportunity>> {
        if self.transition_opportunity(id, OpportunityStatus::Active, OpportunityStatus::Expired, None)? {
            self.get_opportunity(id)
        } else {
            Ok(None)
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Minimum net spread in percent
    pub min_profit_threshold_pct: f64,
    pub max_quote_age: chrono::Duration,
    /// `None` lets every venue participate
    pub enabled_venues: Option<HashSet<String>>,
    /// Notional used for the profit estimate
    pub notional_usd: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_profit_threshold_pct: 0.25,
            max_quote_age: chrono::Duration::seconds(30),
            enabled_venues: None,
            notional_usd: 100.0,
        }
    }
}

/// What a quote changed
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorEvent {
    Opened(Opportunity),
    Updated(Opportunity),
    Expired(Opportunity),
}

impl DetectorEvent {
    pub fn opportunity(&self) -> &Opportunity {
        match self {
            DetectorEvent::Opened(o) | DetectorEvent::Updated(o) | DetectorEvent::Expired(o) => o,
        }
    }
}

pub struct OpportunityDetector {
    fees: FeeCalculator,
    config: DetectorConfig,
    books: HashMap<PairKey, HashMap<String, VenueQuote>>,
}

impl OpportunityDetector {
    pub fn new(fees: FeeCalculator, config: DetectorConfig) -> Self {
        Self {
            fees,
            config,
            books: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: DetectorConfig) {
        self.config = config;
    }

    /// Best qualifying venue combination for a pair at `now`
    pub fn best_spread(&self, pair: &PairKey, now: DateTime<Utc>) -> Option<SpreadCandidate> {
        let book = self.books.get(pair)?;
        let quotes: Vec<&VenueQuote> = book
            .values()
            .filter(|q| q.is_fresh(now, self.config.max_quote_age))
            .filter(|q| {
                self.config
                    .enabled_venues
                    .as_ref()
                    .map_or(true, |enabled| enabled.contains(&q.venue))
            })
            .collect();

        best_spread(&quotes, &self.fees, self.config.min_profit_threshold_pct, self.config.notional_usd)
    }

    /// Ingest one venue quote and reconcile the pair's live opportunity
    pub fn on_quote<L: OpportunityLedger + ?Sized>(
        &mut self,
        quote: VenueQuote,
        ledger: &L,
        now: DateTime<Utc>,
    ) -> Result<Option<DetectorEvent>> {
        let pair = quote.pair.clone();
        self.record(quote);
        self.reconcile(&pair, ledger, now)
    }

    /// Merge quotes into the books without reconciling
    pub fn absorb(&mut self, quotes: impl IntoIterator<Item = VenueQuote>) {
        for quote in quotes {
            self.record(quote);
        }
    }

    /// A venue's quote is only replaced by one observed no earlier
    fn record(&mut self, quote: VenueQuote) {
        let book = self.books.entry(quote.pair.clone()).or_default();
        match book.get(&quote.venue) {
            Some(held) if held.observed_at > quote.observed_at => {}
            _ => {
                book.insert(quote.venue.clone(), quote);
            }
        }
    }

    pub fn reconcile<L: OpportunityLedger + ?Sized>(
        &self,
        pair: &PairKey,
        ledger: &L,
        now: DateTime<Utc>,
    ) -> Result<Option<DetectorEvent>> {
        let best = self.best_spread(pair, now);
        let live = ledger.live_for_pair(pair)?;

        let event = match (live, best) {
            (Some(live), _) if live.status == OpportunityStatus::Executing => None,
            (Some(live), Some(candidate)) => ledger.refresh(live.id, &candidate)?.map(DetectorEvent::Updated),
            (Some(live), None) => {
                let expired = ledger.expire(live.id)?;
                if let Some(ref opp) = expired {
                    info!("⌛ Opportunity {} on {} expired", opp.id, opp.token_pair);
                }
                expired.map(DetectorEvent::Expired)
            }
            (None, Some(candidate)) => {
                let opened = ledger.open(&candidate)?;
                info!(
                    "🎯 Opportunity {} on {}: buy {} @ {:.6}, sell {} @ {:.6} (net {:.3}%)",
                    opened.id,
                    opened.token_pair,
                    opened.buy_venue,
                    opened.buy_price,
                    opened.sell_venue,
                    opened.sell_price,
                    opened.net_spread_percent
                );
                Some(DetectorEvent::Opened(opened))
            }
            (None, None) => None,
        };

        if let Some(ref e) = event {
            debug!("Detector event for {}: {:?}", pair, e.opportunity().status);
        }
        Ok(event)
    }
}

/// Widest net spread across all ordered venue combinations that clears the
/// threshold. Pure function over a snapshot of quotes.
pub fn best_spread(
    quotes: &[&VenueQuote],
    fees: &FeeCalculator,
    min_profit_threshold_pct: f64,
    notional_usd: f64,
) -> Option<SpreadCandidate> {
    let mut best: Option<SpreadCandidate> = None;

    for buy in quotes {
        for sell in quotes {
            if buy.venue == sell.venue || buy.price <= 0.0 || sell.price <= buy.price {
                continue;
            }

            let net = fees.net_spread_pct(buy.price, sell.price, &buy.venue, &sell.venue);
            if net <= min_profit_threshold_pct {
                continue;
            }
            if best.as_ref().is_some_and(|b| b.net_spread_percent >= net) {
                continue;
            }

            let (_, _, net_profit, _) =
                fees.calculate_net_profit(buy.price, sell.price, notional_usd, &buy.venue, &sell.venue);

            best = Some(SpreadCandidate {
                pair: buy.pair.clone(),
                symbol: buy.symbol.clone(),
                buy_venue: buy.venue.clone(),
                sell_venue: sell.venue.clone(),
                buy_price: buy.price,
                sell_price: sell.price,
                price_diff_percent: FeeCalculator::gross_spread_pct(buy.price, sell.price),
                net_spread_percent: net,
                potential_profit_usd: net_profit,
            });
        }
    }

    best
}
