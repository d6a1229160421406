//! Arbitrage Detection Engine
//! Mission: Turn the venue quote stream into persisted opportunities in real time
//! Philosophy: One live opportunity per pair, always reflecting the best spread

use anyhow::{bail, Context, Result};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::detector::{DetectorConfig, DetectorEvent, OpportunityDetector};
use super::fees::FeeCalculator;
use crate::feed::PriceFeed;
use crate::models::{MarketEvent, Opportunity, TokenPair, VenueQuote, USDC_MINT};
use crate::settings::{DexSettings, TradingSettings};
use crate::storage::Database;

/// Cross-venue arbitrage engine
pub struct ArbitrageEngine {
    feed: Arc<PriceFeed>,
    db: Arc<Database>,
    detector: Mutex<OpportunityDetector>,
    enabled_venues: RwLock<Option<HashSet<String>>>,
    events: broadcast::Sender<MarketEvent>,
}

impl ArbitrageEngine {
    pub fn new(
        feed: Arc<PriceFeed>,
        db: Arc<Database>,
        fees: FeeCalculator,
        config: DetectorConfig,
        events: broadcast::Sender<MarketEvent>,
    ) -> Arc<Self> {
        let enabled = config.enabled_venues.clone();
        Arc::new(Self {
            feed,
            db,
            detector: Mutex::new(OpportunityDetector::new(fees, config)),
            enabled_venues: RwLock::new(enabled),
            events,
        })
    }

    /// Push the operator's trading and venue settings into the detector
    pub fn apply_settings(&self, trading: &TradingSettings, dexes: &DexSettings) {
        let enabled = dexes.enabled_venues(&self.feed.venues());
        let mut detector = self.detector.lock();
        let config = DetectorConfig {
            min_profit_threshold_pct: trading.min_profit_threshold,
            notional_usd: trading.notional_usd(),
            enabled_venues: Some(enabled.clone()),
            ..detector.config().clone()
        };
        debug!(
            "Detector config: threshold {:.3}%, notional ${:.2}, venues {:?}",
            config.min_profit_threshold_pct, config.notional_usd, enabled
        );
        detector.set_config(config);
        *self.enabled_venues.write() = Some(enabled);
    }

    /// Every registry token against USDC, plus pairs subscribers asked for
    pub fn monitored_pairs(&self) -> Result<Vec<TokenPair>> {
        let tokens = self.db.list_tokens()?;
        let Some(usdc) = tokens.iter().find(|t| t.mint_address == USDC_MINT).cloned() else {
            bail!("USDC missing from the token registry");
        };

        let mut pairs: HashMap<_, TokenPair> = tokens
            .into_iter()
            .filter(|t| t.mint_address != USDC_MINT)
            .map(|t| {
                let pair = TokenPair::new(t, usdc.clone());
                (pair.key(), pair)
            })
            .collect();
        for pair in self.feed.tracked_pairs() {
            pairs.entry(pair.key()).or_insert(pair);
        }

        let mut pairs: Vec<TokenPair> = pairs.into_values().collect();
        pairs.sort_by_key(|p| p.symbol());
        Ok(pairs)
    }

    /// Refresh every monitored pair on the enabled venues, reconcile each one
    /// against its fresh book, then re-check active opportunities on pairs
    /// that could not be priced.
    ///
    /// Between scans detection happens on the quote stream (see `spawn_detector`).
    pub async fn scan_opportunities(&self) -> Result<Vec<Opportunity>> {
        let pairs = self.monitored_pairs()?;
        let enabled = self.enabled_venues.read().clone();
        info!("🔍 Scanning {} pairs", pairs.len());

        let mut priced = 0;
        let mut last_error = None;
        for pair in &pairs {
            match self.feed.refresh_pair(pair, enabled.as_ref()).await {
                Ok(_) => {
                    priced += 1;
                    self.sync_pair(pair)?;
                }
                Err(e) => {
                    warn!("Scan of {} failed: {:#}", pair.symbol(), e);
                    last_error = Some(e);
                }
            }
        }

        if priced == 0 {
            if let Some(e) = last_error {
                return Err(e.context("Scan could not price any monitored pair"));
            }
        }

        self.sweep()?;
        let active = self.db.list_active_opportunities()?;
        info!("✅ Scan complete: {}/{} pairs priced, {} active opportunities", priced, pairs.len(), active.len());
        Ok(active)
    }

    /// Copy the feed's book for `pair` into the detector and reconcile it now.
    /// The same quotes may still be queued on the stream; replaying them is a no-op refresh.
    fn sync_pair(&self, pair: &TokenPair) -> Result<()> {
        let key = pair.key();
        if key.output_mint != USDC_MINT {
            return Ok(());
        }
        let event = {
            let mut detector = self.detector.lock();
            detector.absorb(self.feed.venue_quotes(&key));
            detector
                .reconcile(&key, self.db.as_ref(), Utc::now())
                .with_context(|| format!("Detector failed to reconcile {}", pair.symbol()))?
        };
        self.publish(event);
        Ok(())
    }

    /// Reconcile every active opportunity against the current books
    pub fn sweep(&self) -> Result<()> {
        let active = self.db.list_active_opportunities()?;
        let now = Utc::now();
        for opp in active {
            let event = self.detector.lock().reconcile(&opp.pair_key(), self.db.as_ref(), now)?;
            self.publish(event);
        }
        Ok(())
    }

    /// Feed one venue quote through the detector
    pub fn ingest(&self, quote: &VenueQuote) -> Result<Option<DetectorEvent>> {
        if quote.pair.output_mint != USDC_MINT {
            return Ok(None);
        }
        let event = self
            .detector
            .lock()
            .on_quote(quote.clone(), self.db.as_ref(), Utc::now())
            .with_context(|| format!("Detector failed on {} quote from {}", quote.symbol, quote.venue))?;
        self.publish(event.clone());
        Ok(event)
    }

    fn publish(&self, event: Option<DetectorEvent>) {
        if let Some(event) = event {
            // No subscribers is fine
            let _ = self
                .events
                .send(MarketEvent::Opportunity(event.opportunity().clone()));
        }
    }

    /// Consume the feed's venue quote stream until it closes
    pub fn spawn_detector(self: Arc<Self>) -> JoinHandle<()> {
        let mut quotes = self.feed.subscribe_quotes();
        tokio::spawn(async move {
            info!("🎯 Opportunity detector started");
            loop {
                match quotes.recv().await {
                    Ok(quote) => {
                        if let Err(e) = self.ingest(&quote) {
                            error!("{:#}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Detector lagged, skipped {} quotes", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Quote stream closed, detector stopping");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedConfig, QuoteSource};
    use crate::models::{OpportunityStatus, PairKey, SOL_MINT};
    use crate::storage::test_support::memory_db;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Prices SOL at a fixed value, everything else at 1.0
    struct SolSource {
        venue: &'static str,
        sol_price: f64,
    }

    #[async_trait]
    impl QuoteSource for SolSource {
        fn venue(&self) -> &str {
            self.venue
        }

        async fn quote(&self, pair: &TokenPair, _amount: u64) -> Result<VenueQuote> {
            let price = if pair.base.mint_address == SOL_MINT { self.sol_price } else { 1.0 };
            Ok(VenueQuote {
                pair: pair.key(),
                symbol: pair.symbol(),
                venue: self.venue.to_string(),
                price,
                price_impact_pct: 0.0,
                observed_at: Utc::now(),
            })
        }
    }

    fn engine(prices: &[(&'static str, f64)]) -> (Arc<ArbitrageEngine>, Arc<Database>, broadcast::Receiver<MarketEvent>) {
        let (events, rx) = broadcast::channel(256);
        let sources = prices
            .iter()
            .map(|(venue, sol_price)| {
                Arc::new(SolSource {
                    venue: *venue,
                    sol_price: *sol_price,
                }) as Arc<dyn QuoteSource>
            })
            .collect();
        let feed = PriceFeed::new(sources, events.clone(), FeedConfig::default());
        let db = memory_db();
        let engine = ArbitrageEngine::new(feed, db.clone(), FeeCalculator::default(), DetectorConfig::default(), events);
        (engine, db, rx)
    }

    fn engine_with(
        prices: &[(&'static str, f64)],
        config: DetectorConfig,
    ) -> (Arc<ArbitrageEngine>, Arc<Database>) {
        let (events, _) = broadcast::channel(256);
        let sources = prices
            .iter()
            .map(|(venue, sol_price)| {
                Arc::new(SolSource {
                    venue: *venue,
                    sol_price: *sol_price,
                }) as Arc<dyn QuoteSource>
            })
            .collect();
        let feed = PriceFeed::new(sources, events.clone(), FeedConfig::default());
        let db = memory_db();
        let engine = ArbitrageEngine::new(feed, db.clone(), FeeCalculator::default(), config, events);
        (engine, db)
    }

    fn sol_quote(venue: &str, price: f64) -> VenueQuote {
        VenueQuote {
            pair: PairKey::new(SOL_MINT, USDC_MINT),
            symbol: "SOL/USDC".to_string(),
            venue: venue.to_string(),
            price,
            price_impact_pct: 0.0,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_monitored_pairs_cover_registry_against_usdc() {
        let (engine, _db, _rx) = engine(&[]);
        let symbols: Vec<String> = engine.monitored_pairs().unwrap().iter().map(|p| p.symbol()).collect();
        assert_eq!(symbols, vec!["BONK/USDC", "JTO/USDC", "RAY/USDC", "SOL/USDC"]);
    }

    #[test]
    fn test_ingest_broadcasts_opportunity_updates() {
        let (engine, db, mut rx) = engine(&[]);

        assert!(engine.ingest(&sol_quote("Raydium", 100.0)).unwrap().is_none());
        let event = engine.ingest(&sol_quote("Orca", 102.0)).unwrap().unwrap();
        assert!(matches!(event, DetectorEvent::Opened(_)));

        match rx.try_recv().unwrap() {
            MarketEvent::Opportunity(o) => assert_eq!(o.status, OpportunityStatus::Active),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(db.count_active_opportunities().unwrap(), 1);
    }

    #[test]
    fn test_ingest_skips_non_usdc_quotes() {
        let (engine, db, _rx) = engine(&[]);
        let mut quote = sol_quote("Raydium", 100.0);
        quote.pair = PairKey::new(SOL_MINT, "SomeOtherMint");
        assert!(engine.ingest(&quote).unwrap().is_none());
        quote.venue = "Orca".into();
        quote.price = 150.0;
        assert!(engine.ingest(&quote).unwrap().is_none());
        assert_eq!(db.count_active_opportunities().unwrap(), 0);
    }

    #[test]
    fn test_disabled_venue_settings_reach_detector() {
        let (engine, db, _rx) = engine(&[("Raydium", 100.0), ("Orca", 102.0)]);
        let dexes = DexSettings([("Orca".to_string(), false)].into_iter().collect());
        engine.apply_settings(&TradingSettings::default(), &dexes);

        engine.ingest(&sol_quote("Raydium", 100.0)).unwrap();
        assert!(engine.ingest(&sol_quote("Orca", 102.0)).unwrap().is_none());
        assert_eq!(db.count_active_opportunities().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scan_feeds_detector_through_quote_stream() {
        let (engine, db, _rx) = engine(&[("Raydium", 100.0), ("Orca", 102.0)]);
        let handle = engine.clone().spawn_detector();

        engine.scan_opportunities().await.unwrap();

        let mut found = Vec::new();
        for _ in 0..50 {
            found = db.list_active_opportunities().unwrap();
            if !found.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].token_pair, "SOL/USDC");
        assert_eq!(found[0].buy_venue, "Raydium");
        assert_eq!(found[0].sell_venue, "Orca");
    }

    #[tokio::test]
    async fn test_scan_keeps_opportunity_whose_spread_holds() {
        let (engine, db) = engine_with(
            &[("Raydium", 100.0), ("Orca", 102.0)],
            DetectorConfig {
                max_quote_age: chrono::Duration::seconds(1),
                ..DetectorConfig::default()
            },
        );
        let opened = engine.ingest(&sol_quote("Raydium", 100.0)).unwrap();
        assert!(opened.is_none());
        let opened = engine.ingest(&sol_quote("Orca", 102.0)).unwrap().unwrap();
        let id = opened.opportunity().id;

        // Detector's quotes are now stale; no detector task is draining the stream
        tokio::time::sleep(Duration::from_millis(1200)).await;
        let active = engine.scan_opportunities().await.unwrap();

        let ids: Vec<i64> = active.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![id]);
        assert_eq!(db.get_opportunity(id).unwrap().unwrap().status, OpportunityStatus::Active);
    }

    #[tokio::test]
    async fn test_scan_opens_without_waiting_for_the_stream() {
        let (engine, db) = engine_with(&[("Raydium", 100.0), ("Orca", 102.0)], DetectorConfig::default());
        let active = engine.scan_opportunities().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token_pair, "SOL/USDC");
        assert_eq!(db.count_active_opportunities().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scan_with_no_venues_fails() {
        let (engine, _db, _rx) = engine(&[]);
        let err = engine.scan_opportunities().await.unwrap_err();
        assert!(format!("{:#}", err).contains("Scan could not price any monitored pair"));
    }
}
