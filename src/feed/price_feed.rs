use super::health::{SourceHealth, SourceHealthReport};
use super::source::QuoteSource;
use crate::models::{MarketEvent, PairKey, PriceQuote, TokenPair, VenuePrice, VenueQuote};
use anyhow::{anyhow, Result};
use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub max_quote_age: chrono::Duration,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    /// Size of the probe quote, in quote-token units, once a price is known
    pub probe_notional: f64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_quote_age: chrono::Duration::seconds(30),
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            probe_notional: 100.0,
        }
    }
}

/// Multi-venue price aggregator.
///
/// Every venue quote goes out on `quote_tx` (the detector's input); every
/// recomputed reference price goes out on the shared market event channel.
pub struct PriceFeed {
    sources: Vec<Arc<dyn QuoteSource>>,
    health: Mutex<HashMap<String, SourceHealth>>,
    books: RwLock<HashMap<PairKey, HashMap<String, VenueQuote>>>,
    references: RwLock<HashMap<PairKey, PriceQuote>>,
    subscriptions: Mutex<HashMap<PairKey, (TokenPair, usize)>>,
    quote_tx: broadcast::Sender<VenueQuote>,
    events: broadcast::Sender<MarketEvent>,
    config: FeedConfig,
}

impl PriceFeed {
    pub fn new(
        sources: Vec<Arc<dyn QuoteSource>>,
        events: broadcast::Sender<MarketEvent>,
        config: FeedConfig,
    ) -> Arc<Self> {
        let (quote_tx, _) = broadcast::channel(1024);
        let health = sources
            .iter()
            .map(|s| {
                (
                    s.venue().to_string(),
                    SourceHealth::new(s.venue(), config.failure_threshold, config.cooldown),
                )
            })
            .collect();

        Arc::new(Self {
            sources,
            health: Mutex::new(health),
            books: RwLock::new(HashMap::new()),
            references: RwLock::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            quote_tx,
            events,
            config,
        })
    }

    pub fn venues(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.venue().to_string()).collect()
    }

    /// Venue quote stream for the opportunity detector
    pub fn subscribe_quotes(&self) -> broadcast::Receiver<VenueQuote> {
        self.quote_tx.subscribe()
    }

    pub fn latest(&self, pair: &PairKey) -> Option<PriceQuote> {
        self.references.read().get(pair).cloned()
    }

    pub fn venue_quotes(&self, pair: &PairKey) -> Vec<VenueQuote> {
        self.books
            .read()
            .get(pair)
            .map(|book| book.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn health_report(&self) -> Vec<SourceHealthReport> {
        let now = Instant::now();
        let health = self.health.lock();
        let mut reports: Vec<_> = health.values().map(|h| h.report(now)).collect();
        reports.sort_by(|a, b| a.source.cmp(&b.source));
        reports
    }

    /// Keep a pair on the polling loop. Reference counted per subscriber.
    pub fn track(&self, pair: TokenPair) {
        let mut subs = self.subscriptions.lock();
        let entry = subs.entry(pair.key()).or_insert_with(|| (pair, 0));
        entry.1 += 1;
    }

    pub fn untrack(&self, pair: &PairKey) {
        let mut subs = self.subscriptions.lock();
        if let Some(entry) = subs.get_mut(pair) {
            entry.1 = entry.1.saturating_sub(1);
            if entry.1 == 0 {
                subs.remove(pair);
            }
        }
    }

    pub fn tracked_pairs(&self) -> Vec<TokenPair> {
        self.subscriptions
            .lock()
            .values()
            .map(|(pair, _)| pair.clone())
            .collect()
    }

    fn probe_amount(&self, pair: &TokenPair) -> u64 {
        match self.latest(&pair.key()) {
            Some(reference) if reference.price > 0.0 => pair
                .base
                .to_raw(self.config.probe_notional / reference.price)
                .max(1),
            _ => pair.base.to_raw(1.0).max(1),
        }
    }

    /// Query every enabled, healthy venue for `pair` concurrently and publish
    /// the new reference price.
    pub async fn refresh_pair(
        &self,
        pair: &TokenPair,
        enabled: Option<&HashSet<String>>,
    ) -> Result<PriceQuote> {
        let now = Instant::now();
        let candidates: Vec<Arc<dyn QuoteSource>> = {
            let health = self.health.lock();
            self.sources
                .iter()
                .filter(|s| enabled.map_or(true, |e| e.contains(s.venue())))
                .filter(|s| health.get(s.venue()).map_or(true, |h| h.is_available(now)))
                .cloned()
                .collect()
        };

        let amount = self.probe_amount(pair);
        let results = join_all(candidates.iter().map(|source| async move {
            let started = Instant::now();
            let result = source.quote(pair, amount).await;
            (source.venue().to_string(), started.elapsed(), result)
        }))
        .await;

        let mut last_error = None;
        for (venue, latency, result) in results {
            match result {
                Ok(quote) => {
                    if let Some(h) = self.health.lock().get_mut(&venue) {
                        h.record_success(latency);
                    }
                    self.books
                        .write()
                        .entry(quote.pair.clone())
                        .or_default()
                        .insert(venue, quote.clone());
                    // No receivers is fine
                    let _ = self.quote_tx.send(quote);
                }
                Err(e) => {
                    let reason = format!("{:#}", e);
                    if let Some(h) = self.health.lock().get_mut(&venue) {
                        h.record_failure(&reason, Instant::now());
                    }
                    last_error = Some(format!("{}: {}", venue, reason));
                }
            }
        }

        self.publish_reference(pair).ok_or_else(|| {
            anyhow!(
                "No venue could price {} ({})",
                pair.symbol(),
                last_error.unwrap_or_else(|| "no enabled venues".to_string())
            )
        })
    }

    /// Median of the fresh venue prices, stored and broadcast
    fn publish_reference(&self, pair: &TokenPair) -> Option<PriceQuote> {
        let key = pair.key();
        let now = Utc::now();
        let mut venues: Vec<VenuePrice> = self
            .books
            .read()
            .get(&key)?
            .values()
            .filter(|q| q.is_fresh(now, self.config.max_quote_age))
            .map(|q| VenuePrice {
                venue: q.venue.clone(),
                price: q.price,
            })
            .collect();
        venues.sort_by(|a, b| a.venue.cmp(&b.venue));

        let price = median(venues.iter().map(|v| v.price).collect())?;

        let quote = {
            let mut refs = self.references.write();
            let change = match refs.get(&key) {
                Some(prev) if prev.price > 0.0 => (price - prev.price) / prev.price * 100.0,
                _ => 0.0,
            };
            let quote = PriceQuote {
                symbol: pair.symbol(),
                input_mint: key.input_mint.clone(),
                output_mint: key.output_mint.clone(),
                price,
                price_change_pct: change,
                last_updated: now,
                venues,
            };
            refs.insert(key, quote.clone());
            quote
        };

        debug!("💱 {} reference {:.6} ({:+.3}%)", quote.symbol, quote.price, quote.price_change_pct);
        let _ = self.events.send(MarketEvent::Price(quote.clone()));
        Some(quote)
    }

    /// Cached reference if still fresh, otherwise a refresh on all venues
    pub async fn reference_price(&self, pair: &TokenPair) -> Result<PriceQuote> {
        if let Some(cached) = self.latest(&pair.key()) {
            if Utc::now().signed_duration_since(cached.last_updated) <= self.config.max_quote_age {
                return Ok(cached);
            }
        }
        self.refresh_pair(pair, None).await
    }

    /// Refresh subscribed pairs on a fixed cadence
    pub fn spawn_polling(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("📡 Price polling started (every {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                for pair in self.tracked_pairs() {
                    if let Err(e) = self.refresh_pair(&pair, None).await {
                        warn!("Price refresh for {} failed: {:#}", pair.symbol(), e);
                    }
                }
            }
        })
    }
}

pub fn median(mut values: Vec<f64>) -> Option<f64> {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Token, SOL_MINT, USDC_MINT};
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        venue: &'static str,
        price: Option<f64>,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(venue: &'static str, price: Option<f64>) -> Arc<Self> {
            Arc::new(Self {
                venue,
                price,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl QuoteSource for FixedSource {
        fn venue(&self) -> &str {
            self.venue
        }

        async fn quote(&self, pair: &TokenPair, _amount: u64) -> Result<VenueQuote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let Some(price) = self.price else {
                bail!("no route");
            };
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

    fn sol_usdc() -> TokenPair {
        TokenPair::new(
            Token {
                id: 1,
                symbol: "SOL".into(),
                name: "Solana".into(),
                mint_address: SOL_MINT.into(),
                decimals: 9,
            },
            Token {
                id: 2,
                symbol: "USDC".into(),
                name: "USD Coin".into(),
                mint_address: USDC_MINT.into(),
                decimals: 6,
            },
        )
    }

    #[test]
    fn test_median() {
        assert_eq!(median(vec![]), None);
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(vec![f64::NAN, 5.0]), Some(5.0));
    }

    #[tokio::test]
    async fn test_refresh_publishes_quotes_and_reference() {
        let (events, mut event_rx) = broadcast::channel(16);
        let sources: Vec<Arc<dyn QuoteSource>> = vec![
            FixedSource::new("Raydium", Some(100.0)) as Arc<dyn QuoteSource>,
            FixedSource::new("Orca", Some(102.0)) as Arc<dyn QuoteSource>,
            FixedSource::new("Meteora", None) as Arc<dyn QuoteSource>,
        ];
        let feed = PriceFeed::new(sources, events, FeedConfig::default());
        let mut quotes = feed.subscribe_quotes();

        let reference = feed.refresh_pair(&sol_usdc(), None).await.unwrap();
        assert_eq!(reference.price, 101.0);
        assert_eq!(reference.price_change_pct, 0.0);
        assert_eq!(reference.venues.len(), 2);

        let mut venues = vec![quotes.recv().await.unwrap().venue, quotes.recv().await.unwrap().venue];
        venues.sort();
        assert_eq!(venues, vec!["Orca", "Raydium"]);

        match event_rx.recv().await.unwrap() {
            MarketEvent::Price(q) => assert_eq!(q.symbol, "SOL/USDC"),
            other => panic!("unexpected event {:?}", other),
        }

        let failing = feed
            .health_report()
            .into_iter()
            .find(|r| r.source == "Meteora")
            .unwrap();
        assert_eq!(failing.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_disabled_venues_are_not_queried() {
        let (events, _rx) = broadcast::channel(16);
        let raydium = FixedSource::new("Raydium", Some(100.0));
        let orca = FixedSource::new("Orca", Some(101.0));
        let feed = PriceFeed::new(
            vec![
                raydium.clone() as Arc<dyn QuoteSource>,
                orca.clone() as Arc<dyn QuoteSource>,
            ],
            events,
            FeedConfig::default(),
        );

        let enabled: HashSet<String> = ["Raydium".to_string()].into_iter().collect();
        let reference = feed.refresh_pair(&sol_usdc(), Some(&enabled)).await.unwrap();

        assert_eq!(reference.price, 100.0);
        assert_eq!(orca.calls.load(Ordering::SeqCst), 0);
        assert_eq!(raydium.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_an_error_and_parks_sources() {
        let (events, _rx) = broadcast::channel(16);
        let broken = FixedSource::new("Orca", None);
        let config = FeedConfig {
            failure_threshold: 2,
            ..FeedConfig::default()
        };
        let feed = PriceFeed::new(vec![broken.clone() as Arc<dyn QuoteSource>], events, config);

        for _ in 0..2 {
            let err = feed.refresh_pair(&sol_usdc(), None).await.unwrap_err();
            assert!(err.to_string().contains("No venue could price SOL/USDC"));
        }
        // Parked: the third refresh does not reach the source
        assert!(feed.refresh_pair(&sol_usdc(), None).await.is_err());
        assert_eq!(broken.calls.load(Ordering::SeqCst), 2);
        assert!(!feed.health_report()[0].available);
    }

    #[tokio::test]
    async fn test_price_change_tracks_previous_reference() {
        let (events, _rx) = broadcast::channel(16);
        let feed = PriceFeed::new(
            vec![FixedSource::new("Raydium", Some(100.0)) as Arc<dyn QuoteSource>],
            events,
            FeedConfig::default(),
        );
        feed.refresh_pair(&sol_usdc(), None).await.unwrap();

        // Swap in a new price by re-publishing a manual book entry
        feed.books
            .write()
            .get_mut(&sol_usdc().key())
            .unwrap()
            .get_mut("Raydium")
            .unwrap()
            .price = 110.0;
        let quote = feed.publish_reference(&sol_usdc()).unwrap();
        assert!((quote.price_change_pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_tracking_is_reference_counted() {
        let (events, _rx) = broadcast::channel(16);
        let feed = PriceFeed::new(vec![], events, FeedConfig::default());
        feed.track(sol_usdc());
        feed.track(sol_usdc());
        feed.untrack(&sol_usdc().key());
        assert_eq!(feed.tracked_pairs().len(), 1);
        feed.untrack(&sol_usdc().key());
        assert!(feed.tracked_pairs().is_empty());
    }
}
