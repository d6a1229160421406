//! Bot Controller
//! Mission: Global on/off switch and the scan/execute loop it gates

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::arbitrage::ArbitrageEngine;
use crate::execution::{ExecutionEngine, ExecutionRequest};
use crate::models::{BotStatus, Trade};
use crate::storage::Database;

/// Process-wide bot state, published on a watch channel
pub struct BotController {
    state: watch::Sender<BotStatus>,
}

impl BotController {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(BotStatus {
            active: false,
            last_updated: Utc::now(),
            operator_id: None,
        });
        Arc::new(Self { state })
    }

    pub fn status(&self) -> BotStatus {
        self.state.borrow().clone()
    }

    pub fn set_active(&self, active: bool, operator: Uuid) -> BotStatus {
        let status = BotStatus {
            active,
            last_updated: Utc::now(),
            operator_id: Some(operator),
        };
        self.state.send_replace(status.clone());
        info!(
            "{} Bot {} by {}",
            if active { "▶️" } else { "⏸️" },
            if active { "started" } else { "stopped" },
            operator
        );
        status
    }

    /// Whose settings drive the shared detector: the operator while the bot
    /// runs, otherwise the caller
    pub fn settings_owner(&self, caller: Uuid) -> Uuid {
        let status = self.state.borrow();
        match status.operator_id {
            Some(operator) if status.active => operator,
            _ => caller,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<BotStatus> {
        self.state.subscribe()
    }
}

/// Scan loop driven by the controller
pub struct BotRunner {
    bot: Arc<BotController>,
    arbitrage: Arc<ArbitrageEngine>,
    executor: Arc<ExecutionEngine>,
    db: Arc<Database>,
    scan_interval: Duration,
    error_backoff: Duration,
}

impl BotRunner {
    pub fn new(
        bot: Arc<BotController>,
        arbitrage: Arc<ArbitrageEngine>,
        executor: Arc<ExecutionEngine>,
        db: Arc<Database>,
        scan_interval: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            bot,
            arbitrage,
            executor,
            db,
            scan_interval,
            error_backoff,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let mut status = self.bot.subscribe();
        info!("🤖 Bot runner waiting for activation");
        loop {
            let active = status.borrow_and_update().active;
            if !active {
                if status.changed().await.is_err() {
                    break;
                }
                continue;
            }

            let pause = match self.cycle().await {
                Ok(_) => self.scan_interval,
                Err(e) => {
                    error!("Bot cycle failed: {:#}", e);
                    self.error_backoff
                }
            };

            // Wake early on a toggle so stopping takes effect at once
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Bot runner stopped");
    }

    /// One scan, plus an auto-execution when the operator enabled it.
    /// Returns the trade if one was attempted.
    pub async fn cycle(&self) -> Result<Option<Trade>> {
        let operator = self.bot.status().operator_id;

        let settings = match operator {
            Some(user) => {
                let trading = self.db.trading_settings(&user)?;
                let dexes = self.db.dex_settings(&user)?;
                self.arbitrage.apply_settings(&trading, &dexes);
                Some((user, trading))
            }
            None => None,
        };

        let active = self.arbitrage.scan_opportunities().await?;

        let Some((user, trading)) = settings else {
            return Ok(None);
        };
        if !trading.auto_execute {
            return Ok(None);
        }
        // Sorted by price differential, widest first
        let Some(best) = active.first() else {
            debug!("No active opportunities to execute");
            return Ok(None);
        };
        let Some(wallet) = self.db.first_active_wallet(&user)? else {
            warn!("Auto-execute is on but {} has no active wallet", user);
            return Ok(None);
        };

        let request = ExecutionRequest {
            user_id: user,
            opportunity_id: best.id,
            wallet,
            settings: trading,
        };
        match self.executor.execute(request).await {
            Ok(trade) => Ok(Some(trade)),
            Err(e) if e.is_refusal() => {
                info!("Skipping opportunity {}: {}", best.id, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::{DetectorConfig, FeeCalculator};
    use crate::clients::{JupiterQuote, SimulationResult};
    use crate::execution::{ExecutionConfig, PaperSubmitter, SwapLeg, SwapRouter, TransactionSimulator};
    use crate::feed::{FeedConfig, PriceFeed, QuoteSource};
    use crate::models::{TokenPair, TradeStatus, VenueQuote, SOL_MINT};
    use crate::storage::test_support::{memory_db, seed_user};
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::broadcast;

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

    struct ExactRouter;

    #[async_trait]
    impl SwapRouter for ExactRouter {
        async fn quote(&self, leg: &SwapLeg) -> Result<JupiterQuote> {
            Ok(JupiterQuote {
                input_mint: leg.input_mint.clone(),
                output_mint: leg.output_mint.clone(),
                in_amount: leg.amount_in,
                out_amount: leg.expected_out,
                other_amount_threshold: leg.expected_out,
                price_impact_pct: 0.0,
                route_labels: vec![],
                raw: serde_json::Value::Null,
            })
        }

        async fn build(&self, _quote: &JupiterQuote, _wallet: &str) -> Result<String> {
            Ok("tx".to_string())
        }
    }

    struct OkSimulator;

    #[async_trait]
    impl TransactionSimulator for OkSimulator {
        async fn simulate(&self, _transaction: &str) -> Result<SimulationResult> {
            Ok(SimulationResult {
                error: None,
                logs: vec![],
                units_consumed: 1,
            })
        }
    }

    fn runner(db: Arc<Database>) -> (BotRunner, Arc<BotController>, Arc<ArbitrageEngine>) {
        let (events, _) = broadcast::channel(256);
        let sources = vec![
            Arc::new(SolSource {
                venue: "Raydium",
                sol_price: 100.0,
            }) as Arc<dyn QuoteSource>,
            Arc::new(SolSource {
                venue: "Orca",
                sol_price: 102.0,
            }) as Arc<dyn QuoteSource>,
        ];
        let feed = PriceFeed::new(sources, events.clone(), FeedConfig::default());
        let arbitrage = ArbitrageEngine::new(
            feed.clone(),
            db.clone(),
            FeeCalculator::default(),
            DetectorConfig::default(),
            events.clone(),
        );
        let executor = ExecutionEngine::new(
            db.clone(),
            feed,
            Arc::new(ExactRouter),
            Arc::new(OkSimulator),
            Arc::new(PaperSubmitter),
            events,
            ExecutionConfig::default(),
        );
        let bot = BotController::new();
        let runner = BotRunner::new(
            bot.clone(),
            arbitrage.clone(),
            executor,
            db,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        (runner, bot, arbitrage)
    }

    #[test]
    fn test_running_operator_owns_detector_settings() {
        let bot = BotController::new();
        let operator = Uuid::new_v4();
        let visitor = Uuid::new_v4();
        assert_eq!(bot.settings_owner(visitor), visitor);

        bot.set_active(true, operator);
        assert_eq!(bot.settings_owner(visitor), operator);

        bot.set_active(false, operator);
        assert_eq!(bot.settings_owner(visitor), visitor);
    }

    #[test]
    fn test_toggle_is_visible_immediately() {
        let bot = BotController::new();
        let rx = bot.subscribe();
        assert!(!bot.status().active);

        let operator = Uuid::new_v4();
        let status = bot.set_active(true, operator);
        assert!(status.active);
        assert!(bot.status().active);
        assert_eq!(bot.status().operator_id, Some(operator));
        assert!(rx.borrow().active);

        bot.set_active(false, operator);
        assert!(!bot.status().active);
    }

    #[tokio::test]
    async fn test_cycle_without_auto_execute_only_scans() {
        let db = memory_db();
        let user = seed_user(&db, "alice");
        let (runner, bot, arbitrage) = runner(db.clone());
        let detector = arbitrage.spawn_detector();
        bot.set_active(true, user);

        for _ in 0..5 {
            assert!(runner.cycle().await.unwrap().is_none());
        }
        detector.abort();
        assert!(db.list_trades(&user, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_auto_executes_widest_opportunity() {
        let db = memory_db();
        let user = seed_user(&db, "alice");
        db.create_wallet(&user, "main", "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU")
            .unwrap();
        db.put_setting(&user, "trading", &json!({"auto_execute": true})).unwrap();

        let (runner, bot, arbitrage) = runner(db.clone());
        let detector = arbitrage.spawn_detector();
        bot.set_active(true, user);

        // Detection is asynchronous: the first cycles may see nothing yet
        let mut trade = None;
        for _ in 0..50 {
            if let Some(t) = runner.cycle().await.unwrap() {
                trade = Some(t);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        detector.abort();

        let trade = trade.expect("an opportunity should have been executed");
        assert_eq!(trade.status, TradeStatus::Completed);
        assert_eq!(trade.token_pair, "SOL/USDC");
        assert_eq!(trade.buy_venue, "Raydium");
        assert_eq!(trade.sell_venue, "Orca");
    }

    #[tokio::test]
    async fn test_runner_idles_until_activated() {
        let db = memory_db();
        let (runner, bot, _arbitrage) = runner(db.clone());
        let handle = runner.spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        // Nothing scanned while inactive
        assert_eq!(db.count_active_opportunities().unwrap(), 0);
        assert!(!bot.status().active);

        handle.abort();
    }
}
