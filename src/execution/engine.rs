//! Execution Engine
//! Mission: Drive an approved opportunity through quote, simulate, submit and record
//! Philosophy: At most one execution per opportunity, one per pair at a time

use anyhow::anyhow;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::legs::{LegSide, PreparedLeg, SwapLeg, SwapRouter, TransactionSimulator};
use super::submit::TransactionSubmitter;
use crate::config::Config;
use crate::feed::PriceFeed;
use crate::models::{MarketEvent, Opportunity, OpportunityStatus, PairKey, Token, Trade, TradeStatus, Wallet};
use crate::risk::{assess_trade, TradeRiskAssessment};
use crate::settings::TradingSettings;
use crate::storage::{Database, NewTrade};

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Budget for one preparation attempt, and for each submission
    pub leg_timeout: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            leg_timeout: Duration::from_secs(20),
            max_attempts: 3,
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(5),
        }
    }
}

impl ExecutionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            leg_timeout: config.leg_timeout(),
            max_attempts: config.execution_max_attempts.max(1),
            retry_base: Duration::from_millis(config.execution_retry_base_ms),
            ..Self::default()
        }
    }
}

/// Why a leg was refused before anything was sent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    InsufficientOutput,
    SlippageExceeded { min_out: u64, quoted_out: u64 },
    ProgramError { error: String },
    RouteUnavailable { error: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InsufficientOutput => f.write_str("insufficient output"),
            RejectReason::SlippageExceeded { min_out, quoted_out } => {
                write!(f, "slippage bound exceeded (quoted {} < minimum {})", quoted_out, min_out)
            }
            RejectReason::ProgramError { error } => write!(f, "program error: {}", error),
            RejectReason::RouteUnavailable { error } => write!(f, "route unavailable: {}", error),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Opportunity {0} not found")]
    NotFound(i64),

    #[error("Opportunity {id} is {status}, not active")]
    NotActive { id: i64, status: OpportunityStatus },

    #[error("Risk check rejected opportunity {id}: {recommendation} (score {score})")]
    RiskRejected {
        id: i64,
        score: u8,
        recommendation: String,
    },

    #[error("{side} leg rejected in simulation: {reason}")]
    SimulationRejected { side: LegSide, reason: RejectReason },

    #[error("{side} leg submission failed: {message}")]
    Submission { side: LegSide, message: String },

    #[error("Execution timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ExecutionError {
    /// Refusals leave the opportunity untouched and produce no trade
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            ExecutionError::NotFound(_) | ExecutionError::NotActive { .. } | ExecutionError::RiskRejected { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub user_id: Uuid,
    pub opportunity_id: i64,
    pub wallet: Wallet,
    pub settings: TradingSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct LegReport {
    pub side: LegSide,
    pub venue: String,
    pub amount_in: f64,
    pub expected_out: f64,
    pub quoted_out: f64,
    pub units_consumed: u64,
}

/// Dry run of both legs. Nothing is submitted and the status is unchanged.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub opportunity_id: i64,
    pub status: OpportunityStatus,
    pub notional_usd: f64,
    pub buy: Option<LegReport>,
    pub sell: Option<LegReport>,
    pub expected_profit_usd: Option<f64>,
    pub risk: TradeRiskAssessment,
    pub would_execute: bool,
    pub rejection: Option<String>,
}

/// Resolved opportunity ready to be worked on
struct Approved {
    opportunity: Opportunity,
    base: Token,
    quote: Token,
}

struct Fill {
    usdc_in: f64,
    tokens: f64,
    usdc_out: f64,
    tx_hash_buy: String,
    tx_hash_sell: String,
}

#[derive(Default)]
struct Progress {
    attempts: u32,
    tx_hash_buy: Option<String>,
}

pub struct ExecutionEngine {
    db: Arc<Database>,
    feed: Arc<PriceFeed>,
    router: Arc<dyn SwapRouter>,
    simulator: Arc<dyn TransactionSimulator>,
    submitter: Arc<dyn TransactionSubmitter>,
    events: broadcast::Sender<MarketEvent>,
    config: ExecutionConfig,
    pair_locks: parking_lot::Mutex<HashMap<PairKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ExecutionEngine {
    pub fn new(
        db: Arc<Database>,
        feed: Arc<PriceFeed>,
        router: Arc<dyn SwapRouter>,
        simulator: Arc<dyn TransactionSimulator>,
        submitter: Arc<dyn TransactionSubmitter>,
        events: broadcast::Sender<MarketEvent>,
        config: ExecutionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            feed,
            router,
            simulator,
            submitter,
            events,
            config,
            pair_locks: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    pub fn mode(&self) -> &'static str {
        self.submitter.mode()
    }

    /// Risk assessment with the pair's latest reference move
    pub fn assess(&self, opportunity: Option<&Opportunity>, settings: &TradingSettings) -> TradeRiskAssessment {
        let change = opportunity
            .and_then(|o| self.feed.latest(&o.pair_key()))
            .map(|q| q.price_change_pct);
        assess_trade(opportunity, settings, change)
    }

    /// Checks that refuse an execution without touching it
    pub fn preflight(&self, opportunity_id: i64, settings: &TradingSettings) -> Result<Opportunity, ExecutionError> {
        self.approve(opportunity_id, settings).map(|a| a.opportunity)
    }

    fn approve(&self, opportunity_id: i64, settings: &TradingSettings) -> Result<Approved, ExecutionError> {
        let opportunity = self
            .db
            .get_opportunity(opportunity_id)?
            .ok_or(ExecutionError::NotFound(opportunity_id))?;

        if opportunity.status != OpportunityStatus::Active {
            return Err(ExecutionError::NotActive {
                id: opportunity.id,
                status: opportunity.status,
            });
        }

        let risk = self.assess(Some(&opportunity), settings);
        if !risk.can_execute {
            return Err(ExecutionError::RiskRejected {
                id: opportunity.id,
                score: risk.risk_score,
                recommendation: risk.recommendation,
            });
        }

        let (base, quote) = self.resolve_tokens(&opportunity)?;
        Ok(Approved {
            opportunity,
            base,
            quote,
        })
    }

    fn resolve_tokens(&self, opportunity: &Opportunity) -> Result<(Token, Token), ExecutionError> {
        let base = self
            .db
            .token_by_mint(&opportunity.base_mint)?
            .ok_or_else(|| anyhow!("Token registry has no entry for mint {}", opportunity.base_mint))?;
        let quote = self
            .db
            .token_by_mint(&opportunity.quote_mint)?
            .ok_or_else(|| anyhow!("Token registry has no entry for mint {}", opportunity.quote_mint))?;
        Ok((base, quote))
    }

    fn pair_lock(&self, pair: &PairKey) -> Arc<tokio::sync::Mutex<()>> {
        self.pair_locks.lock().entry(pair.clone()).or_default().clone()
    }

    fn publish(&self, opportunity_id: i64) {
        match self.db.get_opportunity(opportunity_id) {
            Ok(Some(opp)) => {
                let _ = self.events.send(MarketEvent::Opportunity(opp));
            }
            Ok(None) => {}
            Err(e) => warn!("Could not reload opportunity {}: {:#}", opportunity_id, e),
        }
    }

    /// Execute an opportunity end to end.
    ///
    /// Refusals come back as `Err` with the opportunity still active. Once
    /// the opportunity has been claimed every outcome is recorded as a trade
    /// and returned as `Ok`, failed ones included.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<Trade, ExecutionError> {
        let approved = self.approve(request.opportunity_id, &request.settings)?;
        let opp = &approved.opportunity;

        let lock = self.pair_lock(&opp.pair_key());
        let _guard = lock.lock().await;

        if !self.db.transition_opportunity(
            opp.id,
            OpportunityStatus::Active,
            OpportunityStatus::Executing,
            None,
        )? {
            let status = self
                .db
                .get_opportunity(opp.id)?
                .map(|o| o.status)
                .unwrap_or(OpportunityStatus::Expired);
            return Err(ExecutionError::NotActive { id: opp.id, status });
        }
        self.publish(opp.id);
        info!(
            "🚀 Executing opportunity {} ({}: {} -> {}) in {} mode",
            opp.id,
            opp.token_pair,
            opp.buy_venue,
            opp.sell_venue,
            self.mode()
        );

        let started = Instant::now();
        let mut progress = Progress::default();
        let result = self.run(&approved, &request, &mut progress).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let trade = match &result {
            Ok(fill) => NewTrade {
                buy_price: fill.usdc_in / fill.tokens,
                sell_price: fill.usdc_out / fill.tokens,
                amount: fill.tokens,
                profit_usd: fill.usdc_out - fill.usdc_in,
                status: TradeStatus::Completed,
                tx_hash_buy: Some(fill.tx_hash_buy.clone()),
                tx_hash_sell: Some(fill.tx_hash_sell.clone()),
                error_message: None,
                ..self.trade_template(opp, &request, progress.attempts, duration_ms)
            },
            Err(e) => NewTrade {
                tx_hash_buy: progress.tx_hash_buy.clone(),
                error_message: Some(e.to_string()),
                ..self.trade_template(opp, &request, progress.attempts, duration_ms)
            },
        };

        let recorded = self.db.finish_execution(&request.user_id, &trade);
        if let Err(ref e) = recorded {
            error!("Failed to record execution of opportunity {}: {:#}", opp.id, e);
            let _ = self.db.transition_opportunity(
                opp.id,
                OpportunityStatus::Executing,
                OpportunityStatus::Failed,
                Some("Execution result could not be recorded"),
            );
        }
        self.publish(opp.id);

        let trade = recorded?;
        match trade.status {
            TradeStatus::Completed => info!(
                "✅ Opportunity {} completed: profit ${:.4} in {}ms",
                opp.id, trade.profit_usd, trade.duration_ms
            ),
            TradeStatus::Failed => warn!(
                "❌ Opportunity {} failed after {} attempts: {}",
                opp.id,
                trade.attempts,
                trade.error_message.as_deref().unwrap_or("unknown error")
            ),
        }
        Ok(trade)
    }

    /// Failed-trade defaults; completed trades override the fill fields
    fn trade_template(&self, opp: &Opportunity, request: &ExecutionRequest, attempts: u32, duration_ms: i64) -> NewTrade {
        NewTrade {
            opportunity_id: opp.id,
            wallet_id: request.wallet.id,
            token_pair: opp.token_pair.clone(),
            base_mint: opp.base_mint.clone(),
            quote_mint: opp.quote_mint.clone(),
            buy_venue: opp.buy_venue.clone(),
            sell_venue: opp.sell_venue.clone(),
            buy_price: opp.buy_price,
            sell_price: opp.sell_price,
            amount: 0.0,
            profit_usd: 0.0,
            status: TradeStatus::Failed,
            tx_hash_buy: None,
            tx_hash_sell: None,
            error_message: None,
            attempts,
            duration_ms,
        }
    }

    async fn run(
        &self,
        approved: &Approved,
        request: &ExecutionRequest,
        progress: &mut Progress,
    ) -> Result<Fill, ExecutionError> {
        let (buy, sell) = self.prepare_with_retry(approved, request, progress).await?;

        let tx_hash_buy = self.submit_leg(&buy).await?;
        progress.tx_hash_buy = Some(tx_hash_buy.clone());
        let tx_hash_sell = self.submit_leg(&sell).await?;

        Ok(Fill {
            usdc_in: approved.quote.to_ui(buy.leg.amount_in),
            tokens: approved.base.to_ui(buy.quoted_out),
            usdc_out: approved.quote.to_ui(sell.quoted_out),
            tx_hash_buy,
            tx_hash_sell,
        })
    }

    /// Preparation is retried on timeout only; rejections fail at once
    async fn prepare_with_retry(
        &self,
        approved: &Approved,
        request: &ExecutionRequest,
        progress: &mut Progress,
    ) -> Result<(PreparedLeg, PreparedLeg), ExecutionError> {
        let mut delay = self.config.retry_base;
        loop {
            progress.attempts += 1;
            let attempt = tokio::time::timeout(
                self.config.leg_timeout,
                self.prepare_round_trip(approved, &request.settings, &request.wallet.address),
            )
            .await;

            match attempt {
                Ok(result) => return result,
                Err(_) if progress.attempts >= self.config.max_attempts => {
                    return Err(ExecutionError::Timeout {
                        attempts: progress.attempts,
                    });
                }
                Err(_) => {
                    let wait = with_jitter(delay);
                    warn!(
                        "Attempt {}/{} for opportunity {} timed out, retrying in {:?}",
                        progress.attempts, self.config.max_attempts, approved.opportunity.id, wait
                    );
                    tokio::time::sleep(wait).await;
                    delay = (delay * 2).min(self.config.retry_max);
                }
            }
        }
    }

    async fn prepare_round_trip(
        &self,
        approved: &Approved,
        settings: &TradingSettings,
        wallet: &str,
    ) -> Result<(PreparedLeg, PreparedLeg), ExecutionError> {
        let opp = &approved.opportunity;
        let notional = settings.notional_usd();
        let slippage_bps = settings.slippage_bps();

        let buy_leg = SwapLeg {
            side: LegSide::Buy,
            venue: opp.buy_venue.clone(),
            input_mint: approved.quote.mint_address.clone(),
            output_mint: approved.base.mint_address.clone(),
            amount_in: approved.quote.to_raw(notional),
            expected_out: approved.base.to_raw(notional / opp.buy_price),
            slippage_bps,
        };
        let buy = self.prepare_leg(buy_leg, wallet).await?;

        let tokens = approved.base.to_ui(buy.quoted_out);
        let sell_leg = SwapLeg {
            side: LegSide::Sell,
            venue: opp.sell_venue.clone(),
            input_mint: approved.base.mint_address.clone(),
            output_mint: approved.quote.mint_address.clone(),
            amount_in: buy.quoted_out,
            expected_out: approved.quote.to_raw(tokens * opp.sell_price),
            slippage_bps,
        };
        let sell = self.prepare_leg(sell_leg, wallet).await?;

        Ok((buy, sell))
    }

    async fn prepare_leg(&self, leg: SwapLeg, wallet: &str) -> Result<PreparedLeg, ExecutionError> {
        let side = leg.side;
        let reject = |reason: RejectReason| ExecutionError::SimulationRejected { side, reason };
        let unavailable = |e: anyhow::Error| {
            reject(RejectReason::RouteUnavailable {
                error: format!("{:#}", e),
            })
        };

        let quote = self.router.quote(&leg).await.map_err(unavailable)?;
        if quote.out_amount == 0 {
            return Err(reject(RejectReason::InsufficientOutput));
        }
        let min_out = leg.min_out();
        if quote.out_amount < min_out {
            return Err(reject(RejectReason::SlippageExceeded {
                min_out,
                quoted_out: quote.out_amount,
            }));
        }

        let transaction = self.router.build(&quote, wallet).await.map_err(unavailable)?;
        let simulation = self.simulator.simulate(&transaction).await.map_err(unavailable)?;
        if let Some(error) = simulation.error.clone() {
            return Err(reject(RejectReason::ProgramError { error }));
        }

        Ok(PreparedLeg {
            quoted_out: quote.out_amount,
            leg,
            transaction,
            simulation,
        })
    }

    /// Submissions are never retried: a timed-out send may still land
    async fn submit_leg(&self, prepared: &PreparedLeg) -> Result<String, ExecutionError> {
        let side = prepared.leg.side;
        match tokio::time::timeout(self.config.leg_timeout, self.submitter.submit(&prepared.transaction)).await {
            Ok(Ok(signature)) => Ok(signature),
            Ok(Err(e)) => Err(ExecutionError::Submission {
                side,
                message: format!("{:#}", e),
            }),
            Err(_) => Err(ExecutionError::Submission {
                side,
                message: "timed out waiting for submission".to_string(),
            }),
        }
    }

    /// Quote and simulate both legs without claiming or submitting
    pub async fn simulate(
        &self,
        opportunity_id: i64,
        settings: &TradingSettings,
        wallet: &str,
    ) -> Result<SimulationReport, ExecutionError> {
        let opportunity = self
            .db
            .get_opportunity(opportunity_id)?
            .ok_or(ExecutionError::NotFound(opportunity_id))?;
        let (base, quote) = self.resolve_tokens(&opportunity)?;
        let risk = self.assess(Some(&opportunity), settings);
        let approved = Approved {
            opportunity,
            base,
            quote,
        };

        let prepared = match tokio::time::timeout(
            self.config.leg_timeout,
            self.prepare_round_trip(&approved, settings, wallet),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout { attempts: 1 }),
        };

        let opp = approved.opportunity;
        let report = |leg: &PreparedLeg, input: &Token, output: &Token| LegReport {
            side: leg.leg.side,
            venue: leg.leg.venue.clone(),
            amount_in: input.to_ui(leg.leg.amount_in),
            expected_out: output.to_ui(leg.leg.expected_out),
            quoted_out: output.to_ui(leg.quoted_out),
            units_consumed: leg.simulation.units_consumed,
        };

        let (buy, sell, expected_profit_usd, rejection) = match &prepared {
            Ok((buy, sell)) => (
                Some(report(buy, &approved.quote, &approved.base)),
                Some(report(sell, &approved.base, &approved.quote)),
                Some(approved.quote.to_ui(sell.quoted_out) - approved.quote.to_ui(buy.leg.amount_in)),
                None,
            ),
            Err(e) => (None, None, None, Some(e.to_string())),
        };

        Ok(SimulationReport {
            opportunity_id: opp.id,
            status: opp.status,
            notional_usd: settings.notional_usd(),
            would_execute: rejection.is_none() && risk.can_execute && opp.status == OpportunityStatus::Active,
            buy,
            sell,
            expected_profit_usd,
            risk,
            rejection,
        })
    }
}

/// ±10% jitter around a backoff delay
fn with_jitter(delay: Duration) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(-0.1..=0.1);
    delay.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{JupiterQuote, SimulationResult};
    use crate::execution::submit::PaperSubmitter;
    use crate::feed::FeedConfig;
    use crate::models::{SpreadCandidate, SOL_MINT, USDC_MINT};
    use crate::storage::test_support::{memory_db, seed_user};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fills each leg at `fill` times its expected output
    struct FakeRouter {
        buy_fill: f64,
        sell_fill: f64,
        delay: Duration,
        quotes: AtomicUsize,
    }

    impl FakeRouter {
        fn filling(buy_fill: f64, sell_fill: f64) -> Arc<Self> {
            Arc::new(Self {
                buy_fill,
                sell_fill,
                delay: Duration::ZERO,
                quotes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SwapRouter for FakeRouter {
        async fn quote(&self, leg: &SwapLeg) -> anyhow::Result<JupiterQuote> {
            self.quotes.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let fill = match leg.side {
                LegSide::Buy => self.buy_fill,
                LegSide::Sell => self.sell_fill,
            };
            let out_amount = (leg.expected_out as f64 * fill) as u64;
            Ok(JupiterQuote {
                input_mint: leg.input_mint.clone(),
                output_mint: leg.output_mint.clone(),
                in_amount: leg.amount_in,
                out_amount,
                other_amount_threshold: out_amount,
                price_impact_pct: 0.0,
                route_labels: vec![leg.venue.clone()],
                raw: serde_json::Value::Null,
            })
        }

        async fn build(&self, quote: &JupiterQuote, _wallet: &str) -> anyhow::Result<String> {
            Ok(format!("tx-{}-{}", quote.input_mint, quote.out_amount))
        }
    }

    struct FakeSimulator {
        error: Option<&'static str>,
    }

    #[async_trait]
    impl TransactionSimulator for FakeSimulator {
        async fn simulate(&self, _transaction: &str) -> anyhow::Result<SimulationResult> {
            Ok(SimulationResult {
                error: self.error.map(str::to_string),
                logs: vec![],
                units_consumed: 42_000,
            })
        }
    }

    struct RefusingSubmitter;

    #[async_trait]
    impl TransactionSubmitter for RefusingSubmitter {
        fn mode(&self) -> &'static str {
            "live"
        }

        async fn submit(&self, _transaction: &str) -> anyhow::Result<String> {
            anyhow::bail!("blockhash not found")
        }
    }

    struct Harness {
        db: Arc<Database>,
        engine: Arc<ExecutionEngine>,
        request: ExecutionRequest,
    }

    fn harness(
        router: Arc<dyn SwapRouter>,
        simulator_error: Option<&'static str>,
        submitter: Arc<dyn TransactionSubmitter>,
        config: ExecutionConfig,
    ) -> Harness {
        let db = memory_db();
        let user = seed_user(&db, "alice");
        let wallet = db.create_wallet(&user, "main", "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU").unwrap();
        let opp = db
            .insert_opportunity(&SpreadCandidate {
                pair: PairKey::new(SOL_MINT, USDC_MINT),
                symbol: "SOL/USDC".into(),
                buy_venue: "Raydium".into(),
                sell_venue: "Orca".into(),
                buy_price: 100.0,
                sell_price: 102.0,
                price_diff_percent: 2.0,
                net_spread_percent: 1.35,
                potential_profit_usd: 1.34,
            })
            .unwrap();

        let (events, _) = broadcast::channel(64);
        let feed = PriceFeed::new(vec![], events.clone(), FeedConfig::default());
        let engine = ExecutionEngine::new(
            db.clone(),
            feed,
            router,
            Arc::new(FakeSimulator { error: simulator_error }),
            submitter,
            events,
            config,
        );

        Harness {
            db,
            engine,
            request: ExecutionRequest {
                user_id: user,
                opportunity_id: opp.id,
                wallet,
                settings: TradingSettings::default(),
            },
        }
    }

    fn paper() -> Arc<dyn TransactionSubmitter> {
        Arc::new(PaperSubmitter)
    }

    fn status(h: &Harness) -> OpportunityStatus {
        h.db.get_opportunity(h.request.opportunity_id).unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_successful_execution_records_trade() {
        let h = harness(FakeRouter::filling(1.0, 1.0), None, paper(), ExecutionConfig::default());

        let trade = h.engine.execute(h.request.clone()).await.unwrap();

        assert_eq!(trade.status, TradeStatus::Completed);
        assert_eq!(trade.attempts, 1);
        assert!((trade.amount - 1.0).abs() < 1e-9);
        assert!((trade.buy_price - 100.0).abs() < 1e-9);
        assert!((trade.sell_price - 102.0).abs() < 1e-9);
        assert!((trade.profit_usd - 2.0).abs() < 1e-9);
        assert!(trade.tx_hash_buy.as_deref().unwrap().starts_with("paper_"));
        assert!(trade.tx_hash_sell.as_deref().unwrap().starts_with("paper_"));
        assert_eq!(status(&h), OpportunityStatus::Completed);

        let (profit, count, _) = h.db.trade_stats(&h.request.user_id).unwrap();
        assert_eq!(count, 1);
        assert!((profit - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_terminal_opportunity_cannot_execute_twice() {
        let h = harness(FakeRouter::filling(1.0, 1.0), None, paper(), ExecutionConfig::default());
        h.engine.execute(h.request.clone()).await.unwrap();

        let err = h.engine.execute(h.request.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::NotActive {
                status: OpportunityStatus::Completed,
                ..
            }
        ));
        assert_eq!(h.db.list_trades(&h.request.user_id, None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_executions_claim_once() {
        let h = harness(FakeRouter::filling(1.0, 1.0), None, paper(), ExecutionConfig::default());

        let (a, b) = tokio::join!(
            h.engine.execute(h.request.clone()),
            h.engine.execute(h.request.clone())
        );

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(h.db.list_trades(&h.request.user_id, None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_slippage_rejection_fails_opportunity() {
        // Buy leg fills 2% short of expected with a 0.5% bound
        let h = harness(FakeRouter::filling(0.98, 1.0), None, paper(), ExecutionConfig::default());

        let trade = h.engine.execute(h.request.clone()).await.unwrap();

        assert_eq!(trade.status, TradeStatus::Failed);
        assert!(trade.error_message.as_deref().unwrap().contains("slippage bound exceeded"));
        assert!(trade.tx_hash_buy.is_none());
        assert_eq!(trade.profit_usd, 0.0);
        assert_eq!(status(&h), OpportunityStatus::Failed);

        // Failed trades do not count towards realized profit
        let (_, completed, _) = h.db.trade_stats(&h.request.user_id).unwrap();
        assert_eq!(completed, 0);
    }

    #[tokio::test]
    async fn test_zero_output_is_insufficient() {
        let h = harness(FakeRouter::filling(1.0, 0.0), None, paper(), ExecutionConfig::default());
        let trade = h.engine.execute(h.request.clone()).await.unwrap();
        assert_eq!(
            trade.error_message.as_deref(),
            Some("sell leg rejected in simulation: insufficient output")
        );
    }

    #[tokio::test]
    async fn test_program_error_in_simulation() {
        let h = harness(
            FakeRouter::filling(1.0, 1.0),
            Some("InstructionError"),
            paper(),
            ExecutionConfig::default(),
        );
        let trade = h.engine.execute(h.request.clone()).await.unwrap();
        assert_eq!(trade.status, TradeStatus::Failed);
        assert!(trade.error_message.as_deref().unwrap().contains("program error"));
    }

    #[tokio::test]
    async fn test_timeouts_retry_up_to_max_attempts() {
        let router = Arc::new(FakeRouter {
            buy_fill: 1.0,
            sell_fill: 1.0,
            delay: Duration::from_millis(200),
            quotes: AtomicUsize::new(0),
        });
        let config = ExecutionConfig {
            leg_timeout: Duration::from_millis(20),
            max_attempts: 3,
            retry_base: Duration::from_millis(1),
            retry_max: Duration::from_millis(5),
        };
        let h = harness(router.clone(), None, paper(), config);

        let trade = h.engine.execute(h.request.clone()).await.unwrap();

        assert_eq!(trade.status, TradeStatus::Failed);
        assert_eq!(trade.attempts, 3);
        assert_eq!(router.quotes.load(Ordering::SeqCst), 3);
        assert_eq!(
            trade.error_message.as_deref(),
            Some("Execution timed out after 3 attempts")
        );
        assert_eq!(status(&h), OpportunityStatus::Failed);
    }

    #[tokio::test]
    async fn test_submission_error_is_not_retried() {
        let router = FakeRouter::filling(1.0, 1.0);
        let h = harness(router.clone(), None, Arc::new(RefusingSubmitter), ExecutionConfig::default());

        let trade = h.engine.execute(h.request.clone()).await.unwrap();

        assert_eq!(trade.status, TradeStatus::Failed);
        assert_eq!(trade.attempts, 1);
        // One quote per leg
        assert_eq!(router.quotes.load(Ordering::SeqCst), 2);
        assert!(trade
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("buy leg submission failed: blockhash not found"));
    }

    #[tokio::test]
    async fn test_risk_rejection_leaves_opportunity_active() {
        let mut h = harness(FakeRouter::filling(1.0, 1.0), None, paper(), ExecutionConfig::default());
        h.request.settings.max_risk_score = Some(1);

        let err = h.engine.execute(h.request.clone()).await.unwrap_err();

        assert!(matches!(err, ExecutionError::RiskRejected { .. }));
        assert!(err.is_refusal());
        assert_eq!(status(&h), OpportunityStatus::Active);
        assert!(h.db.list_trades(&h.request.user_id, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_opportunity() {
        let mut h = harness(FakeRouter::filling(1.0, 1.0), None, paper(), ExecutionConfig::default());
        h.request.opportunity_id = 999;
        assert!(matches!(
            h.engine.execute(h.request.clone()).await,
            Err(ExecutionError::NotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_simulate_reports_without_side_effects() {
        let h = harness(FakeRouter::filling(1.0, 1.0), None, paper(), ExecutionConfig::default());

        let report = h
            .engine
            .simulate(h.request.opportunity_id, &TradingSettings::default(), &h.request.wallet.address)
            .await
            .unwrap();

        assert!(report.would_execute);
        assert!(report.rejection.is_none());
        let buy = report.buy.unwrap();
        assert_eq!(buy.venue, "Raydium");
        assert!((buy.amount_in - 100.0).abs() < 1e-9);
        assert!((buy.quoted_out - 1.0).abs() < 1e-9);
        assert!((report.expected_profit_usd.unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(status(&h), OpportunityStatus::Active);
        assert!(h.db.list_trades(&h.request.user_id, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_simulate_reports_rejection() {
        let h = harness(FakeRouter::filling(0.5, 1.0), None, paper(), ExecutionConfig::default());
        let report = h
            .engine
            .simulate(h.request.opportunity_id, &TradingSettings::default(), "wallet")
            .await
            .unwrap();
        assert!(!report.would_execute);
        assert!(report.buy.is_none());
        assert!(report.rejection.unwrap().contains("buy leg rejected"));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        for _ in 0..100 {
            let d = with_jitter(Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(900) && d <= Duration::from_millis(1100));
        }
    }
}
