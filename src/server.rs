//! Server Wiring
//! Mission: Build every component once and expose them through one router

use axum::{
    extract::FromRef,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api;
use crate::arbitrage::{ArbitrageEngine, DetectorConfig, FeeCalculator, FeeStructure};
use crate::auth::{self, auth_middleware, AuthState, JwtHandler, UserStore};
use crate::bot::{BotController, BotRunner};
use crate::clients::{JupiterClient, SolanaRpc};
use crate::config::{Config, ExecutionMode};
use crate::execution::{
    ExecutionConfig, ExecutionEngine, JupiterSwapRouter, PaperSubmitter, RemoteSigner, RpcSubmitter, SwapRouter,
    TransactionSimulator, TransactionSubmitter,
};
use crate::feed::{FeedConfig, JupiterVenueSource, PriceFeed, QuoteSource};
use crate::middleware::request_logging;
use crate::models::MarketEvent;
use crate::storage::Database;
use crate::ws::websocket_handler;

/// Outbound integrations, swappable for tests
pub struct Components {
    pub sources: Vec<Arc<dyn QuoteSource>>,
    pub swap_router: Arc<dyn SwapRouter>,
    pub simulator: Arc<dyn TransactionSimulator>,
    pub submitter: Arc<dyn TransactionSubmitter>,
    pub chain: Arc<SolanaRpc>,
}

impl Components {
    /// Jupiter-backed venues and the configured Solana RPC node
    pub fn from_config(config: &Config, http: reqwest::Client) -> anyhow::Result<Self> {
        let jupiter = Arc::new(JupiterClient::new(http.clone(), config.jupiter_api_url.clone()));
        let chain = Arc::new(SolanaRpc::new(http.clone(), config.solana_rpc_url.clone()));

        let submitter: Arc<dyn TransactionSubmitter> = match (config.execution_mode, &config.signer_url) {
            (ExecutionMode::Live, Some(url)) => {
                Arc::new(RpcSubmitter::new(chain.clone(), RemoteSigner::new(http, url.clone())))
            }
            (ExecutionMode::Live, None) => anyhow::bail!("Live execution has no signer configured"),
            (ExecutionMode::Paper, _) => Arc::new(PaperSubmitter),
        };

        Ok(Self {
            sources: JupiterVenueSource::registry(jupiter.clone()),
            swap_router: Arc::new(JupiterSwapRouter::new(jupiter)),
            simulator: chain.clone(),
            submitter,
            chain,
        })
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub feed: Arc<PriceFeed>,
    pub arbitrage: Arc<ArbitrageEngine>,
    pub executor: Arc<ExecutionEngine>,
    pub bot: Arc<BotController>,
    pub chain: Arc<SolanaRpc>,
    pub events: broadcast::Sender<MarketEvent>,
    pub auth: AuthState,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

impl AppState {
    pub fn new(config: Config, db: Arc<Database>, components: Components) -> Self {
        let (events, _) = broadcast::channel(1024);

        let feed = PriceFeed::new(
            components.sources,
            events.clone(),
            FeedConfig {
                max_quote_age: config.max_quote_age(),
                failure_threshold: config.source_failure_threshold,
                cooldown: config.source_cooldown(),
                ..FeedConfig::default()
            },
        );

        let fees = FeeCalculator::new(FeeStructure {
            slippage_buffer_bps: config.slippage_buffer_bps,
            ..FeeStructure::default()
        });
        let arbitrage = ArbitrageEngine::new(
            feed.clone(),
            db.clone(),
            fees,
            DetectorConfig {
                max_quote_age: config.max_quote_age(),
                ..DetectorConfig::default()
            },
            events.clone(),
        );

        let executor = ExecutionEngine::new(
            db.clone(),
            feed.clone(),
            components.swap_router,
            components.simulator,
            components.submitter,
            events.clone(),
            ExecutionConfig::from_config(&config),
        );

        let auth = AuthState {
            user_store: Arc::new(UserStore::new(db.clone())),
            jwt_handler: Arc::new(JwtHandler::new(config.jwt_secret.clone(), config.jwt_expiration_hours)),
            db: db.clone(),
            venues: Arc::new(feed.venues()),
        };

        Self {
            config: Arc::new(config),
            db,
            feed,
            arbitrage,
            executor,
            bot: BotController::new(),
            chain: components.chain,
            events,
            auth,
        }
    }

    /// Price polling, the quote-driven detector and the bot loop
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let runner = BotRunner::new(
            self.bot.clone(),
            self.arbitrage.clone(),
            self.executor.clone(),
            self.db.clone(),
            self.config.scan_interval(),
            self.config.scan_error_backoff(),
        );

        info!("🚀 Starting background tasks ({} mode)", self.executor.mode());
        vec![
            self.feed.clone().spawn_polling(self.config.price_poll_interval()),
            self.arbitrage.clone().spawn_detector(),
            runner.spawn(),
        ]
    }
}

/// Full HTTP surface for the API port
pub fn build_router(state: AppState) -> Router {
    let jwt_handler = state.auth.jwt_handler.clone();

    // Auth routes (no JWT required)
    let auth_router = Router::new()
        .route("/token", post(auth::api::login))
        .route("/register", post(auth::api::register))
        .with_state(state.auth.clone());

    // Protected routes (JWT required)
    let protected_routes = Router::new()
        .route("/users/me", get(auth::api::me))
        .route("/dashboard", get(api::dashboard::get_dashboard))
        .route("/opportunities", get(api::opportunities::list_opportunities))
        .route("/opportunities/scan", post(api::opportunities::scan_opportunities))
        .route("/opportunities/execute", post(api::opportunities::execute_opportunity))
        .route(
            "/opportunities/:id/simulate",
            post(api::opportunities::simulate_opportunity),
        )
        .route("/trades", get(api::trades::list_trades))
        .route("/trades/:id", get(api::trades::get_trade))
        .route(
            "/wallets",
            get(api::wallets::list_wallets).post(api::wallets::create_wallet),
        )
        .route("/wallets/:id", get(api::wallets::get_wallet))
        .route("/wallets/:id/balances", get(api::wallets::get_wallet_balances))
        .route("/settings", get(api::settings::get_settings))
        .route(
            "/settings/:category",
            get(api::settings::get_category).put(api::settings::put_category),
        )
        .route(
            "/bot/status",
            get(api::bot::get_status).post(api::bot::set_status),
        )
        .route("/risk/trade/:id", get(api::risk::assess_trade_risk))
        .route("/risk/portfolio", get(api::risk::assess_portfolio_risk))
        .route("/prices", get(api::prices::get_price))
        .route_layer(middleware::from_fn_with_state(jwt_handler, auth_middleware))
        .with_state(state.clone());

    // Public routes
    let public_routes = Router::new()
        .route("/", get(api::health::root))
        .route("/health", get(api::health::health_check))
        .route("/ws", get(websocket_handler))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(auth_router)
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Router for the dedicated WebSocket port, upgrades on `/`
pub fn ws_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(websocket_handler))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}
