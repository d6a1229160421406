//! Runtime Configuration
//! Mission: One typed view of CLI flags and environment variables

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

/// How execution submits transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Quote and simulate, then record synthetic signatures
    Paper,
    /// Have `SIGNER_URL` sign swap transactions, then send them to the RPC node
    Live,
}

/// Solana cross-DEX arbitrage backend
#[derive(Parser, Debug, Clone)]
#[command(name = "solarb")]
#[command(about = "Solana cross-DEX arbitrage backend: price feed, detection, risk, execution")]
pub struct Config {
    /// Interface to bind both listeners on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP API port
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Dedicated WebSocket port (0 disables the second listener)
    #[arg(long, env = "WS_PORT", default_value_t = 8765)]
    pub ws_port: u16,

    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "solarb.db")]
    pub database_path: String,

    #[arg(
        long,
        env = "JWT_SECRET",
        default_value = "dev-secret-change-in-production-minimum-32-characters",
        hide_env_values = true
    )]
    pub jwt_secret: String,

    #[arg(long, env = "JWT_EXPIRATION_HOURS", default_value_t = 24)]
    pub jwt_expiration_hours: i64,

    #[arg(long, env = "JUPITER_API_URL", default_value = "https://quote-api.jup.ag/v6")]
    pub jupiter_api_url: String,

    #[arg(long, env = "SOLANA_RPC_URL", default_value = "https://api.mainnet-beta.solana.com")]
    pub solana_rpc_url: String,

    #[arg(long, env = "EXECUTION_MODE", value_enum, default_value = "paper")]
    pub execution_mode: ExecutionMode,

    /// External signing service for live mode. Keys never reach this process.
    #[arg(long, env = "SIGNER_URL")]
    pub signer_url: Option<String>,

    /// Outbound HTTP timeout for Jupiter and RPC calls
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 10)]
    pub http_timeout_secs: u64,

    /// Refresh interval for pairs with live subscribers
    #[arg(long, env = "PRICE_POLL_SECS", default_value_t = 5)]
    pub price_poll_secs: u64,

    #[arg(long, env = "SCAN_INTERVAL_SECS", default_value_t = 5)]
    pub scan_interval_secs: u64,

    #[arg(long, env = "SCAN_ERROR_BACKOFF_SECS", default_value_t = 10)]
    pub scan_error_backoff_secs: u64,

    /// Venue quotes older than this are ignored by detection
    #[arg(long, env = "MAX_QUOTE_AGE_SECS", default_value_t = 30)]
    pub max_quote_age_secs: i64,

    /// Deadline for one execution attempt
    #[arg(long, env = "LEG_TIMEOUT_SECS", default_value_t = 20)]
    pub leg_timeout_secs: u64,

    #[arg(long, env = "EXECUTION_MAX_ATTEMPTS", default_value_t = 3)]
    pub execution_max_attempts: u32,

    #[arg(long, env = "EXECUTION_RETRY_BASE_MS", default_value_t = 500)]
    pub execution_retry_base_ms: u64,

    /// Consecutive failures before a price source is parked
    #[arg(long, env = "SOURCE_FAILURE_THRESHOLD", default_value_t = 5)]
    pub source_failure_threshold: u32,

    #[arg(long, env = "SOURCE_COOLDOWN_SECS", default_value_t = 60)]
    pub source_cooldown_secs: u64,

    /// Extra slippage allowance folded into the net spread, in basis points
    #[arg(long, env = "SLIPPAGE_BUFFER_BPS", default_value_t = 10.0)]
    pub slippage_buffer_bps: f64,
}

impl Config {
    /// Defaults with nothing read from the command line
    pub fn from_defaults() -> Self {
        Self::parse_from(["solarb"])
    }

    /// Reject combinations that cannot work at runtime
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.execution_mode == ExecutionMode::Live && self.signer_url.is_none() {
            anyhow::bail!(
                "EXECUTION_MODE=live requires SIGNER_URL: Jupiter swap transactions arrive unsigned"
            );
        }
        Ok(())
    }

    pub fn api_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn ws_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        if self.ws_port == 0 || self.ws_port == self.port {
            return Ok(None);
        }
        Ok(Some(format!("{}:{}", self.host, self.ws_port).parse()?))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn price_poll_interval(&self) -> Duration {
        Duration::from_secs(self.price_poll_secs.max(1))
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn scan_error_backoff(&self) -> Duration {
        Duration::from_secs(self.scan_error_backoff_secs)
    }

    pub fn max_quote_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_quote_age_secs)
    }

    pub fn leg_timeout(&self) -> Duration {
        Duration::from_secs(self.leg_timeout_secs)
    }

    pub fn source_cooldown(&self) -> Duration {
        Duration::from_secs(self.source_cooldown_secs)
    }
}
