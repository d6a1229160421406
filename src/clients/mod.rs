//! Outbound HTTP clients (Jupiter swap API, Solana JSON-RPC)

pub mod jupiter;
pub mod solana_rpc;

pub use jupiter::{JupiterClient, JupiterQuote, QuoteRequest};
pub use solana_rpc::{SimulationResult, SolanaRpc};
