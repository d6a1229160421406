//! Solana Arbitrage Backend Library
//!
//! Exposes every module so the binary and the integration tests share one
//! wiring path through `server::AppState`.

pub mod api;
pub mod arbitrage;
pub mod auth;
pub mod bot;
pub mod clients;
pub mod config;
pub mod error;
pub mod execution;
pub mod feed;
pub mod middleware;
pub mod models;
pub mod risk;
pub mod server;
pub mod settings;
pub mod storage;
pub mod ws;

pub use config::Config;
pub use server::{build_router, AppState, Components};
