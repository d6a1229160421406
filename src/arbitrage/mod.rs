//! Arbitrage Detection Module
//! Mission: Identify and quantify cross-DEX price mismatches
//! Philosophy: Profit is in the spread, net of every fee

pub mod detector;
pub mod engine;
pub mod fees;

pub use detector::{best_spread, DetectorConfig, DetectorEvent, OpportunityDetector, OpportunityLedger};
pub use engine::ArbitrageEngine;
pub use fees::{FeeCalculator, FeeStructure};
