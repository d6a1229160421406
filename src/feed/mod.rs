//! Price Feed Aggregator
//! Mission: Normalized per-venue quotes and a reference price per pair

pub mod health;
pub mod price_feed;
pub mod source;

pub use health::{SourceHealth, SourceHealthReport};
pub use price_feed::{median, FeedConfig, PriceFeed};
pub use source::{JupiterVenueSource, QuoteSource, VENUES};
