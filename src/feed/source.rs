use crate::clients::jupiter::{JupiterClient, QuoteRequest};
use crate::models::{TokenPair, VenueQuote};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// Venue registry: display name and the Jupiter route labels it is restricted to.
/// `None` leaves routing to the aggregator.
pub const VENUES: &[(&str, Option<&str>)] = &[
    ("Jupiter", None),
    ("Raydium", Some("Raydium,Raydium CLMM,Raydium CP")),
    ("Orca", Some("Whirlpool")),
    ("Meteora", Some("Meteora DLMM")),
];

/// Route labels for a venue name, `None` for unrestricted or unknown venues
pub fn route_labels(venue: &str) -> Option<&'static str> {
    VENUES
        .iter()
        .find(|(name, _)| *name == venue)
        .and_then(|(_, labels)| *labels)
}

/// A venue able to price a pair
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn venue(&self) -> &str;

    /// Price `amount` base units of `pair.base` in `pair.quote`
    async fn quote(&self, pair: &TokenPair, amount: u64) -> Result<VenueQuote>;
}

/// Effective price of a fill, in quote tokens per base token
pub fn fill_price(pair: &TokenPair, in_amount: u64, out_amount: u64) -> Option<f64> {
    if in_amount == 0 || out_amount == 0 {
        return None;
    }
    Some(pair.quote.to_ui(out_amount) / pair.base.to_ui(in_amount))
}

/// One venue priced through Jupiter with routing restricted to its pools
pub struct JupiterVenueSource {
    venue: String,
    route_labels: Option<String>,
    client: Arc<JupiterClient>,
}

impl JupiterVenueSource {
    pub fn new(venue: impl Into<String>, route_labels: Option<&str>, client: Arc<JupiterClient>) -> Self {
        Self {
            venue: venue.into(),
            route_labels: route_labels.map(str::to_string),
            client,
        }
    }

    /// One source per registry venue sharing a client
    pub fn registry(client: Arc<JupiterClient>) -> Vec<Arc<dyn QuoteSource>> {
        VENUES
            .iter()
            .map(|(venue, labels)| {
                Arc::new(JupiterVenueSource::new(*venue, *labels, client.clone())) as Arc<dyn QuoteSource>
            })
            .collect()
    }
}

#[async_trait]
impl QuoteSource for JupiterVenueSource {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn quote(&self, pair: &TokenPair, amount: u64) -> Result<VenueQuote> {
        let quote = self
            .client
            .quote(&QuoteRequest {
                input_mint: &pair.base.mint_address,
                output_mint: &pair.quote.mint_address,
                amount,
                slippage_bps: 50,
                dexes: self.route_labels.as_deref(),
            })
            .await?;

        let Some(price) = fill_price(pair, quote.in_amount, quote.out_amount) else {
            bail!("{} returned an empty fill for {}", self.venue, pair.symbol());
        };

        Ok(VenueQuote {
            pair: pair.key(),
            symbol: pair.symbol(),
            venue: self.venue.clone(),
            price,
            price_impact_pct: quote.price_impact_pct,
            observed_at: Utc::now(),
        })
    }
}
