//! Jupiter Swap API client
//! Mission: Quotes per route label and unsigned swap transactions

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Parameters of one `/quote` call
#[derive(Debug, Clone)]
pub struct QuoteRequest<'a> {
    pub input_mint: &'a str,
    pub output_mint: &'a str,
    /// Raw input amount in base units
    pub amount: u64,
    pub slippage_bps: u16,
    /// Restrict routing to these DEX labels (comma separated)
    pub dexes: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteFields {
    input_mint: String,
    in_amount: String,
    output_mint: String,
    out_amount: String,
    other_amount_threshold: String,
    #[serde(default)]
    price_impact_pct: Option<String>,
    #[serde(default)]
    route_plan: Vec<RoutePlanStep>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoutePlanStep {
    swap_info: SwapInfo,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapInfo {
    #[serde(default)]
    label: String,
}

/// Parsed quote plus the raw payload `/swap` expects back verbatim
#[derive(Debug, Clone)]
pub struct JupiterQuote {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    pub other_amount_threshold: u64,
    pub price_impact_pct: f64,
    pub route_labels: Vec<String>,
    pub raw: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapRequest<'a> {
    quote_response: &'a Value,
    user_public_key: &'a str,
    wrap_and_unwrap_sol: bool,
    dynamic_compute_unit_limit: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: String,
}

pub struct JupiterClient {
    http: Client,
    base_url: String,
}

impl JupiterClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn quote(&self, req: &QuoteRequest<'_>) -> Result<JupiterQuote> {
        let url = format!("{}/quote", self.base_url);
        let mut query = vec![
            ("inputMint", req.input_mint.to_string()),
            ("outputMint", req.output_mint.to_string()),
            ("amount", req.amount.to_string()),
            ("slippageBps", req.slippage_bps.to_string()),
        ];
        if let Some(dexes) = req.dexes {
            query.push(("dexes", dexes.to_string()));
        }

        let response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .context("Jupiter quote request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Jupiter quote API error ({}): {}", status, body));
        }

        let raw: Value = response
            .json()
            .await
            .context("Failed to decode Jupiter quote")?;
        let quote = parse_quote(raw)?;

        debug!(
            "Jupiter quote {} -> {}: {} -> {} via {:?}",
            quote.input_mint, quote.output_mint, quote.in_amount, quote.out_amount, quote.route_labels
        );
        Ok(quote)
    }

    /// Build an unsigned, base64-encoded swap transaction for a quote
    pub async fn swap_transaction(&self, quote: &JupiterQuote, user_public_key: &str) -> Result<String> {
        let url = format!("{}/swap", self.base_url);
        let body = SwapRequest {
            quote_response: &quote.raw,
            user_public_key,
            wrap_and_unwrap_sol: true,
            dynamic_compute_unit_limit: true,
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Jupiter swap request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Jupiter swap API error ({}): {}", status, body));
        }

        let swap: SwapResponse = response
            .json()
            .await
            .context("Failed to decode Jupiter swap response")?;
        Ok(swap.swap_transaction)
    }
}

fn parse_amount(field: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .with_context(|| format!("Jupiter returned non-numeric {}: {}", field, value))
}

fn parse_quote(raw: Value) -> Result<JupiterQuote> {
    let fields: QuoteFields =
        serde_json::from_value(raw.clone()).context("Unexpected Jupiter quote shape")?;

    Ok(JupiterQuote {
        in_amount: parse_amount("inAmount", &fields.in_amount)?,
        out_amount: parse_amount("outAmount", &fields.out_amount)?,
        other_amount_threshold: parse_amount("otherAmountThreshold", &fields.other_amount_threshold)?,
        price_impact_pct: fields
            .price_impact_pct
            .as_deref()
            .and_then(|p| p.parse::<f64>().ok())
            .unwrap_or(0.0),
        route_labels: fields
            .route_plan
            .into_iter()
            .map(|step| step.swap_info.label)
            .collect(),
        input_mint: fields.input_mint,
        output_mint: fields.output_mint,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn quote_body() -> Value {
        json!({
            "inputMint": "So11111111111111111111111111111111111111112",
            "inAmount": "1000000000",
            "outputMint": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            "outAmount": "151230000",
            "otherAmountThreshold": "150474000",
            "swapMode": "ExactIn",
            "slippageBps": 50,
            "priceImpactPct": "0.0012",
            "routePlan": [
                {"swapInfo": {"label": "Whirlpool", "ammKey": "abc"}, "percent": 100}
            ],
            "contextSlot": 250000000
        })
    }

    #[tokio::test]
    async fn test_quote_passes_route_restriction() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/quote")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("inputMint".into(), "So11111111111111111111111111111111111111112".into()),
                Matcher::UrlEncoded("amount".into(), "1000000000".into()),
                Matcher::UrlEncoded("slippageBps".into(), "50".into()),
                Matcher::UrlEncoded("dexes".into(), "Whirlpool".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(quote_body().to_string())
            .create_async()
            .await;

        let client = JupiterClient::new(Client::new(), server.url());
        let quote = client
            .quote(&QuoteRequest {
                input_mint: "So11111111111111111111111111111111111111112",
                output_mint: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
                amount: 1_000_000_000,
                slippage_bps: 50,
                dexes: Some("Whirlpool"),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(quote.out_amount, 151_230_000);
        assert_eq!(quote.other_amount_threshold, 150_474_000);
        assert!((quote.price_impact_pct - 0.0012).abs() < 1e-12);
        assert_eq!(quote.route_labels, vec!["Whirlpool".to_string()]);
    }

    #[tokio::test]
    async fn test_quote_error_status_surfaces_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/quote")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"Could not find any route"}"#)
            .create_async()
            .await;

        let client = JupiterClient::new(Client::new(), server.url());
        let err = client
            .quote(&QuoteRequest {
                input_mint: "a",
                output_mint: "b",
                amount: 1,
                slippage_bps: 50,
                dexes: None,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Could not find any route"));
    }

    #[tokio::test]
    async fn test_swap_sends_raw_quote_back() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/swap")
            .match_body(Matcher::PartialJson(json!({
                "userPublicKey": "WalletPubkey111",
                "quoteResponse": {"outAmount": "151230000"}
            })))
            .with_status(200)
            .with_body(r#"{"swapTransaction":"AQID","lastValidBlockHeight":1}"#)
            .create_async()
            .await;

        let client = JupiterClient::new(Client::new(), server.url());
        let quote = parse_quote(quote_body()).unwrap();
        let tx = client.swap_transaction(&quote, "WalletPubkey111").await.unwrap();

        mock.assert_async().await;
        assert_eq!(tx, "AQID");
    }

    #[test]
    fn test_non_numeric_amount_rejected() {
        let mut body = quote_body();
        body["outAmount"] = json!("lots");
        assert!(parse_quote(body).is_err());
    }
}
