//! WebSocket Streaming
//! Mission: Push reference prices and opportunity changes to dashboard clients
//! Philosophy: Each connection only hears about the pairs it asked for

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::feed::PriceFeed;
use crate::models::{MarketEvent, Opportunity, PairKey, PriceQuote, TokenPair};
use crate::server::AppState;
use crate::storage::Database;

/// Everything the server may send down a socket
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerEvent {
    PriceUpdate { data: PriceQuote },
    OpportunityUpdate { data: Opportunity },
    SubscriptionSuccess { token_pair: PairKey },
    UnsubscriptionSuccess { token_pair: PairKey },
    Error { message: String },
    Pong { data: Value },
}

impl WsServerEvent {
    fn error(message: impl Into<String>) -> Self {
        WsServerEvent::Error {
            message: message.into(),
        }
    }
}

/// Per-connection subscription state
pub struct WsSession {
    db: Arc<Database>,
    feed: Arc<PriceFeed>,
    pairs: HashSet<PairKey>,
}

impl WsSession {
    pub fn new(db: Arc<Database>, feed: Arc<PriceFeed>) -> Self {
        Self {
            db,
            feed,
            pairs: HashSet::new(),
        }
    }

    pub fn subscriptions(&self) -> &HashSet<PairKey> {
        &self.pairs
    }

    /// Handle one client frame, returning the replies in send order
    pub fn handle_text(&mut self, text: &str) -> Vec<WsServerEvent> {
        let Ok(message) = serde_json::from_str::<Value>(text) else {
            debug!("Invalid JSON from client: {}", text);
            return vec![WsServerEvent::error("Invalid JSON")];
        };

        let kind = message.get("type").and_then(Value::as_str).unwrap_or_default();
        match kind {
            "ping" => vec![WsServerEvent::Pong {
                data: serde_json::json!({
                    "timestamp": message
                        .get("data")
                        .and_then(|d| d.get("timestamp"))
                        .and_then(Value::as_i64)
                        .unwrap_or(0)
                }),
            }],
            "subscribe" => match parse_pair(&message) {
                Some(key) => self.subscribe(key),
                None => vec![WsServerEvent::error("Invalid token pair")],
            },
            "unsubscribe" => match parse_pair(&message) {
                Some(key) => self.unsubscribe(key),
                None => vec![WsServerEvent::error("Invalid token pair")],
            },
            other => vec![WsServerEvent::error(format!("Unknown message type: {}", other))],
        }
    }

    fn subscribe(&mut self, key: PairKey) -> Vec<WsServerEvent> {
        let pair = match self.resolve(&key) {
            Ok(Some(pair)) => pair,
            Ok(None) => return vec![WsServerEvent::error("Unsupported token pair")],
            Err(e) => {
                warn!("Token lookup for {} failed: {:#}", key, e);
                return vec![WsServerEvent::error("Subscription failed")];
            }
        };

        if self.pairs.insert(key.clone()) {
            self.feed.track(pair);
            info!("📡 Client subscribed to {}", key);
        }

        let mut replies = Vec::with_capacity(2);
        if let Some(initial) = self.feed.latest(&key) {
            replies.push(WsServerEvent::PriceUpdate { data: initial });
        }
        replies.push(WsServerEvent::SubscriptionSuccess { token_pair: key });
        replies
    }

    fn unsubscribe(&mut self, key: PairKey) -> Vec<WsServerEvent> {
        if self.pairs.remove(&key) {
            self.feed.untrack(&key);
            info!("Client unsubscribed from {}", key);
        }
        vec![WsServerEvent::UnsubscriptionSuccess { token_pair: key }]
    }

    fn resolve(&self, key: &PairKey) -> anyhow::Result<Option<TokenPair>> {
        if key.input_mint == key.output_mint {
            return Ok(None);
        }
        let base = self.db.token_by_mint(&key.input_mint)?;
        let quote = self.db.token_by_mint(&key.output_mint)?;
        Ok(base.zip(quote).map(|(base, quote)| TokenPair::new(base, quote)))
    }

    /// Translate a market event for this connection, if it cares
    pub fn filter(&self, event: MarketEvent) -> Option<WsServerEvent> {
        match event {
            MarketEvent::Price(quote) => {
                let key = PairKey::new(&quote.input_mint, &quote.output_mint);
                self.pairs
                    .contains(&key)
                    .then_some(WsServerEvent::PriceUpdate { data: quote })
            }
            MarketEvent::Opportunity(opportunity) => {
                Some(WsServerEvent::OpportunityUpdate { data: opportunity })
            }
        }
    }

    /// Release every pair this connection kept on the polling loop
    pub fn close(&mut self) {
        for key in self.pairs.drain() {
            self.feed.untrack(&key);
        }
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn parse_pair(message: &Value) -> Option<PairKey> {
    let pair = message.get("token_pair")?;
    let input = pair.get("input_mint")?.as_str()?;
    let output = pair.get("output_mint")?.as_str()?;
    Some(PairKey::new(input, output))
}

/// WebSocket upgrade for price and opportunity streaming
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send(socket: &mut WebSocket, event: &WsServerEvent) -> bool {
    let msg = serde_json::to_string(event).unwrap_or_else(|e| {
        warn!("Failed to serialize ws event: {}", e);
        "{}".to_string()
    });
    socket.send(Message::Text(msg)).await.is_ok()
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.events.subscribe();
    let mut session = WsSession::new(state.db.clone(), state.feed.clone());
    debug!("WebSocket client connected");

    'conn: loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if let Some(out) = session.filter(event) {
                            if !send(&mut socket, &out).await {
                                break 'conn;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("WebSocket client lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break 'conn,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        for reply in session.handle_text(&text) {
                            if !send(&mut socket, &reply).await {
                                break 'conn;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break 'conn,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket receive error: {}", e);
                        break 'conn;
                    }
                }
            }
        }
    }

    session.close();
    debug!("WebSocket client disconnected");
}
