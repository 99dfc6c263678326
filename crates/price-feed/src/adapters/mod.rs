//! Venue protocol adapters
//!
//! One [`VenueProtocol`] implementation per push venue translates that
//! venue's wire schema into canonical [`CacheWrite`]s. Adapters are pure:
//! they build frames and parse text, the connection manager owns the socket
//! and the cache.

use dashmap::DashMap;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use oddsfeed_core::{parse_decimal, BookLevel, Venue};

use crate::state::CacheWrite;

pub mod kalshi;
pub mod polymarket;

pub use kalshi::KalshiProtocol;
pub use polymarket::PolymarketProtocol;

/// Wire protocol of one push venue
pub trait VenueProtocol: Send + Sync {
    fn venue(&self) -> Venue;

    /// Frames that open a session's subscription set. Venues with a distinct
    /// handshake override this; the default is `subscribe_frames`.
    fn initial_frames(&self, tokens: &[String]) -> Vec<Message> {
        self.subscribe_frames(tokens)
    }

    /// Frames that add `tokens` to the session
    fn subscribe_frames(&self, tokens: &[String]) -> Vec<Message>;

    /// Frames that drop `tokens` from the session
    fn unsubscribe_frames(&self, tokens: &[String]) -> Vec<Message>;

    /// Keepalive frame sent on every heartbeat tick
    fn heartbeat_frame(&self) -> Message {
        Message::Ping(Vec::new())
    }

    /// Called once per new session before any frame is sent
    fn on_session_start(&self) {}

    /// Translate one inbound text frame. Each message inside the frame
    /// yields at most one write; unknown kinds yield nothing.
    fn parse(&self, text: &str) -> Vec<CacheWrite>;

    fn registry(&self) -> &TokenRegistry;

    fn register_token(&self, token_id: &str, market_id: &str) {
        self.registry().register(token_id, market_id);
    }

    fn market_for(&self, token_id: &str) -> Option<String> {
        self.registry().market_for(token_id)
    }
}

/// Build the protocol adapter for a push venue
pub fn protocol_for(venue: Venue) -> Option<Arc<dyn VenueProtocol>> {
    match venue {
        Venue::Polymarket => Some(Arc::new(PolymarketProtocol::new())),
        Venue::Kalshi => Some(Arc::new(KalshiProtocol::new())),
        Venue::Limitless | Venue::Myriad => None,
    }
}

/// Reverse map token_id -> market_id for messages keyed only by token
#[derive(Debug, Default)]
pub struct TokenRegistry {
    markets: DashMap<String, String>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token_id: &str, market_id: &str) {
        self.markets.insert(token_id.to_string(), market_id.to_string());
    }

    pub fn remove(&self, token_id: &str) {
        self.markets.remove(token_id);
    }

    pub fn market_for(&self, token_id: &str) -> Option<String> {
        self.markets.get(token_id).map(|m| m.value().clone())
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

/// Parse a list of `{price, size}` objects, dropping malformed or
/// non-positive levels.
pub(crate) fn parse_object_levels(levels: Option<&serde_json::Value>) -> Vec<BookLevel> {
    let Some(levels) = levels.and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    levels
        .iter()
        .filter_map(|level| {
            let price = level.get("price").and_then(parse_decimal);
            let size = level.get("size").and_then(parse_decimal);
            match (price, size) {
                (Some(price), Some(size)) => Some(BookLevel::new(price, size)),
                _ => {
                    debug!(?level, "Dropping malformed book level");
                    None
                }
            }
        })
        .filter(BookLevel::is_valid)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    #[test]
    fn test_registry_round_trip() {
        let registry = TokenRegistry::new();
        registry.register("tok", "mkt");
        assert_eq!(registry.market_for("tok").as_deref(), Some("mkt"));
        registry.remove("tok");
        assert!(registry.market_for("tok").is_none());
    }

    #[test]
    fn test_parse_object_levels_drops_bad_entries() {
        let levels = json!([
            {"price": "0.40", "size": "100"},
            {"price": "oops", "size": "1"},
            {"price": "0.41", "size": "0"},
            {"price": "-0.1", "size": "5"},
            {"size": "5"},
            {"price": 0.39, "size": 12}
        ]);
        let parsed = parse_object_levels(Some(&levels));
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].price, Decimal::new(40, 2));
        assert_eq!(parsed[1].size, Decimal::from(12));
    }

    #[test]
    fn test_protocol_for_push_venues_only() {
        assert!(protocol_for(Venue::Polymarket).is_some());
        assert!(protocol_for(Venue::Kalshi).is_some());
        assert!(protocol_for(Venue::Myriad).is_none());
    }
}
