//! Polymarket CLOB market channel

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use oddsfeed_core::{parse_decimal, OrderBookUpdate, PriceUpdate, Side, Venue};

use super::{parse_object_levels, TokenRegistry, VenueProtocol};
use crate::state::CacheWrite;

/// Translates `book`, `price_change`, `last_trade_price` and `best_bid_ask`
/// events. `tick_size_change` and anything unknown is ignored.
#[derive(Debug, Default)]
pub struct PolymarketProtocol {
    registry: TokenRegistry,
}

impl PolymarketProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_event(&self, event: &Value, out: &mut Vec<CacheWrite>) {
        let event_type = event
            .get("event_type")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        match event_type {
            "book" => out.extend(self.parse_book(event)),
            "price_change" => self.parse_price_change(event, out),
            "last_trade_price" => out.extend(self.parse_trade(event)),
            "best_bid_ask" => out.extend(self.parse_best_bid_ask(event)),
            "tick_size_change" => trace!("Ignoring tick_size_change"),
            other => trace!(event_type = other, "Ignoring unknown Polymarket event"),
        }
    }

    fn market_of(&self, event: &Value, token_id: &str) -> Option<String> {
        event
            .get("market")
            .and_then(|v| v.as_str())
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .or_else(|| self.registry.market_for(token_id))
    }

    fn parse_book(&self, event: &Value) -> Option<CacheWrite> {
        let token_id = asset_id(event)?;

        let mut update = OrderBookUpdate::new(Venue::Polymarket, token_id);
        update.market_id = self.market_of(event, token_id);
        // Older payloads call the sides buys/sells
        update.bids = parse_object_levels(event.get("bids").or_else(|| event.get("buys")));
        update.asks = parse_object_levels(event.get("asks").or_else(|| event.get("sells")));
        update.timestamp = timestamp(event);

        Some(CacheWrite::Book(update))
    }

    fn parse_price_change(&self, event: &Value, out: &mut Vec<CacheWrite>) {
        let stamp = timestamp(event);

        match event.get("price_changes").and_then(|v| v.as_array()) {
            Some(changes) => {
                for change in changes {
                    if let Some(write) = self.quote_write(event, change, stamp) {
                        out.push(write);
                    }
                }
            }
            // Single-asset form carries the quote at the top level
            None => out.extend(self.quote_write(event, event, stamp)),
        }
    }

    fn quote_write(
        &self,
        event: &Value,
        change: &Value,
        stamp: Option<DateTime<Utc>>,
    ) -> Option<CacheWrite> {
        let token_id = asset_id(change)?;
        let best_bid = change.get("best_bid").and_then(parse_decimal);
        let best_ask = change.get("best_ask").and_then(parse_decimal);
        if best_bid.is_none() && best_ask.is_none() {
            debug!(token_id, "price_change without best_bid/best_ask");
            return None;
        }

        let mut update = PriceUpdate::new(Venue::Polymarket, token_id).with_quote(best_bid, best_ask);
        update.market_id = self.market_of(event, token_id);
        update.timestamp = stamp;
        Some(CacheWrite::Price(update))
    }

    fn parse_best_bid_ask(&self, event: &Value) -> Option<CacheWrite> {
        let stamp = timestamp(event);
        self.quote_write(event, event, stamp)
    }

    fn parse_trade(&self, event: &Value) -> Option<CacheWrite> {
        let token_id = asset_id(event)?;
        let price = event.get("price").and_then(parse_decimal);
        let size = event.get("size").and_then(parse_decimal);
        let side = event
            .get("side")
            .and_then(|v| v.as_str())
            .and_then(Side::parse);
        if price.is_none() {
            debug!(token_id, "last_trade_price without a usable price");
            return None;
        }

        let mut update = PriceUpdate::new(Venue::Polymarket, token_id).with_trade(price, size, side);
        update.market_id = self.market_of(event, token_id);
        update.timestamp = timestamp(event);
        Some(CacheWrite::Price(update))
    }
}

fn asset_id(value: &Value) -> Option<&str> {
    value
        .get("asset_id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
}

/// Millisecond timestamps arrive as strings or numbers
fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.get("timestamp")?;
    let millis = match raw {
        Value::String(s) => s.parse::<i64>().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    DateTime::from_timestamp_millis(millis)
}

impl VenueProtocol for PolymarketProtocol {
    fn venue(&self) -> Venue {
        Venue::Polymarket
    }

    fn initial_frames(&self, tokens: &[String]) -> Vec<Message> {
        if tokens.is_empty() {
            return Vec::new();
        }
        let frame = json!({ "type": "market", "assets_ids": tokens });
        vec![Message::Text(frame.to_string())]
    }

    fn subscribe_frames(&self, tokens: &[String]) -> Vec<Message> {
        if tokens.is_empty() {
            return Vec::new();
        }
        let frame = json!({ "assets_ids": tokens, "operation": "subscribe" });
        vec![Message::Text(frame.to_string())]
    }

    fn unsubscribe_frames(&self, tokens: &[String]) -> Vec<Message> {
        if tokens.is_empty() {
            return Vec::new();
        }
        let frame = json!({ "assets_ids": tokens, "operation": "unsubscribe" });
        vec![Message::Text(frame.to_string())]
    }

    fn heartbeat_frame(&self) -> Message {
        Message::Text("PING".to_string())
    }

    fn parse(&self, text: &str) -> Vec<CacheWrite> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("PONG") || text.is_empty() {
            return Vec::new();
        }

        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Dropping non-JSON Polymarket frame");
                return Vec::new();
            }
        };

        let mut writes = Vec::new();
        match &value {
            Value::Array(events) => {
                for event in events {
                    self.parse_event(event, &mut writes);
                }
            }
            Value::Object(_) => self.parse_event(&value, &mut writes),
            _ => debug!("Dropping unexpected Polymarket frame shape"),
        }
        writes
    }

    fn registry(&self) -> &TokenRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn d(units: i64, scale: u32) -> Decimal {
        Decimal::new(units, scale)
    }

    #[test]
    fn test_book_event() {
        let protocol = PolymarketProtocol::new();
        let writes = protocol.parse(
            r#"{"event_type":"book","asset_id":"tok","market":"0xabc",
                "bids":[{"price":"0.40","size":"10"},{"price":"0.45","size":"0"},{"price":"0.44","size":"3"}],
                "asks":[{"price":"0.60","size":"1"},{"price":"0.55","size":"2"}],
                "timestamp":"1700000000000"}"#,
        );

        assert_eq!(writes.len(), 1);
        let CacheWrite::Book(book) = &writes[0] else {
            panic!("expected book write");
        };
        assert_eq!(book.market_id.as_deref(), Some("0xabc"));
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.asks.len(), 2);
        assert_eq!(book.timestamp.unwrap().timestamp_millis(), 1_700_000_000_000);

        let snapshot = book.clone().into_snapshot();
        assert_eq!(snapshot.bids[0].price, d(44, 2));
        assert_eq!(snapshot.asks[0].price, d(55, 2));
    }

    #[test]
    fn test_price_change_batch_and_registry_fallback() {
        let protocol = PolymarketProtocol::new();
        protocol.register_token("b", "0xmarket");

        let writes = protocol.parse(
            r#"{"event_type":"price_change","timestamp":"1700000000000","price_changes":[
                {"asset_id":"a","price":"0.5","size":"10","side":"BUY","best_bid":"0.50","best_ask":"0.52"},
                {"asset_id":"b","price":"0.5","size":"10","side":"SELL","best_ask":"0.49"},
                {"asset_id":"c","price":"0.5","size":"10","side":"SELL"}
            ]}"#,
        );

        assert_eq!(writes.len(), 2);
        let CacheWrite::Price(a) = &writes[0] else {
            panic!("expected price write");
        };
        assert_eq!(a.best_bid, Some(d(50, 2)));
        assert_eq!(a.best_ask, Some(d(52, 2)));

        let CacheWrite::Price(b) = &writes[1] else {
            panic!("expected price write");
        };
        assert_eq!(b.best_bid, None);
        assert_eq!(b.best_ask, Some(d(49, 2)));
        assert_eq!(b.market_id.as_deref(), Some("0xmarket"));
    }

    #[test]
    fn test_trade_event() {
        let protocol = PolymarketProtocol::new();
        let writes = protocol.parse(
            r#"[{"event_type":"last_trade_price","asset_id":"tok","market":"m","price":"0.51","size":"25","side":"BUY"}]"#,
        );

        let CacheWrite::Price(update) = &writes[0] else {
            panic!("expected price write");
        };
        assert_eq!(update.last_trade_price, Some(d(51, 2)));
        assert_eq!(update.last_trade_size, Some(d(25, 0)));
        assert_eq!(update.last_trade_side, Some(Side::Buy));
        assert!(update.best_bid.is_none());
    }

    #[test]
    fn test_malformed_numbers_dropped() {
        let protocol = PolymarketProtocol::new();
        let writes = protocol.parse(
            r#"{"event_type":"best_bid_ask","asset_id":"tok","best_bid":"n/a","best_ask":"0.61"}"#,
        );
        let CacheWrite::Price(update) = &writes[0] else {
            panic!("expected price write");
        };
        assert_eq!(update.best_bid, None);
        assert_eq!(update.best_ask, Some(d(61, 2)));

        assert!(protocol
            .parse(r#"{"event_type":"last_trade_price","asset_id":"tok","price":"??"}"#)
            .is_empty());
    }

    #[test]
    fn test_ignored_frames() {
        let protocol = PolymarketProtocol::new();
        assert!(protocol.parse("PONG").is_empty());
        assert!(protocol.parse("not json").is_empty());
        assert!(protocol
            .parse(r#"{"event_type":"tick_size_change","asset_id":"tok","new_tick_size":"0.001"}"#)
            .is_empty());
        assert!(protocol.parse(r#"{"event_type":"new_fancy_event"}"#).is_empty());
        assert!(protocol.parse(r#"{"event_type":"book"}"#).is_empty());
    }

    #[test]
    fn test_frames() {
        let protocol = PolymarketProtocol::new();
        let tokens = vec!["a".to_string(), "b".to_string()];

        let Message::Text(initial) = &protocol.initial_frames(&tokens)[0] else {
            panic!("expected text frame");
        };
        let initial: Value = serde_json::from_str(initial).unwrap();
        assert_eq!(initial["type"], "market");
        assert_eq!(initial["assets_ids"], json!(["a", "b"]));

        let Message::Text(unsub) = &protocol.unsubscribe_frames(&tokens)[0] else {
            panic!("expected text frame");
        };
        assert!(unsub.contains("\"unsubscribe\""));
        assert!(protocol.subscribe_frames(&[]).is_empty());
        assert_eq!(protocol.heartbeat_frame(), Message::Text("PING".into()));
    }
}
