//! Kalshi v2 websocket
//!
//! Market tickers double as token ids. Prices arrive in integer cents (or as
//! `*_dollars` strings on newer payloads) and are normalised to dollars.
//! Books are kept locally per ticker: `orderbook_snapshot` seeds one and each
//! `orderbook_delta` adjusts it, and both publish the whole book.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use oddsfeed_core::{parse_decimal, BookLevel, OrderBookUpdate, PriceUpdate, Side, Venue};

use super::{TokenRegistry, VenueProtocol};
use crate::state::CacheWrite;

const CHANNELS: [&str; 3] = ["ticker", "trade", "orderbook_delta"];

#[derive(Debug, Default)]
pub struct KalshiProtocol {
    registry: TokenRegistry,
    next_id: AtomicU64,
    /// Subscription ids confirmed in the current session
    sids: Mutex<Vec<u64>>,
    books: DashMap<String, LocalBook>,
}

/// Resting size per price in cents
#[derive(Debug, Default, Clone)]
struct LocalBook {
    yes: BTreeMap<i64, Decimal>,
    no: BTreeMap<i64, Decimal>,
}

impl LocalBook {
    fn from_snapshot(msg: &Value) -> Self {
        Self {
            yes: cent_sizes(msg.get("yes")),
            no: cent_sizes(msg.get("no")),
        }
    }

    /// Returns false for an unknown side
    fn apply_delta(&mut self, side: &str, price: i64, delta: Decimal) -> bool {
        let levels = match side {
            "yes" => &mut self.yes,
            "no" => &mut self.no,
            _ => return false,
        };
        let size = levels.entry(price).or_insert(Decimal::ZERO);
        *size += delta;
        if *size <= Decimal::ZERO {
            levels.remove(&price);
        }
        true
    }

    fn to_update(&self, ticker: &str, market_id: Option<String>) -> OrderBookUpdate {
        let mut update = OrderBookUpdate::new(Venue::Kalshi, ticker);
        update.market_id = market_id;
        update.bids = book_levels(&self.yes, false);
        // A resting NO bid at p is a YES offer at 1 - p
        update.asks = book_levels(&self.no, true);
        update
    }
}

impl KalshiProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    fn command_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn parse_ticker(&self, msg: &Value) -> Option<CacheWrite> {
        let ticker = market_ticker(msg)?;
        let best_bid = price_field(msg, "yes_bid");
        let best_ask = price_field(msg, "yes_ask");
        if best_bid.is_none() && best_ask.is_none() {
            return None;
        }

        let mut update = PriceUpdate::new(Venue::Kalshi, ticker).with_quote(best_bid, best_ask);
        update.market_id = self.market_of(ticker);
        update.timestamp = seconds(msg.get("ts"));
        Some(CacheWrite::Price(update))
    }

    fn parse_trade(&self, msg: &Value) -> Option<CacheWrite> {
        let ticker = market_ticker(msg)?;
        let price = price_field(msg, "yes_price").filter(|p| *p > Decimal::ZERO)?;
        let size = msg.get("count").and_then(parse_decimal);
        let side = msg
            .get("taker_side")
            .and_then(|v| v.as_str())
            .and_then(Side::parse);

        let mut update = PriceUpdate::new(Venue::Kalshi, ticker).with_trade(Some(price), size, side);
        update.market_id = self.market_of(ticker);
        update.timestamp = seconds(msg.get("ts"));
        Some(CacheWrite::Price(update))
    }

    fn parse_snapshot(&self, msg: &Value) -> Option<CacheWrite> {
        let ticker = market_ticker(msg)?;
        let book = LocalBook::from_snapshot(msg);
        let update = book.to_update(ticker, self.market_of(ticker));
        self.books.insert(ticker.to_string(), book);
        Some(CacheWrite::Book(update))
    }

    fn parse_delta(&self, msg: &Value) -> Option<CacheWrite> {
        let ticker = market_ticker(msg)?;
        let price = msg.get("price").and_then(|v| v.as_i64());
        let delta = msg.get("delta").and_then(parse_decimal);
        let side = msg.get("side").and_then(|v| v.as_str());
        let (Some(price), Some(delta), Some(side)) = (price, delta, side) else {
            debug!(ticker, "Dropping malformed Kalshi delta");
            return None;
        };

        let Some(mut book) = self.books.get_mut(ticker) else {
            trace!(ticker, "Delta before snapshot");
            return None;
        };
        if !book.apply_delta(side, price, delta) {
            debug!(ticker, side, "Dropping Kalshi delta for unknown side");
            return None;
        }
        Some(CacheWrite::Book(book.to_update(ticker, self.market_of(ticker))))
    }

    fn market_of(&self, ticker: &str) -> Option<String> {
        Some(
            self.registry
                .market_for(ticker)
                .unwrap_or_else(|| ticker.to_string()),
        )
    }
}

fn market_ticker(msg: &Value) -> Option<&str> {
    msg.get("market_ticker")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
}

fn cents(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.as_i64().map(|c| Decimal::new(c, 2)),
        _ => None,
    }
}

/// `field` in cents, or `field_dollars` as a decimal string. Zero is kept:
/// Kalshi sends it when a side has no resting orders.
fn price_field(msg: &Value, field: &str) -> Option<Decimal> {
    msg.get(format!("{field}_dollars").as_str())
        .and_then(parse_decimal)
        .or_else(|| msg.get(field).and_then(cents))
        .filter(|p| *p >= Decimal::ZERO)
}

/// `[[price_cents, size], ...]` keyed by price
fn cent_sizes(levels: Option<&Value>) -> BTreeMap<i64, Decimal> {
    levels
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|level| {
            let pair = level.as_array()?;
            let price = pair.first()?.as_i64()?;
            let size = pair.get(1).and_then(parse_decimal)?;
            Some((price, size))
        })
        .filter(|(_, size)| *size > Decimal::ZERO)
        .collect()
}

fn book_levels(sizes: &BTreeMap<i64, Decimal>, complement: bool) -> Vec<BookLevel> {
    sizes
        .iter()
        .map(|(cents, size)| {
            let price = Decimal::new(*cents, 2);
            let price = if complement { Decimal::ONE - price } else { price };
            BookLevel::new(price, *size)
        })
        .filter(BookLevel::is_valid)
        .collect()
}

fn seconds(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.as_i64())
        .and_then(|s| DateTime::from_timestamp(s, 0))
}

impl VenueProtocol for KalshiProtocol {
    fn venue(&self) -> Venue {
        Venue::Kalshi
    }

    fn subscribe_frames(&self, tokens: &[String]) -> Vec<Message> {
        if tokens.is_empty() {
            return Vec::new();
        }
        let frame = json!({
            "id": self.command_id(),
            "cmd": "subscribe",
            "params": { "channels": CHANNELS, "market_tickers": tokens },
        });
        vec![Message::Text(frame.to_string())]
    }

    fn unsubscribe_frames(&self, tokens: &[String]) -> Vec<Message> {
        let sids = self.sids.lock().clone();
        if tokens.is_empty() || sids.is_empty() {
            return Vec::new();
        }
        let frame = json!({
            "id": self.command_id(),
            "cmd": "update_subscription",
            "params": { "sids": sids, "market_tickers": tokens, "action": "delete_markets" },
        });
        vec![Message::Text(frame.to_string())]
    }

    fn on_session_start(&self) {
        self.sids.lock().clear();
        // Fresh snapshots follow every subscribe
        self.books.clear();
    }

    fn parse(&self, text: &str) -> Vec<CacheWrite> {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Dropping non-JSON Kalshi frame");
                return Vec::new();
            }
        };

        let kind = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let Some(msg) = value.get("msg") else {
            trace!(kind, "Kalshi frame without msg body");
            return Vec::new();
        };

        let write = match kind {
            "ticker" | "ticker_v2" => self.parse_ticker(msg),
            "trade" => self.parse_trade(msg),
            "orderbook_snapshot" => self.parse_snapshot(msg),
            "orderbook_delta" => self.parse_delta(msg),
            "subscribed" => {
                if let Some(sid) = msg.get("sid").and_then(|v| v.as_u64()) {
                    self.sids.lock().push(sid);
                }
                None
            }
            "error" => {
                warn!(error = %msg, "Kalshi reported an error");
                None
            }
            other => {
                trace!(kind = other, "Ignoring Kalshi message");
                None
            }
        };

        write.into_iter().collect()
    }

    fn registry(&self) -> &TokenRegistry {
        &self.registry
    }
}
