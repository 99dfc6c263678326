//! Core type definitions

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ConfigError;

/// Supported upstream venues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Polymarket,
    Kalshi,
    Limitless,
    Myriad,
}

/// How a venue delivers prices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Push,
    Poll,
}

impl Venue {
    pub const ALL: [Venue; 4] = [
        Venue::Polymarket,
        Venue::Kalshi,
        Venue::Limitless,
        Venue::Myriad,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Venue::Polymarket => "polymarket",
            Venue::Kalshi => "kalshi",
            Venue::Limitless => "limitless",
            Venue::Myriad => "myriad",
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            Venue::Polymarket | Venue::Kalshi => Transport::Push,
            Venue::Limitless | Venue::Myriad => Transport::Poll,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Venue {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polymarket" => Ok(Venue::Polymarket),
            "kalshi" => Ok(Venue::Kalshi),
            "limitless" => Ok(Venue::Limitless),
            "myriad" => Ok(Venue::Myriad),
            other => Err(ConfigError::InvalidVenue(other.to_string())),
        }
    }
}

/// Aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Lenient parse used on venue payloads ("BUY", "sell", "yes", "no")
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" | "yes" | "bid" => Some(Side::Buy),
            "sell" | "no" | "ask" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Cache key shared by prices and orderbooks
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PriceKey {
    pub venue: Venue,
    pub token_id: String,
}

impl PriceKey {
    pub fn new(venue: Venue, token_id: impl Into<String>) -> Self {
        Self {
            venue,
            token_id: token_id.into(),
        }
    }
}

impl fmt::Display for PriceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.venue, self.token_id)
    }
}

/// Latest known price view for one outcome token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub venue: Venue,
    pub market_id: Option<String>,
    pub token_id: String,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub last_trade_price: Option<Decimal>,
    pub last_trade_size: Option<Decimal>,
    pub last_trade_side: Option<Side>,
    pub updated_at: DateTime<Utc>,
}

impl PriceSnapshot {
    pub fn key(&self) -> PriceKey {
        PriceKey::new(self.venue, self.token_id.clone())
    }

    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Apply a merge-update: present fields overwrite, absent fields stay
    pub fn merge(&mut self, update: &PriceUpdate) {
        if update.market_id.is_some() {
            self.market_id = update.market_id.clone();
        }
        if update.best_bid.is_some() {
            self.best_bid = update.best_bid;
        }
        if update.best_ask.is_some() {
            self.best_ask = update.best_ask;
        }
        if update.last_trade_price.is_some() {
            self.last_trade_price = update.last_trade_price;
        }
        if update.last_trade_size.is_some() {
            self.last_trade_size = update.last_trade_size;
        }
        if update.last_trade_side.is_some() {
            self.last_trade_side = update.last_trade_side;
        }
        self.updated_at = update.timestamp.unwrap_or_else(Utc::now);
    }
}

/// Partial price update; `None` means "not carried by this message"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub venue: Venue,
    pub market_id: Option<String>,
    pub token_id: String,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub last_trade_price: Option<Decimal>,
    pub last_trade_size: Option<Decimal>,
    pub last_trade_side: Option<Side>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PriceUpdate {
    pub fn new(venue: Venue, token_id: impl Into<String>) -> Self {
        Self {
            venue,
            market_id: None,
            token_id: token_id.into(),
            best_bid: None,
            best_ask: None,
            last_trade_price: None,
            last_trade_size: None,
            last_trade_side: None,
            timestamp: None,
        }
    }

    pub fn with_market(mut self, market_id: impl Into<String>) -> Self {
        self.market_id = Some(market_id.into());
        self
    }

    pub fn with_quote(mut self, best_bid: Option<Decimal>, best_ask: Option<Decimal>) -> Self {
        self.best_bid = best_bid;
        self.best_ask = best_ask;
        self
    }

    pub fn with_trade(
        mut self,
        price: Option<Decimal>,
        size: Option<Decimal>,
        side: Option<Side>,
    ) -> Self {
        self.last_trade_price = price;
        self.last_trade_size = size;
        self.last_trade_side = side;
        self
    }

    /// True when the update carries no price field at all
    pub fn is_empty(&self) -> bool {
        self.best_bid.is_none()
            && self.best_ask.is_none()
            && self.last_trade_price.is_none()
            && self.last_trade_size.is_none()
            && self.last_trade_side.is_none()
    }

    pub fn key(&self) -> PriceKey {
        PriceKey::new(self.venue, self.token_id.clone())
    }

    /// Build the first snapshot for a key from this update
    pub fn into_snapshot(self) -> PriceSnapshot {
        PriceSnapshot {
            venue: self.venue,
            market_id: self.market_id,
            token_id: self.token_id,
            best_bid: self.best_bid,
            best_ask: self.best_ask,
            last_trade_price: self.last_trade_price,
            last_trade_size: self.last_trade_size,
            last_trade_side: self.last_trade_side,
            updated_at: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Parse a venue-supplied decimal, accepting JSON strings and numbers.
///
/// Returns `None` for anything that is not a finite number; callers drop the
/// field instead of failing the message.
pub fn parse_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(|f| Decimal::from_str(&f.to_string()).ok())
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut snapshot = PriceUpdate::new(Venue::Polymarket, "tok")
            .with_quote(Some(d("1")), Some(d("2")))
            .into_snapshot();

        let update = PriceUpdate::new(Venue::Polymarket, "tok")
            .with_quote(None, Some(d("3")))
            .with_trade(Some(d("5")), None, None);
        snapshot.merge(&update);

        assert_eq!(snapshot.best_bid, Some(d("1")));
        assert_eq!(snapshot.best_ask, Some(d("3")));
        assert_eq!(snapshot.last_trade_price, Some(d("5")));
    }

    #[test]
    fn test_venue_parse_and_display() {
        assert_eq!("Kalshi".parse::<Venue>().unwrap(), Venue::Kalshi);
        assert_eq!(Venue::Polymarket.to_string(), "polymarket");
        assert!("nasdaq".parse::<Venue>().is_err());
        assert_eq!(Venue::Limitless.transport(), Transport::Poll);
    }

    #[test]
    fn test_parse_decimal_preserves_scale() {
        assert_eq!(parse_decimal(&json!("0.40")).unwrap().to_string(), "0.40");
        assert_eq!(parse_decimal(&json!(0.42)), Some(d("0.42")));
        assert_eq!(parse_decimal(&json!(7)), Some(d("7")));
        assert_eq!(parse_decimal(&json!("abc")), None);
        assert_eq!(parse_decimal(&json!(null)), None);
    }

    #[test]
    fn test_mid() {
        let snapshot = PriceUpdate::new(Venue::Kalshi, "T1")
            .with_quote(Some(d("0.40")), Some(d("0.42")))
            .into_snapshot();
        assert_eq!(snapshot.mid(), Some(d("0.41")));
    }

    mod merge_props {
        use super::*;
        use proptest::prelude::*;

        fn price() -> impl Strategy<Value = Option<Decimal>> {
            proptest::option::of((1i64..10_000).prop_map(|c| Decimal::new(c, 4)))
        }

        proptest! {
            #[test]
            fn present_fields_overwrite_absent_fields_survive(
                old_bid in price(), old_ask in price(), old_trade in price(),
                new_bid in price(), new_ask in price(), new_trade in price(),
            ) {
                let mut snapshot = PriceUpdate::new(Venue::Kalshi, "T1")
                    .with_quote(old_bid, old_ask)
                    .with_trade(old_trade, None, None)
                    .into_snapshot();
                let update = PriceUpdate::new(Venue::Kalshi, "T1")
                    .with_quote(new_bid, new_ask)
                    .with_trade(new_trade, None, None);

                snapshot.merge(&update);

                prop_assert_eq!(snapshot.best_bid, new_bid.or(old_bid));
                prop_assert_eq!(snapshot.best_ask, new_ask.or(old_ask));
                prop_assert_eq!(snapshot.last_trade_price, new_trade.or(old_trade));
            }
        }
    }
}
