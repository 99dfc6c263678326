//! Type conversions between internal types and proto types

use rust_decimal::Decimal;
use tonic::Status;

use oddsfeed_core::{PriceSnapshot, Transport, Venue};
use oddsfeed_price_feed::{StreamEvent, VenueStatus as CoreVenueStatus};

use crate::proto::{EventKind, Price, PriceEvent, VenueStatus};

fn decimal(value: Option<Decimal>) -> String {
    value.map(|d| d.to_string()).unwrap_or_default()
}

impl From<&PriceSnapshot> for Price {
    fn from(snapshot: &PriceSnapshot) -> Self {
        Price {
            venue: snapshot.venue.name().to_string(),
            market_id: snapshot.market_id.clone().unwrap_or_default(),
            token_id: snapshot.token_id.clone(),
            best_bid: decimal(snapshot.best_bid),
            best_ask: decimal(snapshot.best_ask),
            last_trade_price: decimal(snapshot.last_trade_price),
            last_trade_size: decimal(snapshot.last_trade_size),
            last_trade_side: snapshot
                .last_trade_side
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            updated_at_ms: snapshot.updated_at.timestamp_millis(),
        }
    }
}

impl From<StreamEvent> for PriceEvent {
    fn from(event: StreamEvent) -> Self {
        let (kind, price) = match event {
            StreamEvent::Snapshot(snapshot) => (EventKind::Snapshot, Some(Price::from(&snapshot))),
            StreamEvent::Price(snapshot) => (EventKind::Price, Some(Price::from(&snapshot))),
            StreamEvent::Keepalive => (EventKind::Keepalive, None),
        };

        PriceEvent {
            kind: kind as i32,
            price,
            sent_at_ms: now_ms(),
        }
    }
}

impl From<&CoreVenueStatus> for VenueStatus {
    fn from(status: &CoreVenueStatus) -> Self {
        VenueStatus {
            venue: status.venue.name().to_string(),
            transport: match status.transport {
                Transport::Push => "push".to_string(),
                Transport::Poll => "poll".to_string(),
            },
            connected: status.connected,
            active: status.active,
            tracked_tokens: status.tracked_tokens as u32,
            poll_subscriptions: status.poll_subscriptions as u32,
        }
    }
}

/// Parse a required venue field
pub fn parse_venue(raw: &str) -> Result<Venue, Status> {
    raw.parse::<Venue>()
        .map_err(|e| Status::invalid_argument(e.to_string()))
}

/// Parse an optional venue filter; empty means all venues
pub fn parse_venue_filter(raw: &str) -> Result<Option<Venue>, Status> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    parse_venue(raw).map(Some)
}

/// Get current timestamp in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use oddsfeed_core::{PriceUpdate, Side};

    #[test]
    fn test_price_conversion_keeps_scale() {
        let snapshot = PriceUpdate::new(Venue::Kalshi, "T1")
            .with_market("EVENT-1")
            .with_quote(Some(Decimal::new(40, 2)), None)
            .with_trade(Some(Decimal::new(41, 2)), Some(Decimal::from(10)), Some(Side::Buy))
            .into_snapshot();

        let price = Price::from(&snapshot);
        assert_eq!(price.venue, "kalshi");
        assert_eq!(price.market_id, "EVENT-1");
        assert_eq!(price.best_bid, "0.40");
        assert_eq!(price.best_ask, "");
        assert_eq!(price.last_trade_side, "buy");
    }

    #[test]
    fn test_keepalive_has_no_price() {
        let event = PriceEvent::from(StreamEvent::Keepalive);
        assert_eq!(event.kind(), EventKind::Keepalive);
        assert!(event.price.is_none());
    }

    #[test]
    fn test_venue_parsing() {
        assert_eq!(parse_venue("Polymarket").unwrap(), Venue::Polymarket);
        assert_eq!(parse_venue_filter("").unwrap(), None);
        let err = parse_venue("nasdaq").unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }
}
